/// 连接接收与分发
///
/// 监听配置的地址，为每个接受的连接启动一个独立任务。接收循环本身不处理请求，
/// 因此某个目标卡住不会阻塞其他客户端。
use crate::config::ProxyConfig;
use crate::handler::{handle_connection, ProxyContext};
use crate::rate_limiter::RateLimiter;
use crate::stats::ProxyStats;
use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// 监听队列长度
const LISTEN_BACKLOG: i32 = 1024;

/// accept 出错后的等待时间（例如文件描述符耗尽）
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// 强制关闭后等待任务退出的时间
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(1);

/// 代理服务器
pub struct ProxyServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: ProxyContext,
    rate_limiter: Option<RateLimiter>,
    connection_limit: Option<Arc<Semaphore>>,
}

impl ProxyServer {
    /// 绑定监听地址
    ///
    /// 地址被占用或不可用时返回错误，调用方应将其视为致命错误
    pub async fn bind(config: ProxyConfig) -> Result<Self> {
        config
            .validate()
            .context("Proxy configuration validation failed")?;

        let rate_limiter = config
            .rate_limit
            .clone()
            .map(RateLimiter::new)
            .transpose()?;
        let connection_limit = config
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max)));

        let ctx = ProxyContext::new(config)?;
        let listen_addr = ctx.config.listen_addr();

        let listener = bind_listener(&listen_addr)
            .await
            .with_context(|| format!("Failed to bind proxy listener to {}", listen_addr))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            ctx,
            rate_limiter,
            connection_limit,
        })
    }

    /// 实际监听的地址（配置端口为 0 时可用于获取系统分配的端口）
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 共享的统计计数器
    pub fn stats(&self) -> ProxyStats {
        self.ctx.stats.clone()
    }

    /// 接受连接直到 `shutdown` 完成
    ///
    /// 关闭时先停止接受新连接，然后在 `shutdown_grace_secs` 内等待活跃连接结束，
    /// 超时后强制关闭剩余连接。
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let ProxyServer {
            listener,
            local_addr,
            ctx,
            rate_limiter,
            connection_limit,
        } = self;

        info!("Proxy listening on {}", local_addr);
        log_access_policy(&ctx);
        if let Some(max) = ctx.config.max_connections {
            info!("Maximum concurrent connections: {}", max);
        }
        if let Some(ref limiter) = rate_limiter {
            info!(
                "Connection rate limit: {}/s (burst {})",
                limiter.config().requests_per_second,
                limiter.config().burst_size
            );
        }
        info!("Press Ctrl+C to stop the proxy");

        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            // 应用速率限制
                            if let Some(ref limiter) = rate_limiter {
                                if let Err(wait_time) = limiter.check() {
                                    warn!(
                                        "Rate limit exceeded, rejecting connection from {} (retry after {:?})",
                                        peer_addr, wait_time
                                    );
                                    ctx.stats.connection_rejected();
                                    continue;
                                }
                            }

                            // 尝试获取连接许可
                            let permit = match connection_limit {
                                Some(ref limit) => match limit.clone().try_acquire_owned() {
                                    Ok(permit) => Some(permit),
                                    Err(_) => {
                                        warn!(
                                            "Connection limit reached, rejecting connection from {}",
                                            peer_addr
                                        );
                                        ctx.stats.connection_rejected();
                                        continue;
                                    }
                                },
                                None => None,
                            };

                            if let Err(e) = stream.set_nodelay(true) {
                                debug!("Failed to set TCP_NODELAY: {}", e);
                            }

                            let ctx = ctx.clone();
                            let cancel = cancel.clone();
                            let span = info_span!("conn", id = %connection_id(), peer = %peer_addr);

                            tracker.spawn(
                                async move {
                                    // 持有 permit 直到任务结束，自动释放
                                    let _permit = permit;
                                    tokio::select! {
                                        _ = handle_connection(stream, peer_addr.ip(), ctx) => {}
                                        _ = cancel.cancelled() => {
                                            debug!("Connection force-closed by shutdown");
                                        }
                                    }
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping proxy...");
                    break;
                }
            }
        }

        // 停止接受新连接
        drop(listener);
        tracker.close();

        if !tracker.is_empty() {
            let grace = ctx.config.shutdown_grace();
            info!(
                "Waiting up to {:?} for {} active connection(s) to finish",
                grace,
                tracker.len()
            );
            if timeout(grace, tracker.wait()).await.is_err() {
                warn!(
                    "{} connection(s) still active after {:?}, closing them",
                    tracker.len(),
                    grace
                );
                cancel.cancel();
                let _ = timeout(FORCE_CLOSE_WAIT, tracker.wait()).await;
            }
        }

        match serde_json::to_string(&ctx.stats.snapshot()) {
            Ok(json) => info!("Proxy stats: {}", json),
            Err(e) => debug!("Failed to serialize stats: {}", e),
        }
        info!("Proxy stopped gracefully");
        Ok(())
    }
}

/// 运行代理直到收到 Ctrl+C
pub async fn run_server(config: ProxyConfig) -> Result<()> {
    let server = ProxyServer::bind(config).await?;
    server.run(shutdown_signal()).await
}

/// 等待 Ctrl+C
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        // 无法监听信号时保持运行
        std::future::pending::<()>().await;
    }
}

/// 创建启用 SO_REUSEADDR 的监听 socket
async fn bind_listener(listen_addr: &str) -> Result<TcpListener> {
    let addr = tokio::net::lookup_host(listen_addr)
        .await
        .with_context(|| format!("Failed to resolve listen address {}", listen_addr))?
        .next()
        .with_context(|| format!("No address found for {}", listen_addr))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    let listener = TcpListener::from_std(socket.into())?;
    Ok(listener)
}

fn log_access_policy(ctx: &ProxyContext) {
    if ctx.config.is_exposed() {
        warn!(
            "⚠️  SECURITY WARNING: proxy binds to '{}' without an allowlist, anyone who can reach it may use it.\n\
             RECOMMENDATION: set allowed_ips (or --allowed-ips) to restrict access.",
            ctx.config.bind_addr
        );
    } else if ctx.allowlist.is_open() {
        warn!("⚠️  No allowlist configured, any local client can use this proxy");
    } else {
        info!("Allowed clients: {}", ctx.allowlist.entries().join(", "));
    }
}

/// 短连接 ID（用于日志关联）
fn connection_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ProxyConfig {
        ProxyConfig::builder()
            .bind_addr("127.0.0.1")
            .bind_port(0)
            .shutdown_grace_secs(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_assigns_port() {
        let server = ProxyServer::bind(local_config()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.local_addr().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_fails_when_port_in_use() {
        let first = ProxyServer::bind(local_config()).await.unwrap();
        let port = first.local_addr().port();

        let config = ProxyConfig::builder()
            .bind_addr("127.0.0.1")
            .bind_port(port)
            .build()
            .unwrap();
        assert!(ProxyServer::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = ProxyServer::bind(local_config()).await.unwrap();
        let addr = server.local_addr();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        // 运行期间可以连接
        tokio::net::TcpStream::connect(addr).await.unwrap();

        tx.send(()).unwrap();
        timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // 关闭后监听 socket 已释放
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[test]
    fn test_connection_id_length() {
        assert_eq!(connection_id().len(), 8);
        assert_ne!(connection_id(), connection_id());
    }
}
