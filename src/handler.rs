/// 单个客户端连接的处理流程
///
/// 白名单检查 → 读取并解析请求 → CONNECT 隧道或普通 HTTP 转发。
/// 连接在函数返回时关闭；任何错误都不会影响其他连接。
use crate::allowlist::Allowlist;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::forward;
use crate::relay::{RelayOptions, RelayReport};
use crate::request::{read_request, Method};
use crate::response::write_status;
use crate::stats::ProxyStats;
use crate::tunnel;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// 错误响应后丢弃剩余请求数据的最长时间
const LINGER_TIMEOUT: Duration = Duration::from_millis(500);

/// 错误响应后最多丢弃的请求字节数
const LINGER_MAX_BYTES: usize = 64 * 1024;

/// 每个连接处理任务共享的只读上下文
#[derive(Debug, Clone)]
pub struct ProxyContext {
    pub config: Arc<ProxyConfig>,
    pub allowlist: Arc<Allowlist>,
    pub stats: ProxyStats,
}

impl ProxyContext {
    /// 从配置创建上下文
    pub fn new(config: ProxyConfig) -> Result<Self> {
        Self::with_stats(config, ProxyStats::new())
    }

    /// 使用外部传入的统计计数器创建上下文
    pub fn with_stats(config: ProxyConfig, stats: ProxyStats) -> Result<Self> {
        let allowlist = config.allowlist()?;
        Ok(Self {
            config: Arc::new(config),
            allowlist: Arc::new(allowlist),
            stats,
        })
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            buffer_size: self.config.read_buffer_size,
            idle_timeout: self.config.idle_timeout(),
        }
    }
}

/// 处理一个已接受的客户端连接
pub async fn handle_connection<S>(mut stream: S, peer: IpAddr, ctx: ProxyContext)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _guard = ctx.stats.connection_started();

    // 拒绝的连接不写任何字节，直接关闭
    if !ctx.allowlist.is_allowed(peer) {
        warn!("Rejected connection from {} (not in allowlist)", peer);
        ctx.stats.connection_denied();
        return;
    }

    debug!("Accepted connection from {}", peer);

    if let Err(e) = serve(&mut stream, &ctx).await {
        match e.status() {
            Some(status) => {
                if e.is_upstream() {
                    warn!("{}", e);
                    ctx.stats.upstream_error();
                } else {
                    warn!("Rejecting request: {}", e);
                    ctx.stats.client_error();
                }
                write_status(&mut stream, status).await;
                linger_close(&mut stream).await;
            }
            None => debug!("Connection closed: {}", e),
        }
    }
}

async fn serve<S>(stream: &mut S, ctx: &ProxyContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match read_request(
        stream,
        ctx.config.read_buffer_size,
        ctx.config.header_read_timeout(),
    )
    .await?
    {
        Some(request) => request,
        None => {
            debug!("Client closed the connection before sending a request");
            return Ok(());
        }
    };

    debug!("Request line: {}", request.request_line());

    let report = match &request.method {
        Method::Connect => tunnel::handle_connect(stream, &request, ctx).await?,
        Method::Other(method) => return Err(ProxyError::UnsupportedMethod(method.clone())),
        _ => forward::handle_forward(stream, &request, ctx).await?,
    };

    log_report(&report);
    Ok(())
}

/// 发送 FIN 后读掉客户端未读完的数据再关闭
///
/// 接收缓冲区里留有数据时直接关闭会发出 RST，客户端可能因此丢弃已收到的响应
async fn linger_close<S>(stream: &mut S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = stream.shutdown().await {
        debug!("Failed to shut down client stream: {}", e);
        return;
    }

    let mut buf = [0u8; 4096];
    let mut drained = 0usize;
    let _ = timeout(LINGER_TIMEOUT, async {
        while drained < LINGER_MAX_BYTES {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }
    })
    .await;
}

fn log_report(report: &RelayReport) {
    if let Some(ref e) = report.error {
        // 转发中途的错误通常只是某一端断开
        debug!("Relay ended ({}): {}", report.finished_first, e);
    }
    info!(
        "Connection closed: {} bytes sent upstream, {} bytes returned to client",
        report.client_to_upstream, report.upstream_to_client
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn context(allowed: &[&str]) -> ProxyContext {
        let config = ProxyConfig::builder()
            .bind_addr("127.0.0.1")
            .allowed_ips(allowed.iter().copied())
            .build()
            .unwrap();
        ProxyContext::new(config).unwrap()
    }

    async fn exchange(ctx: ProxyContext, peer: &str, request: &[u8]) -> Vec<u8> {
        let (mut client, server) = duplex(4096);
        let peer: IpAddr = peer.parse().unwrap();
        let handle = tokio::spawn(handle_connection(server, peer, ctx));

        // 被拒绝时服务端可能已经关闭，写入失败是预期内的
        let _ = client.write_all(request).await;
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        handle.await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_denied_client_gets_no_bytes() {
        let ctx = context(&["10.1.1.1"]);
        let stats = ctx.stats.clone();
        let response = exchange(ctx, "10.9.9.9", b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        assert!(response.is_empty());
        assert_eq!(stats.snapshot().denied_connections, 1);
        assert_eq!(stats.snapshot().active_connections, 0);
    }

    #[tokio::test]
    async fn test_unsupported_method_gets_405() {
        let ctx = context(&[]);
        let response = exchange(ctx, "127.0.0.1", b"PATCH /x HTTP/1.1\r\nHost: a\r\n\r\n").await;
        assert_eq!(response, b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");
    }

    #[tokio::test]
    async fn test_single_token_gets_400() {
        let ctx = context(&[]);
        let stats = ctx.stats.clone();
        let response = exchange(ctx, "127.0.0.1", b"GET\r\n\r\n").await;
        assert_eq!(response, b"HTTP/1.1 400 Bad Request\r\n\r\n");
        assert_eq!(stats.snapshot().client_errors, 1);
    }

    #[tokio::test]
    async fn test_error_reply_survives_unread_request_bytes() {
        let config = ProxyConfig::builder()
            .bind_addr("127.0.0.1")
            .read_buffer_size(32)
            .build()
            .unwrap();
        let ctx = ProxyContext::new(config).unwrap();

        let mut request = b"BREW /pot HTTP/1.1\r\nHost: a\r\n".to_vec();
        request.extend_from_slice(&[b'x'; 2000]);

        let (mut client, server) = duplex(8192);
        let handle = tokio::spawn(handle_connection(
            server,
            "127.0.0.1".parse().unwrap(),
            ctx,
        ));
        client.write_all(&request).await.unwrap();

        // 不关闭写方向也能读到完整响应和 EOF
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_without_port_gets_400() {
        let ctx = context(&[]);
        let response = exchange(ctx, "127.0.0.1", b"CONNECT example.com HTTP/1.1\r\n\r\n").await;
        assert_eq!(response, b"HTTP/1.1 400 Bad Request\r\n\r\n");
    }

    #[tokio::test]
    async fn test_missing_host_gets_400() {
        let ctx = context(&[]);
        let response = exchange(ctx, "127.0.0.1", b"GET /index.html HTTP/1.1\r\n\r\n").await;
        assert_eq!(response, b"HTTP/1.1 400 Bad Request\r\n\r\n");
    }

    #[tokio::test]
    async fn test_silent_close_on_empty_connection() {
        let ctx = context(&[]);
        let (client, server) = duplex(64);
        let handle = tokio::spawn(handle_connection(
            server,
            "127.0.0.1".parse().unwrap(),
            ctx.clone(),
        ));
        drop(client);
        handle.await.unwrap();
        let snapshot = ctx.stats.snapshot();
        assert_eq!(snapshot.client_errors, 0);
        assert_eq!(snapshot.active_connections, 0);
    }
}
