#![allow(dead_code)]

/// Common utilities for integration tests
use forward_proxy::{ProxyConfig, ProxyServer, ProxyStats};
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// 固定响应服务器返回的内容
pub const HELLO_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\nhello";

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Create a simple echo server for testing
pub async fn start_echo_server() -> SocketAddr {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().expect("Failed to get echo server addr");

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => break, // Connection closed
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        }
    });

    addr
}

/// 记录收到的请求头，然后返回 `HELLO_RESPONSE` 并关闭连接
///
/// 每个连接收到的字节通过 channel 发送出来
pub async fn start_recording_server() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind recording server");
    let addr = listener
        .local_addr()
        .expect("Failed to get recording server addr");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let received = read_head(&mut socket).await;
                let _ = tx.send(received);
                let _ = socket.write_all(HELLO_RESPONSE).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// 读到完整请求头后等待 `delay` 再返回 `HELLO_RESPONSE` 并关闭连接
pub async fn start_delayed_server(delay: Duration) -> SocketAddr {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind delayed server");
    let addr = listener
        .local_addr()
        .expect("Failed to get delayed server addr");

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                tokio::time::sleep(delay).await;
                let _ = socket.write_all(HELLO_RESPONSE).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// 读取直到出现 `\r\n\r\n` 或对端关闭
async fn read_head(socket: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                received.extend_from_slice(&buf[..n]);
                if received.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    received
}

/// 运行中的测试代理
pub struct TestProxy {
    pub addr: SocketAddr,
    pub stats: ProxyStats,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestProxy {
    /// 通知代理关闭并等待 `run` 返回
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let handle = self.handle.take().expect("proxy already stopped");
        timeout(Duration::from_secs(10), handle)
            .await
            .expect("proxy did not stop in time")
            .expect("proxy task panicked")
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 本地测试用的配置（监听 127.0.0.1 的随机端口）
pub fn local_config() -> forward_proxy::config::ProxyConfigBuilder {
    ProxyConfig::builder()
        .bind_addr("127.0.0.1")
        .bind_port(0)
        .shutdown_grace_secs(1)
}

/// 启动代理
pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let server = ProxyServer::bind(config)
        .await
        .expect("Failed to bind proxy");
    let addr = server.local_addr();
    let stats = server.stats();
    let (tx, rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(server.run(async {
        let _ = rx.await;
    }));

    TestProxy {
        addr,
        stats,
        shutdown: Some(tx),
        handle: Some(handle),
    }
}

/// 发送一个请求并读取代理返回的全部数据（直到连接关闭）
pub async fn send_and_read_all(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy)
        .await
        .expect("Failed to connect to proxy");
    // 被拒绝的连接可能在写入前就已关闭
    let _ = stream.write_all(request).await;

    let mut response = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match timeout(Duration::from_secs(10), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => break,
            Ok(Ok(n)) => response.extend_from_slice(&buf[..n]),
            Err(_) => panic!("timed out waiting for proxy response"),
        }
    }
    response
}
