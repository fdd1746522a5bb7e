/// 双向数据转发
///
/// 两个方向并发复制字节，不做任何协议解析，支持任意二进制数据。
/// 客户端正常半关闭时把 EOF 传给上游，继续等待上游的响应；
/// 上游结束或任一方向出错时拆除整个转发，两端的写方向都会被关闭。
use crate::stats::ProxyStats;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// 转发参数
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// 单次读取的缓冲区大小
    pub buffer_size: usize,
    /// 单次读取的空闲超时（`None` 表示不限制）
    pub idle_timeout: Option<Duration>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: crate::config::DEFAULT_READ_BUFFER_SIZE,
            idle_timeout: None,
        }
    }
}

/// 数据流向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientToUpstream => f.write_str("client -> upstream"),
            Self::UpstreamToClient => f.write_str("upstream -> client"),
        }
    }
}

/// 一次转发的结果
#[derive(Debug)]
pub struct RelayReport {
    /// 客户端发往上游的字节数
    pub client_to_upstream: u64,
    /// 上游发往客户端的字节数
    pub upstream_to_client: u64,
    /// 先结束的方向
    pub finished_first: Direction,
    /// 先结束的方向上发生的错误（正常 EOF 时为 `None`）
    pub error: Option<io::Error>,
}

impl RelayReport {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// 单向复制，直到 EOF、出错或空闲超时
///
/// 读到 EOF 时关闭写方向。每次写入后立即累加计数，被取消时计数依然有效
async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    copied: &mut u64,
    options: &RelayOptions,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; options.buffer_size];

    loop {
        let n = match options.idle_timeout {
            Some(idle) => match timeout(idle, reader.read(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "Connection idle timeout",
                    ))
                }
            },
            None => reader.read(&mut buf).await?,
        };

        if n == 0 {
            writer.shutdown().await?;
            return Ok(());
        }

        writer.write_all(&buf[..n]).await?;
        *copied += n as u64;
    }
}

/// 在客户端和上游之间双向转发数据
pub async fn relay<C, U>(client: &mut C, upstream: &mut U, options: &RelayOptions) -> RelayReport
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let mut client_to_upstream = 0u64;
    let mut upstream_to_client = 0u64;

    let (finished_first, result) = {
        let outbound = copy_half(
            &mut client_read,
            &mut upstream_write,
            &mut client_to_upstream,
            options,
        );
        let inbound = copy_half(
            &mut upstream_read,
            &mut client_write,
            &mut upstream_to_client,
            options,
        );
        tokio::pin!(outbound);
        tokio::pin!(inbound);

        let first = tokio::select! {
            result = &mut outbound => (Direction::ClientToUpstream, result),
            result = &mut inbound => (Direction::UpstreamToClient, result),
        };

        match first {
            // 客户端发送完毕，上游已收到 EOF，响应仍需完整返回
            (Direction::ClientToUpstream, Ok(())) => (Direction::ClientToUpstream, inbound.await),
            other => other,
        }
    };

    let _ = upstream_write.shutdown().await;
    let _ = client_write.shutdown().await;

    RelayReport {
        client_to_upstream,
        upstream_to_client,
        finished_first,
        error: result.err(),
    }
}

/// 转发并把字节数计入统计
pub async fn relay_with_stats<C, U>(
    client: &mut C,
    upstream: &mut U,
    options: &RelayOptions,
    stats: &ProxyStats,
) -> RelayReport
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let report = relay(client, upstream, options).await;
    stats.add_bytes_to_upstream(report.client_to_upstream);
    stats.add_bytes_to_client(report.upstream_to_client);
    if report.error.is_some() {
        stats.relay_error();
    }
    report
}
