/// 代理直接写回客户端的响应
///
/// 所有响应都只有状态行和一个空行，没有响应体
use http::StatusCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// CONNECT 建立成功后的响应
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// 生成状态行响应
pub fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
}

/// 写回状态响应，写入失败只记录日志（客户端可能已经断开）
pub async fn write_status<W>(stream: &mut W, status: StatusCode)
where
    W: AsyncWrite + Unpin,
{
    let response = status_line(status);
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Failed to send {} response: {}", status.as_u16(), e);
        return;
    }
    let _ = stream.flush().await;
}
