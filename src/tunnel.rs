/// CONNECT 隧道
///
/// 连接 `host:port`，回复 `200 Connection Established`，之后不再解析任何数据，
/// 只在客户端与上游之间原样转发（可承载 TLS 或任何其他协议）
use crate::error::{ProxyError, Result};
use crate::handler::ProxyContext;
use crate::relay::{relay_with_stats, RelayReport};
use crate::request::{HostPort, ParsedRequest};
use crate::response::CONNECTION_ESTABLISHED;
use crate::upstream::{self, Target};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::info;

/// 解析 CONNECT 目标（必须包含端口）
pub fn parse_connect_target(target: &str) -> Result<Target> {
    if !target.contains(':') {
        return Err(ProxyError::bad_target(format!(
            "CONNECT target without port: {}",
            target
        )));
    }

    let host_port = HostPort::parse(target)?;
    let port = host_port.port.ok_or_else(|| {
        ProxyError::bad_target(format!("CONNECT target without port: {}", target))
    })?;
    if host_port.host.is_empty() {
        return Err(ProxyError::bad_target(format!(
            "CONNECT target without host: {}",
            target
        )));
    }

    Ok(Target::new(host_port.host, port))
}

/// 处理 CONNECT 请求
pub async fn handle_connect<S>(
    client: &mut S,
    request: &ParsedRequest,
    ctx: &ProxyContext,
) -> Result<RelayReport>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = parse_connect_target(&request.target)?;
    info!("CONNECT {}", target);

    let mut upstream = upstream::connect(&target, ctx.config.connect_timeout()).await?;

    client.write_all(CONNECTION_ESTABLISHED).await?;
    client.flush().await?;
    ctx.stats.tunnel_established();

    // 客户端可能在 CONNECT 头之后立即发送了数据（例如 TLS ClientHello）
    let early = request.trailing_bytes();
    if !early.is_empty() {
        upstream.write_all(early).await.map_err(ProxyError::Relay)?;
        ctx.stats.add_bytes_to_upstream(early.len() as u64);
    }

    let report = relay_with_stats(client, &mut upstream, &ctx.relay_options(), &ctx.stats).await;
    Ok(report)
}
