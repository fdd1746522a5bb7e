/// 普通 HTTP 请求转发（GET、POST 等）
///
/// 确定目标主机后，把请求行中的目标替换为相对路径，其余字节原样发送给上游，
/// 然后双向转发直到任意一端关闭。即使 URI 是 `https://` 也以明文转发。
use crate::error::{ProxyError, Result};
use crate::handler::ProxyContext;
use crate::relay::{relay_with_stats, RelayReport};
use crate::request::ParsedRequest;
use crate::upstream::{self, Target};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

/// 解析后的转发目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub target: Target,
    /// 发送给上游的请求路径（含查询字符串）
    pub path: String,
}

/// 根据请求目标和 `Host` 头确定上游地址与路径
pub fn resolve_target(request: &ParsedRequest) -> Result<ForwardTarget> {
    let raw_target = request.target.as_str();

    if raw_target.starts_with("http://") || raw_target.starts_with("https://") {
        return resolve_absolute(raw_target);
    }

    // 相对路径，从 Host 头获取主机
    let host = request
        .host()?
        .filter(|h| !h.host.is_empty())
        .ok_or_else(|| ProxyError::NoHost {
            target: raw_target.to_string(),
        })?;

    Ok(ForwardTarget {
        target: Target::new(host.host.clone(), host.port_or(80)),
        path: raw_target.to_string(),
    })
}

fn resolve_absolute(raw_target: &str) -> Result<ForwardTarget> {
    let url = Url::parse(raw_target).map_err(|e| match e {
        url::ParseError::EmptyHost => ProxyError::NoHost {
            target: raw_target.to_string(),
        },
        other => ProxyError::bad_target(format!("invalid URL '{}': {}", raw_target, other)),
    })?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ProxyError::NoHost {
            target: raw_target.to_string(),
        })?;
    // IPv6 主机带方括号
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let default_port = if url.scheme() == "https" { 443 } else { 80 };
    let port = url.port().unwrap_or(default_port);

    let mut path = url.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    Ok(ForwardTarget {
        target: Target::new(host, port),
        path,
    })
}

/// 把请求字节中第一次出现的 `target` 替换为 `path`
///
/// 这是文本替换而不是重新序列化：请求的其余部分（方法、版本、请求头、已读到的请求体）
/// 保持逐字节不变。找不到 `target` 时原样返回。
pub fn rewrite_request(raw: &[u8], target: &[u8], path: &str) -> Vec<u8> {
    let needle = target;
    if needle.is_empty() {
        return raw.to_vec();
    }

    match raw.windows(needle.len()).position(|w| w == needle) {
        Some(pos) => {
            let mut rewritten = Vec::with_capacity(raw.len() - needle.len() + path.len());
            rewritten.extend_from_slice(&raw[..pos]);
            rewritten.extend_from_slice(path.as_bytes());
            rewritten.extend_from_slice(&raw[pos + needle.len()..]);
            rewritten
        }
        None => {
            debug!(
                "Request target {:?} not found in request bytes, forwarding unchanged",
                String::from_utf8_lossy(target)
            );
            raw.to_vec()
        }
    }
}

/// 处理普通 HTTP 请求
pub async fn handle_forward<S>(
    client: &mut S,
    request: &ParsedRequest,
    ctx: &ProxyContext,
) -> Result<RelayReport>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let resolved = resolve_target(request)?;
    info!("{} {}{}", request.method, resolved.target, resolved.path);

    let mut upstream =
        upstream::connect(&resolved.target, ctx.config.forward_connect_timeout()).await?;

    let outgoing = rewrite_request(&request.raw, request.raw_target(), &resolved.path);
    upstream
        .write_all(&outgoing)
        .await
        .map_err(|e| ProxyError::upstream_unreachable(resolved.target.to_string(), e))?;
    ctx.stats.request_forwarded();
    ctx.stats.add_bytes_to_upstream(outgoing.len() as u64);

    let report = relay_with_stats(client, &mut upstream, &ctx.relay_options(), &ctx.stats).await;
    Ok(report)
}
