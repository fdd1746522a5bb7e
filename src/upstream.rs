/// 上游连接
///
/// 带超时地建立到目标的 TCP 连接，并把失败归类为超时（504）或不可达（502）
use crate::error::{ProxyError, Result};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// 上游目标地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// 连接上游目标（包含 DNS 解析时间在内受 `connect_timeout` 限制）
pub async fn connect(target: &Target, connect_timeout: Duration) -> Result<TcpStream> {
    debug!("Connecting to upstream {}", target);

    let outcome = timeout(
        connect_timeout,
        TcpStream::connect((target.host.as_str(), target.port)),
    )
    .await
    .ok();
    let stream = classify_outcome(target, connect_timeout, outcome)?;

    // 降低交互式协议的延迟
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for upstream {}: {}", target, e);
    }

    Ok(stream)
}

/// 把连接结果归类为超时（504）或不可达（502）
///
/// `outcome` 为 `None` 表示整体超时（含 DNS 解析）已到期
fn classify_outcome<T>(
    target: &Target,
    connect_timeout: Duration,
    outcome: Option<io::Result<T>>,
) -> Result<T> {
    match outcome {
        Some(Ok(stream)) => Ok(stream),
        Some(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
            Err(ProxyError::upstream_timeout(target.to_string(), connect_timeout))
        }
        Some(Err(e)) => Err(ProxyError::upstream_unreachable(target.to_string(), e)),
        None => Err(ProxyError::upstream_timeout(target.to_string(), connect_timeout)),
    }
}
