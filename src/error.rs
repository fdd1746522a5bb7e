/// 自定义错误类型
///
/// 每个错误变体对应代理可能直接返回给客户端的一种结果，
/// 由 `status()` 决定写回哪一个状态码（或者什么都不写）
use http::StatusCode;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// 代理的主要错误类型
#[derive(Error, Debug)]
pub enum ProxyError {
    /// 请求行无法解析
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// 不支持的 HTTP 方法
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// CONNECT 目标或 Host 端口无效
    #[error("Bad target: {0}")]
    BadTarget(String),

    /// 无法确定转发目标主机
    #[error("Cannot determine target host for '{target}'")]
    NoHost { target: String },

    /// 连接上游超时
    #[error("Connecting to {addr} timed out after {duration:?}")]
    UpstreamTimeout { addr: String, duration: Duration },

    /// 上游不可达（拒绝连接、DNS 失败、网络不可达）
    #[error("Failed to connect to {addr}: {source}")]
    UpstreamUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 转发过程中的 I/O 错误
    #[error("Relay error: {0}")]
    Relay(#[source] io::Error),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// 创建请求格式错误
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    /// 创建目标无效错误
    pub fn bad_target(msg: impl Into<String>) -> Self {
        Self::BadTarget(msg.into())
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// 创建上游超时错误
    pub fn upstream_timeout(addr: impl Into<String>, duration: Duration) -> Self {
        Self::UpstreamTimeout {
            addr: addr.into(),
            duration,
        }
    }

    /// 创建上游不可达错误
    pub fn upstream_unreachable(addr: impl Into<String>, source: io::Error) -> Self {
        Self::UpstreamUnreachable {
            addr: addr.into(),
            source,
        }
    }

    /// 需要直接写回客户端的状态码
    ///
    /// 返回 `None` 表示连接应被静默关闭
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::MalformedRequest(_) | Self::BadTarget(_) | Self::NoHost { .. } => {
                Some(StatusCode::BAD_REQUEST)
            }
            Self::UnsupportedMethod(_) => Some(StatusCode::METHOD_NOT_ALLOWED),
            Self::UpstreamTimeout { .. } => Some(StatusCode::GATEWAY_TIMEOUT),
            Self::UpstreamUnreachable { .. } => Some(StatusCode::BAD_GATEWAY),
            Self::Relay(_) | Self::ConfigError(_) | Self::Io(_) => None,
        }
    }

    /// 检查是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::UpstreamTimeout { .. })
    }

    /// 检查是否为上游连接错误（超时或不可达）
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout { .. } | Self::UpstreamUnreachable { .. }
        )
    }

    /// 检查是否为客户端请求本身的问题
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.status(),
            Some(code) if code.is_client_error()
        )
    }
}
