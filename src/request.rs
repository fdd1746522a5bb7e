/// 请求行解析
///
/// 只解析首次读取到的数据：请求行（方法与目标）以及非 CONNECT 请求的 `Host` 头。
/// 其余字节原样保留，由转发处理器按需使用。
use crate::error::{ProxyError, Result};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// HTTP 请求头结束标记
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 代理识别的请求方法
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Connect,
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    /// 其他任何方法（代理返回 405）
    Other(String),
}

impl Method {
    /// 大小写敏感地匹配方法名
    pub fn from_token(token: &str) -> Self {
        match token {
            "CONNECT" => Self::Connect,
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => "CONNECT",
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Other(token) => token,
        }
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect)
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `host[:port]` 形式的地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: Option<u16>,
}

impl HostPort {
    /// 在最后一个冒号处拆分主机和端口
    ///
    /// `[::1]:443` 形式的 IPv6 字面量会去掉方括号。端口存在但不是整数时返回 `BadTarget`。
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();

        if let Some(rest) = value.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| ProxyError::bad_target(format!("unterminated IPv6 literal: {}", value)))?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(parse_port(port, value)?),
                None if after.is_empty() => None,
                None => return Err(ProxyError::bad_target(format!("invalid address: {}", value))),
            };
            return Ok(Self {
                host: host.to_string(),
                port,
            });
        }

        match value.rsplit_once(':') {
            Some((host, port)) => Ok(Self {
                host: host.to_string(),
                port: Some(parse_port(port, value)?),
            }),
            None => Ok(Self {
                host: value.to_string(),
                port: None,
            }),
        }
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

fn parse_port(port: &str, value: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| ProxyError::bad_target(format!("invalid port in '{}'", value)))
}

/// 从首次读取的数据中解析出的请求
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: Method,
    /// CONNECT 时为 `host:port`，否则为绝对 URI 或相对路径
    pub target: String,
    /// 首次读取的原始字节
    pub raw: Vec<u8>,
    /// 原始字节的宽松解码（非法序列被替换）
    pub head: String,
    /// 第一个 `Host:` 头的值（仅非 CONNECT 请求）
    pub host_header: Option<String>,
}

impl ParsedRequest {
    /// 解析首次读取的数据
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        if raw.is_empty() {
            return Err(ProxyError::malformed("empty request"));
        }

        let head = String::from_utf8_lossy(&raw).into_owned();
        let mut lines = head.split("\r\n");
        let first_line = lines
            .next()
            .ok_or_else(|| ProxyError::malformed("missing request line"))?;

        let mut parts = first_line.split_whitespace();
        let (method, target) = match (parts.next(), parts.next()) {
            (Some(method), Some(target)) => (Method::from_token(method), target.to_string()),
            _ => {
                return Err(ProxyError::malformed(format!(
                    "invalid request line: {:?}",
                    first_line
                )))
            }
        };

        // 单次尽力扫描，第一个匹配的 Host 头生效
        let host_header = if method.is_connect() {
            None
        } else {
            lines.find_map(|line| {
                line.get(..5)
                    .filter(|prefix| prefix.eq_ignore_ascii_case("host:"))
                    .map(|_| line[5..].trim().to_string())
            })
        };

        Ok(Self {
            method,
            target,
            raw,
            head,
            host_header,
        })
    }

    /// 请求行（不含 CRLF）
    pub fn request_line(&self) -> &str {
        self.head.split("\r\n").next().unwrap_or_default()
    }

    /// 请求行中目标的原始字节
    ///
    /// `target` 是宽松解码后的文本，含非法 UTF-8 时与原始字节不同
    pub fn raw_target(&self) -> &[u8] {
        let line_end = self
            .raw
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(self.raw.len());
        self.raw[..line_end]
            .split(|b| b.is_ascii_whitespace())
            .filter(|token| !token.is_empty())
            .nth(1)
            .unwrap_or(self.target.as_bytes())
    }

    /// 解析 `Host` 头
    pub fn host(&self) -> Result<Option<HostPort>> {
        match self.host_header.as_deref() {
            Some(value) if !value.is_empty() => HostPort::parse(value).map(Some),
            _ => Ok(None),
        }
    }

    /// 请求头之后、已随首次读取到达的字节
    pub fn trailing_bytes(&self) -> &[u8] {
        self.raw
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
            .map(|pos| &self.raw[pos + HEAD_TERMINATOR.len()..])
            .unwrap_or_default()
    }
}

/// 从新连接读取并解析首个请求
///
/// 只执行一次读取，最多 `buffer_size` 字节。对端未发送任何数据就关闭时返回 `Ok(None)`。
pub async fn read_request<S>(
    stream: &mut S,
    buffer_size: usize,
    read_timeout: Duration,
) -> Result<Option<ParsedRequest>>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let n = timeout(read_timeout, stream.read(&mut buffer))
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no request received within {:?}", read_timeout),
            )
        })??;

    if n == 0 {
        return Ok(None);
    }

    buffer.truncate(n);
    ParsedRequest::parse(buffer).map(Some)
}
