// 配置管理模块 - 使用模块化设计

mod builder;
mod validator;

// 重新导出 builder 和 validator
pub use builder::ProxyConfigBuilder;
pub use validator::ConfigValidator;

use crate::allowlist::Allowlist;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 默认 CONNECT 上游连接超时
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// 默认普通 HTTP 转发的上游连接超时
pub const DEFAULT_FORWARD_CONNECT_TIMEOUT_SECS: u64 = 30;

/// 默认首个请求读取超时（防止慢速攻击）
pub const DEFAULT_HEADER_READ_TIMEOUT_SECS: u64 = 30;

/// 默认读取缓冲区大小（首次读取和转发的单次读取）
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// 默认关闭时等待活跃连接的时间
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_forward_connect_timeout_secs() -> u64 {
    DEFAULT_FORWARD_CONNECT_TIMEOUT_SECS
}

fn default_header_read_timeout_secs() -> u64 {
    DEFAULT_HEADER_READ_TIMEOUT_SECS
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}

/// 代理服务器配置
///
/// 启动后不可变，以 `Arc` 共享给每个连接处理任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// 监听地址
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// 监听端口（0 表示由系统分配）
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    /// 允许访问的客户端 IP 或 CIDR（为空表示允许所有）
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    /// CONNECT 上游连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 普通 HTTP 转发上游连接超时（秒）
    #[serde(default = "default_forward_connect_timeout_secs")]
    pub forward_connect_timeout_secs: u64,
    /// 读取首个请求的超时（秒）
    #[serde(default = "default_header_read_timeout_secs")]
    pub header_read_timeout_secs: u64,
    /// 转发阶段的空闲超时（秒，可选，默认不限制）
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// 单次读取缓冲区大小
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// 最大并发连接数（可选，默认不限制）
    #[serde(default)]
    pub max_connections: Option<usize>,
    /// 新连接速率限制（可选）
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// 关闭时等待活跃连接结束的时间（秒）
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

/// 速率限制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 每秒允许的新连接数
    pub requests_per_second: u32,
    /// 突发容量（允许短时间内的峰值连接数）
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100,
            burst_size: 200,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: default_bind_port(),
            allowed_ips: Vec::new(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            forward_connect_timeout_secs: DEFAULT_FORWARD_CONNECT_TIMEOUT_SECS,
            header_read_timeout_secs: DEFAULT_HEADER_READ_TIMEOUT_SECS,
            idle_timeout_secs: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_connections: None,
            rate_limit: None,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

impl ProxyConfig {
    /// 创建 Builder
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::new()
    }

    /// 验证配置
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_proxy_config(self)
    }

    /// 监听地址字符串（IPv6 地址自动加方括号）
    pub fn listen_addr(&self) -> String {
        if self.bind_addr.contains(':') && !self.bind_addr.starts_with('[') {
            format!("[{}]:{}", self.bind_addr, self.bind_port)
        } else {
            format!("{}:{}", self.bind_addr, self.bind_port)
        }
    }

    /// 绑定到非本地地址且没有白名单，任何能访问到端口的人都可以使用代理
    pub fn is_exposed(&self) -> bool {
        let local = matches!(
            self.bind_addr.as_str(),
            "127.0.0.1" | "localhost" | "::1" | "[::1]"
        );
        !local && self.allowed_ips.is_empty()
    }

    /// 解析白名单
    pub fn allowlist(&self) -> crate::error::Result<Allowlist> {
        Allowlist::parse(&self.allowed_ips)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn forward_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_connect_timeout_secs)
    }

    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_secs(self.header_read_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// 配置文件顶层结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl AppConfig {
    /// 从 TOML 字符串解析并验证配置
    pub fn from_toml(content: &str) -> anyhow::Result<ProxyConfig> {
        let config: AppConfig =
            toml::from_str(content).context("Failed to parse proxy configuration")?;
        config
            .proxy
            .validate()
            .context("Proxy configuration validation failed")?;
        Ok(config.proxy)
    }

    /// 从文件加载代理配置
    pub fn load_proxy_config(path: impl AsRef<Path>) -> anyhow::Result<ProxyConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_toml(&content)
    }
}
