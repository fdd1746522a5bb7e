use anyhow::Result;

use super::{validator::ConfigValidator, ProxyConfig, RateLimitConfig};

/// ProxyConfig Builder
///
/// 未设置的字段使用 `ProxyConfig::default()` 中的默认值
#[derive(Debug, Default)]
pub struct ProxyConfigBuilder {
    config: ProxyConfig,
}

impl ProxyConfigBuilder {
    /// 创建新的 Builder
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置绑定地址
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// 设置绑定端口
    pub fn bind_port(mut self, port: u16) -> Self {
        self.config.bind_port = port;
        self
    }

    /// 添加一个允许的客户端地址（IP 或 CIDR）
    pub fn allow_ip(mut self, entry: impl Into<String>) -> Self {
        self.config.allowed_ips.push(entry.into());
        self
    }

    /// 设置允许的客户端地址列表
    pub fn allowed_ips<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_ips = entries.into_iter().map(Into::into).collect();
        self
    }

    /// 设置 CONNECT 上游连接超时
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    /// 设置普通 HTTP 转发上游连接超时
    pub fn forward_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.forward_connect_timeout_secs = secs;
        self
    }

    /// 设置首个请求读取超时
    pub fn header_read_timeout_secs(mut self, secs: u64) -> Self {
        self.config.header_read_timeout_secs = secs;
        self
    }

    /// 设置转发空闲超时
    pub fn idle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.idle_timeout_secs = Some(secs);
        self
    }

    /// 设置单次读取缓冲区大小
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// 设置最大并发连接数
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = Some(max);
        self
    }

    /// 设置新连接速率限制
    pub fn rate_limit(mut self, requests_per_second: u32, burst_size: u32) -> Self {
        self.config.rate_limit = Some(RateLimitConfig {
            requests_per_second,
            burst_size,
        });
        self
    }

    /// 设置关闭等待时间
    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_grace_secs = secs;
        self
    }

    /// 构建 ProxyConfig 并验证
    pub fn build(self) -> Result<ProxyConfig> {
        ConfigValidator::validate_proxy_config(&self.config)?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_builder_defaults() {
        let config = ProxyConfigBuilder::new().build().unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0");
        assert_eq!(config.bind_port, 8080);
        assert!(config.allowed_ips.is_empty());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ProxyConfig::builder()
            .bind_addr("127.0.0.1")
            .bind_port(0)
            .allow_ip("127.0.0.1")
            .allow_ip("10.0.0.0/8")
            .connect_timeout_secs(2)
            .idle_timeout_secs(60)
            .max_connections(16)
            .rate_limit(10, 20)
            .build()
            .unwrap();

        assert_eq!(config.listen_addr(), "127.0.0.1:0");
        assert_eq!(config.allowed_ips, vec!["127.0.0.1", "10.0.0.0/8"]);
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.max_connections, Some(16));
        assert!(config.rate_limit.is_some());
    }

    #[test]
    fn test_builder_rejects_invalid_allowlist() {
        let result = ProxyConfig::builder().allowed_ips(["300.1.1.1"]).build();
        assert!(result.is_err());
    }
}
