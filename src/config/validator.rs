use anyhow::{bail, Result};
use tracing::warn;

use super::{ProxyConfig, RateLimitConfig};
use crate::allowlist::Allowlist;

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证地址不为空
    pub fn validate_address(addr: &str, context: &str) -> Result<()> {
        if addr.trim().is_empty() {
            bail!("{}: address cannot be empty", context);
        }
        Ok(())
    }

    /// 验证超时时间不为 0
    pub fn validate_timeout(secs: u64, field: &str) -> Result<()> {
        if secs == 0 {
            bail!("{} must be greater than 0", field);
        }
        Ok(())
    }

    /// 验证白名单中的每一项都能解析为 IP 或 CIDR
    pub fn validate_allowed_ips(entries: &[String]) -> Result<()> {
        Allowlist::parse(entries)?;
        Ok(())
    }

    /// 验证代理配置
    pub fn validate_proxy_config(config: &ProxyConfig) -> Result<()> {
        // 验证绑定地址
        Self::validate_address(&config.bind_addr, "Proxy bind_addr")?;

        // 验证白名单
        Self::validate_allowed_ips(&config.allowed_ips)?;

        // 验证超时配置
        Self::validate_timeout(config.connect_timeout_secs, "connect_timeout_secs")?;
        Self::validate_timeout(
            config.forward_connect_timeout_secs,
            "forward_connect_timeout_secs",
        )?;
        Self::validate_timeout(config.header_read_timeout_secs, "header_read_timeout_secs")?;
        if let Some(idle) = config.idle_timeout_secs {
            Self::validate_timeout(idle, "idle_timeout_secs")?;
        }

        if config.read_buffer_size == 0 {
            bail!("read_buffer_size must be greater than 0");
        }

        if config.max_connections == Some(0) {
            bail!("max_connections must be greater than 0 when set");
        }

        // 验证速率限制配置
        if let Some(ref rate_limit) = config.rate_limit {
            Self::validate_rate_limit_config(rate_limit)?;
        }

        Ok(())
    }

    /// 验证速率限制配置
    pub fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<()> {
        if config.requests_per_second == 0 {
            bail!("rate_limit.requests_per_second must be greater than 0");
        }
        if config.burst_size == 0 {
            bail!("rate_limit.burst_size must be greater than 0");
        }
        if config.burst_size < config.requests_per_second {
            warn!(
                "rate_limit.burst_size ({}) is less than requests_per_second ({}), \
                 this may cause frequent rate limiting",
                config.burst_size, config.requests_per_second
            );
        }
        Ok(())
    }
}
