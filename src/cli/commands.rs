use anyhow::{Context, Result};
use tracing::info;

use crate::config::{AppConfig, ProxyConfig};
use crate::server;

use super::config::{check_config, expand_path};
use super::template;

/// 命令行覆盖项
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub allowed_ips: Option<Vec<String>>,
    pub idle_timeout: Option<u64>,
    pub max_connections: Option<usize>,
}

impl RunOverrides {
    /// 把命令行参数应用到配置上
    pub fn apply(self, config: &mut ProxyConfig) {
        if let Some(host) = self.host {
            config.bind_addr = host;
        }
        if let Some(port) = self.port {
            config.bind_port = port;
        }
        if let Some(allowed_ips) = self.allowed_ips {
            config.allowed_ips = allowed_ips;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = Some(secs);
        }
        if let Some(max) = self.max_connections {
            config.max_connections = Some(max);
        }
    }
}

/// Execute CLI commands
pub async fn execute_command(cli: &super::Cli) -> Result<()> {
    use super::Commands;

    match &cli.command {
        Commands::Run {
            config,
            host,
            port,
            allowed_ips,
            idle_timeout,
            max_connections,
        } => {
            let overrides = RunOverrides {
                host: host.clone(),
                port: *port,
                allowed_ips: allowed_ips.clone(),
                idle_timeout: *idle_timeout,
                max_connections: *max_connections,
            };
            run_proxy(config.as_deref(), overrides).await?;
        }
        Commands::Check { config } => {
            let config_path = expand_path(config)?;
            check_config(&config_path)?;
        }
        Commands::Template { output } => {
            template::generate_config_template(output.as_deref())?;
        }
    }

    Ok(())
}

/// 加载配置并应用命令行覆盖项
pub fn load_config(config: Option<&str>, overrides: RunOverrides) -> Result<ProxyConfig> {
    let mut proxy_config = match config {
        Some(path) => {
            let config_path = expand_path(path)?;
            info!("Loading proxy configuration from: {}", config_path);
            AppConfig::load_proxy_config(&config_path)?
        }
        None => ProxyConfig::default(),
    };

    overrides.apply(&mut proxy_config);
    proxy_config
        .validate()
        .context("Invalid command line options")?;

    Ok(proxy_config)
}

/// Run forward proxy
async fn run_proxy(config: Option<&str>, overrides: RunOverrides) -> Result<()> {
    let proxy_config = load_config(config, overrides)?;
    server::run_server(proxy_config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_defaults_with_overrides() {
        let overrides = RunOverrides {
            host: Some("127.0.0.1".to_string()),
            port: Some(3128),
            allowed_ips: Some(vec!["127.0.0.1".to_string()]),
            idle_timeout: Some(60),
            max_connections: Some(10),
        };
        let config = load_config(None, overrides).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:3128");
        assert_eq!(config.allowed_ips, vec!["127.0.0.1".to_string()]);
        assert_eq!(config.idle_timeout_secs, Some(60));
        assert_eq!(config.max_connections, Some(10));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let overrides = RunOverrides {
            allowed_ips: Some(vec!["999.1.1.1".to_string()]),
            ..Default::default()
        };
        assert!(load_config(None, overrides).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        assert!(load_config(Some("/nonexistent/proxy.toml"), RunOverrides::default()).is_err());
    }
}
