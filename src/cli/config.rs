use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{AppConfig, ProxyConfig};

/// Expand path with tilde (~) and make it absolute
pub fn expand_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path);
    let path_buf = PathBuf::from(expanded.as_ref());

    if path_buf.is_absolute() {
        Ok(expanded.into_owned())
    } else {
        // Convert relative path to absolute
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&path_buf)
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))
    }
}

/// Check configuration file format
pub fn check_config(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);

    if !path.exists() {
        println!("✗ Configuration file not found: {}", config_path);
        anyhow::bail!("Configuration file not found: {}", config_path);
    }

    println!("Checking configuration file: {}\n", config_path);

    match AppConfig::load_proxy_config(path) {
        Ok(config) => {
            print_summary(&config);
            println!("\n✓ Proxy configuration is valid!");
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed!");
            println!("\nError details:");
            println!("{:#}", e);

            println!("\nCommon issues:");
            println!("  1. Check TOML syntax (brackets, quotes, commas)");
            println!("  2. Settings belong in the [proxy] section");
            println!("  3. allowed_ips entries must be IP addresses or CIDR ranges");
            println!("  4. Timeouts and read_buffer_size must be greater than 0");

            Err(e)
        }
    }
}

fn print_summary(config: &ProxyConfig) {
    println!("✓ Listen address: {}", config.listen_addr());
    if config.allowed_ips.is_empty() {
        println!("⚠ Warning: allowed_ips is empty, any client can use this proxy");
    } else {
        println!("✓ Allowed clients: {}", config.allowed_ips.join(", "));
    }
    println!("✓ CONNECT timeout: {}s", config.connect_timeout_secs);
    println!(
        "✓ Forward connect timeout: {}s",
        config.forward_connect_timeout_secs
    );
    println!("✓ Request read timeout: {}s", config.header_read_timeout_secs);
    match config.idle_timeout_secs {
        Some(secs) => println!("✓ Idle timeout: {}s", secs),
        None => println!("✓ Idle timeout: disabled"),
    }
    println!("✓ Read buffer size: {} bytes", config.read_buffer_size);
    match config.max_connections {
        Some(max) => println!("✓ Max connections: {}", max),
        None => println!("✓ Max connections: unlimited"),
    }
    if let Some(ref rate_limit) = config.rate_limit {
        println!(
            "✓ Rate limit: {}/s (burst {})",
            rate_limit.requests_per_second, rate_limit.burst_size
        );
    }
}
