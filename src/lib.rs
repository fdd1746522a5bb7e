/// HTTP 正向代理库入口
///
/// 支持 CONNECT 隧道和普通 HTTP 请求转发，可按客户端 IP 白名单限制访问。
/// 将核心模块导出为库，方便测试和复用
pub mod allowlist;
pub mod cli;
pub mod config;
pub mod error;
pub mod forward;
pub mod handler;
pub mod rate_limiter;
pub mod relay;
pub mod request;
pub mod response;
pub mod server;
pub mod stats;
pub mod tunnel;
pub mod upstream;

// 重新导出常用类型
pub use allowlist::Allowlist;
pub use config::{AppConfig, ProxyConfig, RateLimitConfig};
pub use error::{ProxyError, Result};
pub use handler::{handle_connection, ProxyContext};
pub use rate_limiter::RateLimiter;
pub use server::{run_server, ProxyServer};
pub use stats::{ProxyStats, StatsSnapshot};
