use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "forward-proxy")]
#[command(author, version, about = "HTTP forward proxy with CONNECT tunneling", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志级别 (trace, debug, info, warn, error)，设置 RUST_LOG 时以其为准
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行代理服务器
    Run {
        /// 配置文件路径（可选，不指定时使用默认配置）
        #[arg(short, long)]
        config: Option<String>,

        /// 监听地址（覆盖配置文件）
        #[arg(long)]
        host: Option<String>,

        /// 监听端口（覆盖配置文件）
        #[arg(short, long)]
        port: Option<u16>,

        /// 允许访问的客户端 IP/CIDR，用逗号分隔（覆盖配置文件）
        #[arg(long, value_delimiter = ',', value_name = "IP,...")]
        allowed_ips: Option<Vec<String>>,

        /// 转发阶段的空闲超时（秒）
        #[arg(long, value_name = "SECS")]
        idle_timeout: Option<u64>,

        /// 最大并发连接数
        #[arg(long)]
        max_connections: Option<usize>,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,
    },
    /// 生成配置文件模板
    Template {
        /// 输出文件路径（不指定则输出到标准输出）
        #[arg(short, long)]
        output: Option<String>,
    },
}
