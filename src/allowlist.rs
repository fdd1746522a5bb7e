/// 客户端来源地址白名单
///
/// 白名单为空时允许所有地址；否则只有匹配任一条目的客户端可以使用代理。
/// 条目可以是单个 IP（`54.123.45.67`）或 CIDR（`10.0.0.0/8`）。
use crate::error::{ProxyError, Result};
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    networks: Vec<IpNetwork>,
}

impl Allowlist {
    /// 允许所有地址的白名单
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// 从配置字符串解析白名单，空白条目会被忽略
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut networks = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            let network = IpNetwork::from_str(entry).map_err(|e| {
                ProxyError::config_error(format!("invalid allowlist entry '{}': {}", entry, e))
            })?;
            networks.push(network);
        }
        Ok(Self { networks })
    }

    /// 从逗号分隔的字符串解析（命令行 `--allowed-ips`）
    pub fn from_csv(csv: &str) -> Result<Self> {
        let entries: Vec<&str> = csv.split(',').collect();
        Self::parse(&entries)
    }

    /// 是否未配置任何条目（允许所有地址）
    pub fn is_open(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// 判断客户端地址是否被允许
    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        if self.networks.is_empty() {
            return true;
        }
        // 双栈监听时 IPv4 客户端会以 ::ffff:a.b.c.d 的形式出现
        let addr = addr.to_canonical();
        self.networks.iter().any(|network| network.contains(addr))
    }

    /// 条目的字符串形式（用于日志）
    pub fn entries(&self) -> Vec<String> {
        self.networks.iter().map(|n| n.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_allowlist_allows_everyone() {
        let allowlist = Allowlist::allow_all();
        assert!(allowlist.is_open());
        assert!(allowlist.is_allowed(ip("1.2.3.4")));
        assert!(allowlist.is_allowed(ip("::1")));

        let allowlist = Allowlist::parse::<&str>(&[]).unwrap();
        assert!(allowlist.is_allowed(ip("203.0.113.9")));
    }

    #[test]
    fn test_literal_ip_membership() {
        let allowlist = Allowlist::parse(&["54.123.45.67", "54.123.45.68"]).unwrap();
        assert_eq!(allowlist.len(), 2);
        assert!(allowlist.is_allowed(ip("54.123.45.67")));
        assert!(allowlist.is_allowed(ip("54.123.45.68")));
        assert!(!allowlist.is_allowed(ip("54.123.45.69")));
        assert!(!allowlist.is_allowed(ip("127.0.0.1")));
    }

    #[test]
    fn test_cidr_membership() {
        let allowlist = Allowlist::parse(&["10.0.0.0/8", "fd00::/8"]).unwrap();
        assert!(allowlist.is_allowed(ip("10.200.3.4")));
        assert!(!allowlist.is_allowed(ip("11.0.0.1")));
        assert!(allowlist.is_allowed(ip("fd12::1")));
        assert!(!allowlist.is_allowed(ip("fe80::1")));
    }

    #[test]
    fn test_ipv4_mapped_client_matches_ipv4_entry() {
        let allowlist = Allowlist::parse(&["127.0.0.1"]).unwrap();
        let mapped = IpAddr::V6(Ipv4Addr::LOCALHOST.to_ipv6_mapped());
        assert!(allowlist.is_allowed(mapped));
        assert!(!allowlist.is_allowed(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn test_from_csv_trims_and_skips_blanks() {
        let allowlist = Allowlist::from_csv(" 1.1.1.1 , ,2.2.2.2,").unwrap();
        assert_eq!(allowlist.entries(), vec!["1.1.1.1/32", "2.2.2.2/32"]);
    }

    #[test]
    fn test_invalid_entry_is_config_error() {
        let err = Allowlist::parse(&["example.com"]).unwrap_err();
        assert!(matches!(err, ProxyError::ConfigError(_)));
        assert!(err.to_string().contains("example.com"));
    }
}
