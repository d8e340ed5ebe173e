//! Source-IP fallback trust.
//!
//! Consulted only when signature verification is inconclusive. Admission
//! via the allowlist is a degraded trust level and is recorded as such on
//! the ledger entry.

use std::net::IpAddr;

/// Known provider egress addresses.
#[derive(Debug, Default)]
pub struct IpAllowlist {
    ips: Vec<IpAddr>,
}

impl IpAllowlist {
    pub fn new(ips: Vec<IpAddr>) -> Self {
        Self { ips }
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    /// Exact-match membership. An unknown source address (`None`) is never
    /// trusted.
    pub fn is_trusted(&self, ip: Option<IpAddr>) -> bool {
        match ip {
            Some(ip) => self.ips.contains(&ip),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist() -> IpAllowlist {
        IpAllowlist::new(vec![
            "203.0.113.10".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
        ])
    }

    #[test]
    fn test_member_and_non_member() {
        let list = allowlist();
        assert!(list.is_trusted("203.0.113.10".parse().ok()));
        assert!(list.is_trusted("2001:db8::1".parse().ok()));
        assert!(!list.is_trusted("198.51.100.7".parse().ok()));
    }

    #[test]
    fn test_unknown_source_never_trusted() {
        assert!(!allowlist().is_trusted(None));
        assert!(!IpAllowlist::default().is_trusted("203.0.113.10".parse().ok()));
    }
}
