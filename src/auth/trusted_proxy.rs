//! Trusted proxy ranges for headers set by a TLS terminating proxy

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use tracing::debug;

use crate::error::{OidcError, Result};

/// Peer addresses allowed to forward client certificate details
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    ranges: Vec<CidrRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl TrustedProxies {
    pub fn new(proxies: &[String]) -> Result<Self> {
        let ranges = proxies
            .iter()
            .map(|proxy| {
                CidrRange::parse(proxy.trim()).map_err(|reason| {
                    OidcError::config(format!("Invalid trusted proxy '{}': {}", proxy, reason))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(ranges = ranges.len(), "Trusted proxy ranges loaded");
        Ok(Self { ranges })
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether `peer` falls inside one of the configured ranges
    pub fn contains(&self, peer: &IpAddr) -> bool {
        let peer = canonical(*peer);
        self.ranges.iter().any(|range| range.contains(&peer))
    }

    pub fn ranges(&self) -> Vec<String> {
        self.ranges.iter().map(ToString::to_string).collect()
    }
}

/// IPv4-mapped IPv6 peers compare as IPv4
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

impl CidrRange {
    fn parse(cidr: &str) -> std::result::Result<Self, String> {
        let (address, prefix) = match cidr.split_once('/') {
            Some((address, prefix)) => (address, Some(prefix)),
            None => (cidr, None),
        };
        let network =
            IpAddr::from_str(address).map_err(|e| format!("invalid IP address: {}", e))?;
        let max_prefix = if network.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(prefix) => prefix
                .parse::<u8>()
                .map_err(|e| format!("invalid prefix length: {}", e))?,
            None => max_prefix,
        };
        if prefix_len > max_prefix {
            return Err(format!(
                "prefix length {} exceeds {} for this address family",
                prefix_len, max_prefix
            ));
        }
        Ok(Self {
            network,
            prefix_len,
        })
    }

    fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(network), IpAddr::V4(addr)) => self.ipv4_contains(network, *addr),
            (IpAddr::V6(network), IpAddr::V6(addr)) => self.ipv6_contains(network, *addr),
            _ => false,
        }
    }

    fn ipv4_contains(&self, network: Ipv4Addr, addr: Ipv4Addr) -> bool {
        if self.prefix_len == 0 {
            return true;
        }
        let mask = !((1u32 << (32 - self.prefix_len as u32)).wrapping_sub(1));
        (u32::from(network) & mask) == (u32::from(addr) & mask)
    }

    fn ipv6_contains(&self, network: Ipv6Addr, addr: Ipv6Addr) -> bool {
        if self.prefix_len == 0 {
            return true;
        }
        let mask = !((1u128 << (128 - self.prefix_len as u32)).wrapping_sub(1));
        (u128::from(network) & mask) == (u128::from(addr) & mask)
    }
}

impl fmt::Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(value: &str) -> IpAddr {
        value.parse().unwrap()
    }

    #[test]
    fn parses_ranges_and_single_addresses() {
        assert!(CidrRange::parse("10.0.0.0/8").is_ok());
        assert_eq!(CidrRange::parse("127.0.0.1").unwrap().prefix_len, 32);
        assert_eq!(CidrRange::parse("::1").unwrap().prefix_len, 128);
        assert!(CidrRange::parse("2001:db8::/32").is_ok());

        assert!(CidrRange::parse("proxy.internal").is_err());
        assert!(CidrRange::parse("192.168.1.0/33").is_err());
        assert!(CidrRange::parse("::1/129").is_err());
    }

    #[test]
    fn matches_peers_inside_ranges() {
        let proxies = TrustedProxies::new(&[
            "10.0.0.0/8".to_string(),
            "192.168.1.7".to_string(),
            "fd00::/8".to_string(),
        ])
        .unwrap();

        assert!(proxies.contains(&ip("10.1.2.3")));
        assert!(proxies.contains(&ip("192.168.1.7")));
        assert!(proxies.contains(&ip("fd12::1")));
        assert!(proxies.contains(&ip("::ffff:10.0.0.5")));

        assert!(!proxies.contains(&ip("192.168.1.8")));
        assert!(!proxies.contains(&ip("8.8.8.8")));
        assert!(!proxies.contains(&ip("2001:db8::1")));
    }

    #[test]
    fn invalid_entries_are_configuration_errors() {
        let error = TrustedProxies::new(&["10.0.0.0/40".to_string()]).unwrap_err();
        assert!(matches!(error, OidcError::Config { .. }));
        assert!(TrustedProxies::new(&[]).unwrap().is_empty());
    }

    #[test]
    fn ranges_display_in_cidr_form() {
        let proxies = TrustedProxies::new(&["127.0.0.1".to_string()]).unwrap();
        assert_eq!(proxies.ranges(), vec!["127.0.0.1/32".to_string()]);
    }
}
