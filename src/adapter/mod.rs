//! Normalizes IPAM results of either schema into the single address the
//! plugin routes to. Nothing outside this module and the IPAM layer sees the
//! schema variants.

use ipnetwork::{IpNetwork, Ipv4Network};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use crate::types::{self, is_legacy_version, legacy};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("failed to decode IPAM result: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IPAM result carries no IPv4 address")]
    NoIpv4Address,
}

/// IPAM result in whichever schema the delegate produced
#[derive(Debug, Clone, PartialEq)]
pub enum IpamResult {
    Legacy(legacy::Result),
    Current(types::Result),
}

impl IpamResult {
    /// Decode a delegate's stdout, picking the schema by its `cniVersion`
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AdapterError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let version = value
            .get("cniVersion")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        if is_legacy_version(version) {
            Ok(IpamResult::Legacy(serde_json::from_value(value)?))
        } else {
            Ok(IpamResult::Current(serde_json::from_value(value)?))
        }
    }
}

/// Address handed out by IPAM, always routed as a /32 host route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocatedAddress {
    ip: Ipv4Addr,
}

impl AllocatedAddress {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self { ip }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// The address with a full host mask
    pub fn host_route(&self) -> Ipv4Network {
        Ipv4Network::from(self.ip)
    }
}

impl fmt::Display for AllocatedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ip.fmt(f)
    }
}

/// Extract the IPv4 address from either result schema
pub fn allocated_address(result: &IpamResult) -> Result<AllocatedAddress, AdapterError> {
    let ip = match result {
        IpamResult::Legacy(legacy) => legacy.ip4.as_ref().map(|c| c.ip.ip()),
        IpamResult::Current(current) => current
            .ips
            .iter()
            .find(|c| c.is_ipv4())
            .map(|c| c.address.ip()),
    };

    match ip {
        Some(IpAddr::V4(v4)) => Ok(AllocatedAddress::new(v4)),
        _ => Err(AdapterError::NoIpv4Address),
    }
}

/// Down-convert a current result for runtimes speaking 0.1.0/0.2.0.
/// Interfaces are dropped; routes follow the address family of their destination.
pub fn to_legacy(result: &types::Result) -> Result<legacy::Result, AdapterError> {
    let pick = |want_v4: bool| {
        result.ips.iter().find(|c| c.is_ipv4() == want_v4).map(|c| {
            let routes = result
                .routes
                .iter()
                .filter(|r| matches!(r.dst, IpNetwork::V4(_)) == want_v4)
                .cloned()
                .collect();
            legacy::IPConfig {
                ip: c.address,
                gateway: c.gateway,
                routes,
            }
        })
    };

    let ip4 = pick(true);
    if ip4.is_none() {
        return Err(AdapterError::NoIpv4Address);
    }

    Ok(legacy::Result {
        cni_version: result.cni_version.clone(),
        ip4,
        ip6: pick(false),
        dns: result.dns.clone(),
    })
}
