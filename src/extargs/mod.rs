//! Extended CNI arguments carried in a pod annotation.
//!
//! The `common` object is handed to IPAM as raw JSON per key; nested values
//! are never re-encoded.

use ipnetwork::IpNetwork;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Pod annotation holding the extended arguments document
pub const EXTENDED_CNI_ARGS_ANNOTATION: &str = "k8s.v1.cni.galaxy.io/args";

#[derive(Debug, thiserror::Error)]
pub enum ExtArgsError {
    #[error("failed to unmarshal {annotation} value {value:?}: {source}")]
    Decode {
        annotation: &'static str,
        value: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid ip range {0:?}")]
    InvalidRange(String),

    #[error("invalid ipinfos {value:?}: {source}")]
    IpInfos {
        value: String,
        #[source]
        source: serde_json::Error,
    },
}

fn decode<'a, T: Deserialize<'a>>(value: &'a str) -> Result<T, ExtArgsError> {
    serde_json::from_str(value).map_err(|source| ExtArgsError::Decode {
        annotation: EXTENDED_CNI_ARGS_ANNOTATION,
        value: value.to_string(),
        source,
    })
}

#[derive(Debug, Deserialize)]
pub struct ExtendedCniArgs {
    /// Ordered groups of ranges; one address is picked from each group
    #[serde(default)]
    pub request_ip_range: Vec<Vec<String>>,
    /// Per-key payloads forwarded untouched
    #[serde(default)]
    pub common: HashMap<String, Box<RawValue>>,
}

impl ExtendedCniArgs {
    pub fn parse(value: &str) -> Result<Self, ExtArgsError> {
        decode(value)
    }

    /// `request_ip_range` decoded into typed ranges, group order kept
    pub fn ip_ranges(&self) -> Result<Vec<Vec<IpRange>>, ExtArgsError> {
        self.request_ip_range
            .iter()
            .map(|group| group.iter().map(|r| r.parse::<IpRange>()).collect())
            .collect()
    }
}

// Only `common` is looked at; other members may have any shape.
#[derive(Deserialize)]
struct CommonOnly {
    #[serde(default)]
    common: Option<HashMap<String, Box<RawValue>>>,
}

/// Extract the `common` payloads from a pod's annotations.
/// `Ok(None)` when the annotation is absent or empty.
pub fn parse_extended_cni_args(
    annotations: &HashMap<String, String>,
) -> Result<Option<HashMap<String, Box<RawValue>>>, ExtArgsError> {
    match annotations.get(EXTENDED_CNI_ARGS_ANNOTATION) {
        Some(value) if !value.trim().is_empty() => {
            Ok(Some(decode::<CommonOnly>(value)?.common.unwrap_or_default()))
        }
        _ => Ok(None),
    }
}

/// CNI_ARGS key under which the runtime passes the pod's assigned addresses
pub const IPINFOS_ARG: &str = "ipinfos";

/// One address assignment from the `ipinfos` payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IpInfo {
    pub ip: IpNetwork,
    #[serde(default)]
    pub vlan: u16,
    #[serde(default)]
    pub gateway: Option<std::net::IpAddr>,
}

/// Decode an `ipinfos` JSON array
pub fn parse_ipinfos(value: &str) -> Result<Vec<IpInfo>, ExtArgsError> {
    serde_json::from_str(value).map_err(|source| ExtArgsError::IpInfos {
        value: value.to_string(),
        source,
    })
}

/// Inclusive IPv4 range written `first~last`, or a single address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    pub first: Ipv4Addr,
    pub last: Ipv4Addr,
}

impl IpRange {
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.first <= ip && ip <= self.last
    }
}

impl FromStr for IpRange {
    type Err = ExtArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ExtArgsError::InvalidRange(s.to_string());
        let (first, last) = match s.split_once('~') {
            Some((a, b)) => (a.trim(), b.trim()),
            None => (s.trim(), s.trim()),
        };
        let first: Ipv4Addr = first.parse().map_err(|_| invalid())?;
        let last: Ipv4Addr = last.parse().map_err(|_| invalid())?;
        if first > last {
            return Err(invalid());
        }
        Ok(Self { first, last })
    }
}
