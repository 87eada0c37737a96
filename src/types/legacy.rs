//! Result layout used by CNI 0.1.0 and 0.2.0: one optional IPv4 and one
//! optional IPv6 configuration, no interface list.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use super::{Route, DNS};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Result {
    #[serde(rename = "cniVersion", default, skip_serializing_if = "String::is_empty")]
    pub cni_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip4: Option<IPConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip6: Option<IPConfig>,
    #[serde(default, skip_serializing_if = "DNS::is_empty")]
    pub dns: DNS,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IPConfig {
    pub ip: IpNetwork,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
}
