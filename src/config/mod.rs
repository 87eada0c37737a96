use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::DNS;

/// Host interface used as the uplink when `eni` is not configured
pub const DEFAULT_ENI: &str = "eth1";

/// Policy route table used when `routeTable` is not configured
pub const DEFAULT_ROUTE_TABLE: u32 = 1;

fn default_eni() -> String {
    DEFAULT_ENI.to_string()
}

fn default_route_table() -> u32 {
    DEFAULT_ROUTE_TABLE
}

/// `null` means unset, same as an absent key
fn route_table_or_default<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u32>::deserialize(deserializer)?.unwrap_or(DEFAULT_ROUTE_TABLE))
}

/// Network configuration for the ENI CNI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConf {
    /// CNI specification version
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    /// Name of the network
    #[serde(default)]
    pub name: String,
    /// Type of CNI plugin
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    /// Host interface pod traffic leaves through; empty means the default
    #[serde(default = "default_eni")]
    pub eni: String,
    /// Policy route table holding the ENI routes
    #[serde(
        rename = "routeTable",
        default = "default_route_table",
        deserialize_with = "route_table_or_default"
    )]
    pub route_table: u32,
    /// IPAM configuration, passed untouched to the delegate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<IpamConf>,
    /// DNS configuration, copied into the result
    #[serde(default, skip_serializing_if = "DNS::is_empty")]
    pub dns: DNS,
}

/// IPAM section: a delegate type plus whatever the delegate wants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpamConf {
    /// Type of IPAM plugin
    #[serde(rename = "type", default)]
    pub ipam_type: String,
    /// Delegate-specific parameters
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl NetConf {
    /// Parse NetConf from bytes, applying defaults
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut conf: NetConf = serde_json::from_slice(bytes)?;

        if conf.eni.is_empty() {
            conf.eni = default_eni();
        }

        Ok(conf)
    }

    /// IPAM delegate type, required wherever an address is allocated
    pub fn ipam_type(&self) -> Result<&str> {
        match &self.ipam {
            Some(ipam) if !ipam.ipam_type.is_empty() => Ok(&ipam.ipam_type),
            _ => Err(Error::Config("ipam type is required".into())),
        }
    }

    /// Create a default configuration for an ENI network
    pub fn new_default(name: &str, eni: &str, route_table: u32, ipam_type: &str) -> Self {
        Self {
            cni_version: "0.3.1".to_string(),
            name: name.to_string(),
            plugin_type: "eni-cni".to_string(),
            eni: eni.to_string(),
            route_table,
            ipam: Some(IpamConf {
                ipam_type: ipam_type.to_string(),
                params: serde_json::Map::new(),
            }),
            dns: DNS::default(),
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub const K8S_POD_NAME: &str = "K8S_POD_NAME";
pub const K8S_POD_NAMESPACE: &str = "K8S_POD_NAMESPACE";
pub const K8S_POD_INFRA_CONTAINER_ID: &str = "K8S_POD_INFRA_CONTAINER_ID";

/// Pod identity carried in CNI_ARGS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodIdentity {
    pub namespace: String,
    pub name: String,
    pub infra_container_id: String,
}

impl PodIdentity {
    /// Pull the Kubernetes keys out of parsed CNI_ARGS
    pub fn from_args(args: &HashMap<String, String>) -> Self {
        let get = |key: &str| args.get(key).cloned().unwrap_or_default();
        Self {
            namespace: get(K8S_POD_NAMESPACE),
            name: get(K8S_POD_NAME),
            infra_container_id: get(K8S_POD_INFRA_CONTAINER_ID),
        }
    }

    /// Like `from_args` but fails when pod name or namespace is missing
    pub fn require(args: &HashMap<String, String>) -> Result<Self> {
        let identity = Self::from_args(args);
        if identity.namespace.is_empty() || identity.name.is_empty() {
            return Err(Error::InvalidArgs(format!(
                "{} and {} are required in CNI_ARGS",
                K8S_POD_NAMESPACE, K8S_POD_NAME
            )));
        }
        Ok(identity)
    }

    /// `<namespace>.<name>`, the input to veth naming and lock keys
    pub fn key(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// Parse CNI_ARGS string into key-value pairs
pub fn parse_cni_args(args_str: &str) -> Result<HashMap<String, String>> {
    let mut args = HashMap::new();

    for pair in args_str.split(';').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) => {
                args.insert(key.to_string(), value.to_string());
            }
            None => {
                return Err(Error::InvalidArgs(format!("ARGS: invalid pair {:?}", pair)));
            }
        }
    }

    Ok(args)
}

/// Sizing and pacing of the key lock table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLockConfig {
    /// Number of lock slots; memory is four bytes per slot
    pub slots: usize,
    /// Sleep between acquisition attempts
    pub retry_interval: Duration,
}

impl KeyLockConfig {
    /// 8191 slots, about 32KiB
    pub const SLOTS_32K: usize = 8191;
    /// 131071 slots, about 512KiB
    pub const SLOTS_512K: usize = 131071;
    /// 524287 slots, about 2MiB
    pub const SLOTS_2M: usize = 524287;
}

impl Default for KeyLockConfig {
    fn default() -> Self {
        Self {
            slots: Self::SLOTS_2M,
            retry_interval: Duration::from_millis(10),
        }
    }
}
