use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

pub mod legacy;

/// CNI versions this plugin accepts and emits
pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// Versions whose result document uses the single-IPv4 legacy layout
pub const LEGACY_VERSIONS: &[&str] = &["0.1.0", "0.2.0"];

/// Returns true if `version` selects the legacy result layout.
/// An empty version is what pre-0.3 runtimes send.
pub fn is_legacy_version(version: &str) -> bool {
    version.is_empty() || LEGACY_VERSIONS.contains(&version)
}

/// CNI command arguments
#[derive(Debug, Clone)]
pub struct CmdArgs {
    /// Container ID
    pub container_id: String,
    /// Network namespace path, empty when the runtime already tore it down
    pub netns: String,
    /// Interface name
    pub ifname: String,
    /// Raw CNI_ARGS string
    pub args_raw: String,
    /// Parsed CNI_ARGS
    pub args: HashMap<String, String>,
    /// Plugin search path
    pub path: String,
    /// Standard input data
    pub stdin_data: Vec<u8>,
}

/// Current result format (CNI 0.3.0 and later)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Result {
    /// CNI specification version
    #[serde(rename = "cniVersion", default, skip_serializing_if = "String::is_empty")]
    pub cni_version: String,
    /// Interfaces created
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    /// IP configurations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IPConfig>,
    /// Routes to configure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    /// DNS configuration
    #[serde(default, skip_serializing_if = "DNS::is_empty")]
    pub dns: DNS,
}

/// Interface information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Interface name
    pub name: String,
    /// MAC address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Sandbox path (network namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

/// IP configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IPConfig {
    /// "4" or "6"; absent in 1.0.0 documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Interface index this IP is assigned to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
    /// IP address with prefix length
    pub address: IpNetwork,
    /// Gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

impl IPConfig {
    /// True for IPv4 entries, judged by the explicit version first
    pub fn is_ipv4(&self) -> bool {
        match self.version.as_deref() {
            Some("4") => true,
            Some("6") => false,
            _ => self.address.is_ipv4(),
        }
    }
}

/// DNS configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DNS {
    /// DNS nameservers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    /// Local domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// DNS search domains
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    /// DNS options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl DNS {
    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty()
            && self.domain.is_none()
            && self.search.is_empty()
            && self.options.is_empty()
    }
}

/// Route configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination CIDR
    pub dst: IpNetwork,
    /// Gateway for this route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

/// Error document written on failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDoc {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ErrorDoc {
    pub fn new(cni_version: &str, code: u32, msg: impl Into<String>) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            code,
            msg: msg.into(),
            details: String::new(),
        }
    }
}

impl Result {
    /// Create a new empty result
    pub fn new(cni_version: &str) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            ..Default::default()
        }
    }

    /// Render the result in the layout `cni_version` asks for
    pub fn to_versioned_json(&self, cni_version: &str) -> anyhow::Result<String> {
        let json = if is_legacy_version(cni_version) {
            let mut legacy = crate::adapter::to_legacy(self)?;
            legacy.cni_version = cni_version.to_string();
            serde_json::to_string_pretty(&legacy)?
        } else {
            let mut current = self.clone();
            current.cni_version = cni_version.to_string();
            serde_json::to_string_pretty(&current)?
        };
        Ok(json)
    }

    /// Print result as JSON
    pub fn print(&self, cni_version: &str) -> anyhow::Result<()> {
        println!("{}", self.to_versioned_json(cni_version)?);
        Ok(())
    }
}
