//! Deterministic host-side veth naming.

use itertools::Itertools;
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};

use crate::config::PodIdentity;

/// Prefix of every host-side veth this plugin creates
pub const VETH_PREFIX: &str = "eni";

/// Linux IFNAMSIZ minus the trailing NUL
pub const MAX_IFNAME_LEN: usize = 15;

/// Hex digits of the digest kept in the name
const HASH_LEN: usize = 11;

/// Host and temporary peer names for one pod's veth pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethIdentity {
    host: String,
}

impl VethIdentity {
    pub fn for_pod(pod: &PodIdentity) -> Self {
        Self {
            host: host_veth_name(VETH_PREFIX, &pod.namespace, &pod.name),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host
    }

    /// Name the container end carries until it is renamed inside the namespace
    pub fn peer_name(&self) -> String {
        format!("{}p", self.host)
    }
}

/// `prefix` followed by the first 11 hex digits of sha1("<namespace>.<podname>")
pub fn host_veth_name(prefix: &str, namespace: &str, podname: &str) -> String {
    let hash = digest(
        &SHA1_FOR_LEGACY_USE_ONLY,
        format!("{}.{}", namespace, podname).as_bytes(),
    );
    let hex = format!("{:02x}", hash.as_ref().iter().format(""));
    format!("{}{}", prefix, &hex[..HASH_LEN])
}
