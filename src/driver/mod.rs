//! Link, route and namespace plumbing the attach/detach flow delegates to.

use std::io;
use std::net::Ipv4Addr;

use crate::adapter::AllocatedAddress;
use crate::netns::{NetNs, NetnsError};
use crate::types::Interface;
use crate::veth::VethIdentity;

mod iproute;

pub use iproute::IpRouteDriver;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("link {0} not found")]
    LinkNotFound(String),

    #[error(transparent)]
    Netns(#[from] NetnsError),

    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("unexpected output from `{command}`: {reason}")]
    Output { command: String, reason: String },
}

impl DriverError {
    pub fn is_link_not_found(&self) -> bool {
        matches!(self, DriverError::LinkNotFound(_))
    }
}

/// Everything the driver needs to wire one pod
#[derive(Debug, Clone)]
pub struct VethSetup<'a> {
    pub veth: &'a VethIdentity,
    pub container_ifname: &'a str,
    pub address: AllocatedAddress,
    pub route_table: u32,
}

pub trait Driver: Send + Sync {
    /// Fails with [`DriverError::LinkNotFound`] when `name` is absent on the host
    fn check_link(&self, name: &str) -> Result<(), DriverError>;

    /// Create the veth pair, move the peer into `netns` as `container_ifname`,
    /// and install the host route plus policy rules. Returns the host and
    /// container interfaces, in that order.
    fn setup_veth(&self, setup: &VethSetup<'_>, netns: &NetNs) -> Result<Vec<Interface>, DriverError>;

    /// Drop the policy rules installed for `addr`; rules already gone are not an error
    fn clean_host_rule(&self, addr: Ipv4Addr, route_table: u32) -> Result<(), DriverError>;

    /// Delete `ifname` inside `netns`; [`DriverError::LinkNotFound`] if it is gone
    fn delete_link(&self, netns: &NetNs, ifname: &str) -> Result<(), DriverError>;
}
