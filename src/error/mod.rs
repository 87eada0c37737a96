use std::net::Ipv4Addr;

use crate::adapter::AdapterError;
use crate::driver::DriverError;
use crate::ipam::IpamError;

/// Result alias for attach/detach operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the ENI plugin
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required environment variable or CNI_ARGS entry is missing or malformed
    #[error("invalid invocation arguments: {0}")]
    InvalidArgs(String),

    /// Network configuration document could not be decoded
    #[error("failed to loading config from args: {0}")]
    Decode(#[from] serde_json::Error),

    /// Network configuration decoded but is not usable
    #[error("invalid network configuration: {0}")]
    Config(String),

    /// Configured host ENI does not exist
    #[error("failed to get link by name {eni}: {source}")]
    ResourceNotFound {
        eni: String,
        #[source]
        source: DriverError,
    },

    /// IPAM delegation failed
    #[error(transparent)]
    Allocation(#[from] IpamError),

    /// IPAM result could not be normalized
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Namespace handle could not be acquired
    #[error("failed to open netns {path:?}: {source}")]
    Netns {
        path: String,
        #[source]
        source: DriverError,
    },

    /// Driver failed to build the veth attachment
    #[error("failed to setup network: {0}")]
    Setup(#[source] DriverError),

    /// Host policy rule cleanup failed during detach
    #[error("args {args} savedIP {addr} {source}")]
    RouteCleanup {
        args: String,
        addr: Ipv4Addr,
        #[source]
        source: DriverError,
    },

    /// Container-side link removal failed during detach
    #[error("failed to delete ns {netns} link {ifname}: {source}")]
    LinkRemoval {
        netns: String,
        ifname: String,
        #[source]
        source: DriverError,
    },

    /// Dedicated worker thread could not be started or vanished without a result
    #[error("worker failed: {0}")]
    Worker(String),
}

impl Error {
    /// CNI error code written into the error document
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidArgs(_) => 4,
            Error::Decode(_) => 6,
            Error::Config(_) => 7,
            Error::ResourceNotFound { .. } => 100,
            Error::Allocation(_) | Error::Adapter(_) => 101,
            Error::Netns { .. } | Error::Setup(_) => 102,
            Error::RouteCleanup { .. } | Error::LinkRemoval { .. } => 103,
            Error::Worker(_) => 11,
        }
    }
}
