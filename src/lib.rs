//! ENI CNI plugin for Kubernetes
//!
//! This implementation attaches pod network namespaces to a host ENI:
//! - Allocates the pod address through a delegated IPAM plugin
//! - Creates a veth pair with a name derived from the pod identity
//! - Routes the pod through a policy route table bound to the ENI
//! - Tears everything down idempotently on container deletion
//!
//! Long-lived hosts serving concurrent requests go through
//! [`coordinator::Coordinator`], which serializes per-pod host mutations with
//! a [`keylock::KeyLock`].

pub mod adapter;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod extargs;
pub mod ipam;
pub mod keylock;
pub mod netns;
pub mod plugin;
pub mod types;
pub mod veth;

// Re-export commonly used items
pub use commands::{cmd_add, cmd_check, cmd_del, run_cni};
pub use config::NetConf;
pub use plugin::EniPlugin;
