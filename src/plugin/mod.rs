use ipnetwork::IpNetwork;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapter::allocated_address;
use crate::config::{NetConf, PodIdentity};
use crate::driver::{Driver, VethSetup};
use crate::error::{Error, Result};
use crate::ipam::Ipam;
use crate::keylock::{KeyLock, KeyLockGuard};
use crate::netns::{NetNs, NetnsError};
use crate::types::{CmdArgs, IPConfig, Result as CniResult};
use crate::veth::VethIdentity;

/// Index of the container-side interface in the result's interface list
pub const CONTAINER_IF_INDEX: usize = 1;

/// Progress of an ADD; a failure leaves the last reached state in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddState {
    Init,
    ConfigLoaded,
    AddressAllocated,
    NamespaceAttached,
    ResultEmitted,
}

/// Progress of a DEL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelState {
    Init,
    ConfigLoaded,
    AddressResolved,
    HostRouteCleaned,
    LinkRemoved,
    Done,
}

/// How a successful DEL ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelOutcome {
    /// No namespace to enter: empty path, or the path is already gone
    NamespaceAbsent,
    LinkRemoved,
    /// The container link was already deleted by an earlier DEL
    LinkAlreadyAbsent,
}

fn advance<S: Debug + Copy>(state: &mut S, next: S) {
    debug!(from = ?*state, to = ?next, "state transition");
    *state = next;
}

/// ENI plugin implementation
pub struct EniPlugin {
    /// Network configuration
    config: NetConf,
    /// Command arguments
    args: CmdArgs,
    ipam: Arc<dyn Ipam>,
    driver: Arc<dyn Driver>,
    /// Present when running inside a process that serves concurrent requests
    lock: Option<Arc<KeyLock>>,
}

impl EniPlugin {
    /// Create a new ENI plugin
    pub fn new(config: NetConf, args: CmdArgs, ipam: Arc<dyn Ipam>, driver: Arc<dyn Driver>) -> Self {
        Self {
            config,
            args,
            ipam,
            driver,
            lock: None,
        }
    }

    /// Serialize host mutations through `lock`
    pub fn with_lock(mut self, lock: Arc<KeyLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn config(&self) -> &NetConf {
        &self.config
    }

    /// Key guarding host resources of this invocation's pod. ADD and DEL
    /// must agree on it, so pod identity is required.
    pub fn lock_key(&self) -> Result<String> {
        Ok(PodIdentity::require(&self.args.args)?.key())
    }

    /// Lock key, or `None` when no lock is configured
    fn lock_target(&self) -> Result<Option<String>> {
        match self.lock {
            Some(_) => self.lock_key().map(Some),
            None => Ok(None),
        }
    }

    fn hold_lock(&self, key: &str) -> Option<KeyLockGuard<'_>> {
        self.lock.as_ref().map(|lock| {
            let guard = lock.guard(key.as_bytes());
            debug!(key, index = guard.index(), "acquired key lock");
            guard
        })
    }

    /// Attach the pod namespace to the ENI
    pub fn add_network(&self) -> Result<CniResult> {
        let mut state = AddState::Init;
        self.attach(&mut state).inspect_err(|e| {
            warn!(state = ?state, error = %e, "ADD failed");
        })
    }

    fn attach(&self, state: &mut AddState) -> Result<CniResult> {
        let pod = PodIdentity::require(&self.args.args)?;
        let ipam_type = self.config.ipam_type()?;
        advance(state, AddState::ConfigLoaded);

        self.driver
            .check_link(&self.config.eni)
            .map_err(|source| Error::ResourceNotFound {
                eni: self.config.eni.clone(),
                source,
            })?;

        let netns = NetNs::open(&self.args.netns).map_err(|e| Error::Netns {
            path: self.args.netns.clone(),
            source: e.into(),
        })?;

        let raw = self.ipam.allocate(ipam_type, &self.args)?;
        let address = allocated_address(&raw)?;
        advance(state, AddState::AddressAllocated);
        info!(pod = %pod.key(), address = %address, "address allocated");

        let veth = VethIdentity::for_pod(&pod);
        let interfaces = {
            let _guard = self.hold_lock(&pod.key());
            self.driver
                .setup_veth(
                    &VethSetup {
                        veth: &veth,
                        container_ifname: &self.args.ifname,
                        address,
                        route_table: self.config.route_table,
                    },
                    &netns,
                )
                .map_err(Error::Setup)?
        };
        advance(state, AddState::NamespaceAttached);

        let mut result = CniResult::new(&self.config.cni_version);
        result.interfaces = interfaces;
        result.ips = vec![IPConfig {
            version: Some("4".to_string()),
            interface: Some(CONTAINER_IF_INDEX),
            address: IpNetwork::V4(address.host_route()),
            gateway: None,
        }];
        result.dns = self.config.dns.clone();
        advance(state, AddState::ResultEmitted);

        info!(pod = %pod.key(), host_veth = veth.host_name(), "attached");
        Ok(result)
    }

    /// Tear down what ADD built. Safe to repeat.
    pub fn del_network(&self) -> Result<DelOutcome> {
        let mut state = DelState::Init;
        self.detach(&mut state).inspect_err(|e| {
            warn!(state = ?state, error = %e, "DEL failed");
        })
    }

    fn detach(&self, state: &mut DelState) -> Result<DelOutcome> {
        let ipam_type = self.config.ipam_type()?;
        let lock_key = self.lock_target()?;
        advance(state, DelState::ConfigLoaded);

        let raw = self.ipam.resolve(ipam_type, &self.args)?;
        let address = allocated_address(&raw)?;
        advance(state, DelState::AddressResolved);

        let _guard = lock_key.as_deref().and_then(|key| self.hold_lock(key));

        self.driver
            .clean_host_rule(address.ip(), self.config.route_table)
            .map_err(|source| Error::RouteCleanup {
                args: self.args.args_raw.clone(),
                addr: address.ip(),
                source,
            })?;
        advance(state, DelState::HostRouteCleaned);

        // The runtime may remove the namespace before DEL runs.
        if self.args.netns.is_empty() {
            info!(container_id = %self.args.container_id, "no netns, nothing left to remove");
            advance(state, DelState::Done);
            return Ok(DelOutcome::NamespaceAbsent);
        }

        let netns = match NetNs::open(&self.args.netns) {
            Ok(netns) => netns,
            Err(NetnsError::NotFound(path)) => {
                warn!(netns = %path, "netns already gone");
                advance(state, DelState::Done);
                return Ok(DelOutcome::NamespaceAbsent);
            }
            Err(e) => {
                return Err(Error::Netns {
                    path: self.args.netns.clone(),
                    source: e.into(),
                })
            }
        };

        let outcome = match self.driver.delete_link(&netns, &self.args.ifname) {
            Ok(()) => {
                advance(state, DelState::LinkRemoved);
                DelOutcome::LinkRemoved
            }
            Err(e) if e.is_link_not_found() => {
                debug!(ifname = %self.args.ifname, "link already removed");
                DelOutcome::LinkAlreadyAbsent
            }
            Err(source) => {
                return Err(Error::LinkRemoval {
                    netns: self.args.netns.clone(),
                    ifname: self.args.ifname.clone(),
                    source,
                })
            }
        };
        advance(state, DelState::Done);
        Ok(outcome)
    }

    /// Check only confirms the configuration is usable and the ENI is present
    pub fn check_network(&self) -> Result<()> {
        self.config.ipam_type()?;
        self.driver
            .check_link(&self.config.eni)
            .map_err(|source| Error::ResourceNotFound {
                eni: self.config.eni.clone(),
                source,
            })
    }
}
