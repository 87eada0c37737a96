#![allow(dead_code)]

use ipnetwork::IpNetwork;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use eni_cni::adapter::IpamResult;
use eni_cni::config::{parse_cni_args, NetConf};
use eni_cni::driver::{Driver, DriverError, VethSetup};
use eni_cni::ipam::{Ipam, IpamError};
use eni_cni::keylock::KeyLock;
use eni_cni::netns::NetNs;
use eni_cni::types::{self, legacy, CmdArgs, Interface, IPConfig};

/// Always opens; the mock driver never enters it
pub const SELF_NETNS: &str = "/proc/self/ns/net";

pub fn conf() -> NetConf {
    NetConf::parse(
        br#"{"cniVersion":"0.3.1","name":"eni","type":"eni-cni","ipam":{"type":"galaxy-ipam"},"dns":{"nameservers":["10.96.0.10"]}}"#,
    )
    .unwrap()
}

pub fn args_for(namespace: &str, pod: &str, netns: &str) -> CmdArgs {
    let args_raw = format!(
        "IgnoreUnknown=1;K8S_POD_NAMESPACE={};K8S_POD_NAME={};K8S_POD_INFRA_CONTAINER_ID=infra-{}",
        namespace, pod, pod
    );
    CmdArgs {
        container_id: format!("container-{}", pod),
        netns: netns.to_string(),
        ifname: "eth0".to_string(),
        args: parse_cni_args(&args_raw).unwrap(),
        args_raw,
        path: "/opt/cni/bin".to_string(),
        stdin_data: serde_json::to_vec(&conf()).unwrap(),
    }
}

pub struct MockIpam {
    pub address: Ipv4Addr,
    pub legacy: bool,
    pub fail: bool,
    pub allocations: AtomicUsize,
    pub resolutions: AtomicUsize,
}

impl MockIpam {
    pub fn new(address: Ipv4Addr) -> Self {
        Self {
            address,
            legacy: false,
            fail: false,
            allocations: AtomicUsize::new(0),
            resolutions: AtomicUsize::new(0),
        }
    }

    fn result(&self) -> Result<IpamResult, IpamError> {
        if self.fail {
            return Err(IpamError::Plugin {
                plugin: "galaxy-ipam".to_string(),
                code: 11,
                msg: "no free address".to_string(),
            });
        }
        let address = IpNetwork::new(self.address.into(), 24).unwrap();
        Ok(if self.legacy {
            IpamResult::Legacy(legacy::Result {
                cni_version: "0.2.0".to_string(),
                ip4: Some(legacy::IPConfig {
                    ip: address,
                    gateway: None,
                    routes: vec![],
                }),
                ..Default::default()
            })
        } else {
            IpamResult::Current(types::Result {
                cni_version: "0.3.1".to_string(),
                ips: vec![IPConfig {
                    version: Some("4".to_string()),
                    interface: None,
                    address,
                    gateway: None,
                }],
                ..Default::default()
            })
        })
    }
}

impl Ipam for MockIpam {
    fn allocate(&self, _ipam_type: &str, _args: &CmdArgs) -> Result<IpamResult, IpamError> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.result()
    }

    fn resolve(&self, _ipam_type: &str, _args: &CmdArgs) -> Result<IpamResult, IpamError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        self.result()
    }
}

#[derive(Default)]
pub struct MockDriver {
    pub missing_eni: bool,
    pub setup_fails: bool,
    pub delete_fails: bool,
    /// Container links currently present, keyed by ifname
    pub links: Mutex<HashMap<String, String>>,
    pub setups: Mutex<Vec<(String, Ipv4Addr, u32)>>,
    pub cleaned: Mutex<Vec<(Ipv4Addr, u32)>>,
    pub delete_calls: AtomicUsize,
    /// When set, setup/clean/delete assert this slot is held
    pub expect_locked: Mutex<Option<(Arc<KeyLock>, usize)>>,
    pub panic_on_setup: AtomicBool,
}

impl MockDriver {
    fn assert_locked(&self) {
        if let Some((lock, index)) = self.expect_locked.lock().unwrap().as_ref() {
            assert!(!lock.raw_try_lock(*index), "key lock not held");
        }
    }
}

impl Driver for MockDriver {
    fn check_link(&self, name: &str) -> Result<(), DriverError> {
        if self.missing_eni {
            Err(DriverError::LinkNotFound(name.to_string()))
        } else {
            Ok(())
        }
    }

    fn setup_veth(&self, setup: &VethSetup<'_>, netns: &NetNs) -> Result<Vec<Interface>, DriverError> {
        if self.panic_on_setup.load(Ordering::SeqCst) {
            panic!("driver exploded");
        }
        self.assert_locked();
        if self.setup_fails {
            return Err(DriverError::Command {
                command: "ip link add".to_string(),
                stderr: "RTNETLINK answers: Operation not permitted".to_string(),
            });
        }
        self.setups.lock().unwrap().push((
            setup.veth.host_name().to_string(),
            setup.address.ip(),
            setup.route_table,
        ));
        self.links
            .lock()
            .unwrap()
            .insert(setup.container_ifname.to_string(), netns.path().to_string());
        Ok(vec![
            Interface {
                name: setup.veth.host_name().to_string(),
                mac: Some("aa:bb:cc:dd:ee:01".to_string()),
                sandbox: None,
            },
            Interface {
                name: setup.container_ifname.to_string(),
                mac: Some("aa:bb:cc:dd:ee:02".to_string()),
                sandbox: Some(netns.path().to_string()),
            },
        ])
    }

    fn clean_host_rule(&self, addr: Ipv4Addr, route_table: u32) -> Result<(), DriverError> {
        self.assert_locked();
        self.cleaned.lock().unwrap().push((addr, route_table));
        Ok(())
    }

    fn delete_link(&self, _netns: &NetNs, ifname: &str) -> Result<(), DriverError> {
        self.assert_locked();
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.delete_fails {
            return Err(DriverError::Command {
                command: format!("ip link del dev {}", ifname),
                stderr: "RTNETLINK answers: Device or resource busy".to_string(),
            });
        }
        match self.links.lock().unwrap().remove(ifname) {
            Some(_) => Ok(()),
            None => Err(DriverError::LinkNotFound(ifname.to_string())),
        }
    }
}
