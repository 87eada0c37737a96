use serde::Deserialize;
use std::net::Ipv4Addr;
use std::process::Command;
use tracing::{debug, info};

use super::{Driver, DriverError, VethSetup};
use crate::netns::NetNs;
use crate::types::Interface;

/// Link-local next hop every pod routes through; resolved statically to the host veth
const GATEWAY: &str = "169.254.1.1";

/// Priority of `to <pod> lookup main`
const TO_POD_RULE_PRIORITY: &str = "512";

/// Priority of `from <pod> lookup <routeTable>`
const FROM_POD_RULE_PRIORITY: &str = "1536";

/// Driver backed by the iproute2 `ip` command
#[derive(Debug, Clone)]
pub struct IpRouteDriver {
    ip_bin: String,
}

impl Default for IpRouteDriver {
    fn default() -> Self {
        Self {
            ip_bin: "ip".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct IpLink {
    address: Option<String>,
}

fn is_missing(stderr: &str) -> bool {
    ["Cannot find device", "does not exist", "No such device", "No such file or directory"]
        .iter()
        .any(|m| stderr.contains(m))
}

impl IpRouteDriver {
    pub fn new(ip_bin: impl Into<String>) -> Self {
        Self { ip_bin: ip_bin.into() }
    }

    fn ip(&self, args: &[&str]) -> Result<String, DriverError> {
        let command = format!("{} {}", self.ip_bin, args.join(" "));
        debug!(%command, "running");

        let output = Command::new(&self.ip_bin)
            .args(args)
            .output()
            .map_err(|source| DriverError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DriverError::Command {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Like `ip`, but maps a missing object to `LinkNotFound(name)`
    fn ip_on_link(&self, name: &str, args: &[&str]) -> Result<String, DriverError> {
        self.ip(args).map_err(|e| match e {
            DriverError::Command { ref stderr, .. } if is_missing(stderr) => {
                DriverError::LinkNotFound(name.to_string())
            }
            other => other,
        })
    }

    /// Like `ip`, but an already-absent object counts as success
    fn ip_ignore_missing(&self, args: &[&str]) -> Result<(), DriverError> {
        match self.ip(args) {
            Ok(_) => Ok(()),
            Err(DriverError::Command { ref stderr, .. }) if is_missing(stderr) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn link_mac(&self, name: &str) -> Result<Option<String>, DriverError> {
        let out = self.ip_on_link(name, &["-j", "link", "show", "dev", name])?;
        let links: Vec<IpLink> = serde_json::from_str(&out).map_err(|e| DriverError::Output {
            command: format!("ip -j link show dev {}", name),
            reason: e.to_string(),
        })?;
        Ok(links.into_iter().next().and_then(|l| l.address))
    }

    fn install_rules(&self, dst: &str, route_table: u32) -> Result<(), DriverError> {
        let table = route_table.to_string();
        self.ip(&["rule", "add", "to", dst, "lookup", "main", "priority", TO_POD_RULE_PRIORITY])?;
        self.ip(&["rule", "add", "from", dst, "lookup", &table, "priority", FROM_POD_RULE_PRIORITY])?;
        Ok(())
    }
}

impl Driver for IpRouteDriver {
    fn check_link(&self, name: &str) -> Result<(), DriverError> {
        self.ip_on_link(name, &["link", "show", "dev", name]).map(|_| ())
    }

    fn setup_veth(&self, setup: &VethSetup<'_>, netns: &NetNs) -> Result<Vec<Interface>, DriverError> {
        let host = setup.veth.host_name();
        let peer = setup.veth.peer_name();
        let ifname = setup.container_ifname;
        let dst = setup.address.host_route().to_string();

        // A retried ADD finds the pair from the previous attempt.
        self.ip_ignore_missing(&["link", "del", "dev", host])?;

        info!(host, peer = %peer, netns = %netns.path(), "creating veth pair");
        self.ip(&["link", "add", host, "type", "veth", "peer", "name", &peer])?;
        self.ip(&["link", "set", "dev", &peer, "netns", netns.path()])?;
        self.ip(&["link", "set", "dev", host, "up"])?;
        let host_mac = self
            .link_mac(host)?
            .ok_or_else(|| DriverError::Output {
                command: format!("ip -j link show dev {}", host),
                reason: "no link-layer address".to_string(),
            })?;

        let container_mac = netns.run(|| {
            self.ip(&["link", "set", "dev", &peer, "name", ifname])?;
            self.ip(&["link", "set", "dev", ifname, "up"])?;
            self.ip(&["addr", "add", &dst, "dev", ifname])?;
            self.ip(&["route", "replace", GATEWAY, "dev", ifname, "scope", "link"])?;
            self.ip(&["route", "replace", "default", "via", GATEWAY, "dev", ifname])?;
            self.ip(&[
                "neigh", "replace", GATEWAY, "lladdr", &host_mac, "dev", ifname, "nud", "permanent",
            ])?;
            self.link_mac(ifname)
        })?;

        self.ip(&["route", "replace", &dst, "dev", host, "scope", "link"])?;
        self.clean_host_rule(setup.address.ip(), setup.route_table)?;
        self.install_rules(&dst, setup.route_table)?;

        Ok(vec![
            Interface {
                name: host.to_string(),
                mac: Some(host_mac),
                sandbox: None,
            },
            Interface {
                name: ifname.to_string(),
                mac: container_mac,
                sandbox: Some(netns.path().to_string()),
            },
        ])
    }

    fn clean_host_rule(&self, addr: Ipv4Addr, route_table: u32) -> Result<(), DriverError> {
        let dst = format!("{}/32", addr);
        let table = route_table.to_string();
        self.ip_ignore_missing(&["rule", "del", "from", &dst, "lookup", &table])?;
        self.ip_ignore_missing(&["rule", "del", "to", &dst, "lookup", "main"])?;
        Ok(())
    }

    fn delete_link(&self, netns: &NetNs, ifname: &str) -> Result<(), DriverError> {
        netns.run(|| self.ip_on_link(ifname, &["link", "del", "dev", ifname]).map(|_| ()))
    }
}
