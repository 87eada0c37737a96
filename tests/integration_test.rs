// File: tests/integration_test.rs

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use eni_cni::adapter::{allocated_address, IpamResult};
use eni_cni::config::{parse_cni_args, NetConf};
use eni_cni::driver::{Driver, IpRouteDriver};
use eni_cni::ipam::{DelegatedIpam, Ipam, IpamError};
use eni_cni::plugin::{DelOutcome, EniPlugin};
use eni_cni::types::{self, CmdArgs, IPConfig};

// Hands out one fixed address, standing in for a real IPAM daemon
struct StaticIpam(Ipv4Addr);

impl Ipam for StaticIpam {
    fn allocate(&self, _: &str, _: &CmdArgs) -> Result<IpamResult, IpamError> {
        Ok(IpamResult::Current(types::Result {
            ips: vec![IPConfig {
                version: Some("4".to_string()),
                interface: None,
                address: ipnetwork::IpNetwork::new(self.0.into(), 32).unwrap(),
                gateway: None,
            }],
            ..Default::default()
        }))
    }

    fn resolve(&self, ipam_type: &str, args: &CmdArgs) -> Result<IpamResult, IpamError> {
        self.allocate(ipam_type, args)
    }
}

// Function to create a test netns
fn create_test_netns(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let _ = std::process::Command::new("ip")
        .args(["netns", "delete", name])
        .output();

    let output = std::process::Command::new("ip")
        .args(["netns", "add", name])
        .output()?;

    if !output.status.success() {
        return Err(format!("Failed to create netns: {}", String::from_utf8_lossy(&output.stderr)).into());
    }

    Ok(())
}

// Function to delete a test netns
fn delete_test_netns(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let output = std::process::Command::new("ip")
        .args(["netns", "delete", name])
        .output()?;

    if !output.status.success() {
        return Err(format!("Failed to delete netns: {}", String::from_utf8_lossy(&output.stderr)).into());
    }

    Ok(())
}

#[test]
fn delegated_ipam_reports_missing_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let args = CmdArgs {
        container_id: "c".to_string(),
        netns: String::new(),
        ifname: "eth0".to_string(),
        args_raw: String::new(),
        args: HashMap::new(),
        path: dir.path().to_string_lossy().into_owned(),
        stdin_data: vec![],
    };

    let err = DelegatedIpam::new().allocate("galaxy-ipam", &args).unwrap_err();
    assert!(matches!(err, IpamError::NotFound { .. }));
}

#[test]
fn delegated_ipam_resolves_from_ipinfos_without_running_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let args_raw = r#"K8S_POD_NAMESPACE=default;K8S_POD_NAME=nginx;ipinfos=[{"ip":"10.0.0.3/24","vlan":0,"gateway":"10.0.0.1"}]"#.to_string();
    let args = CmdArgs {
        container_id: "c".to_string(),
        netns: String::new(),
        ifname: "eth0".to_string(),
        args: parse_cni_args(&args_raw).unwrap(),
        args_raw,
        path: dir.path().to_string_lossy().into_owned(),
        stdin_data: vec![],
    };

    // No plugin on the search path, so reaching the delegate would fail.
    let result = DelegatedIpam::new().resolve("galaxy-ipam", &args).unwrap();
    assert_eq!(allocated_address(&result).unwrap().to_string(), "10.0.0.3");

    let mut without = args.clone();
    without.args.remove("ipinfos");
    let err = DelegatedIpam::new().resolve("galaxy-ipam", &without).unwrap_err();
    assert!(matches!(err, IpamError::NotFound { .. }));
}

#[test]
fn delegated_ipam_finds_plugin_on_search_path() -> Result<(), Box<dyn std::error::Error>> {
    let empty = tempfile::tempdir()?;
    let bin = tempfile::tempdir()?;
    std::fs::write(bin.path().join("galaxy-ipam"), b"")?;
    let search = format!("{}:{}", empty.path().display(), bin.path().display());

    assert_eq!(
        DelegatedIpam::find_plugin("galaxy-ipam", &search),
        Some(bin.path().join("galaxy-ipam"))
    );
    assert_eq!(DelegatedIpam::find_plugin("../galaxy-ipam", &search), None);
    Ok(())
}

// This test requires root privileges and a host link named by ENI_TEST_LINK
#[test]
#[ignore]
fn test_eni_cni_add_del() -> Result<(), Box<dyn std::error::Error>> {
    if !nix::unistd::geteuid().is_root() {
        println!("Skipping test_eni_cni_add_del: not running as root");
        return Ok(());
    }
    let eni = std::env::var("ENI_TEST_LINK").unwrap_or_else(|_| "lo".to_string());

    let netns_name = "test_eni_netns";
    create_test_netns(netns_name)?;
    let netns_path = format!("/var/run/netns/{}", netns_name);

    let mut conf = NetConf::new_default("test-eni", &eni, 100, "static");
    conf.cni_version = "0.3.1".to_string();

    let args_raw = "K8S_POD_NAMESPACE=test;K8S_POD_NAME=eni-it".to_string();
    let args = CmdArgs {
        container_id: "test-container".to_string(),
        netns: netns_path,
        ifname: "eth1".to_string(),
        args: parse_cni_args(&args_raw)?,
        args_raw,
        path: "/opt/cni/bin".to_string(),
        stdin_data: serde_json::to_vec(&conf)?,
    };

    let ipam: Arc<dyn Ipam> = Arc::new(StaticIpam(Ipv4Addr::new(192, 0, 2, 10)));
    let driver: Arc<dyn Driver> = Arc::new(IpRouteDriver::default());

    let plugin = EniPlugin::new(conf.clone(), args.clone(), ipam.clone(), driver.clone());
    let result = plugin.add_network()?;
    println!("CNI result: {:?}", result);

    let plugin = EniPlugin::new(conf.clone(), args.clone(), ipam.clone(), driver.clone());
    assert_eq!(plugin.del_network()?, DelOutcome::LinkRemoved);

    let plugin = EniPlugin::new(conf, args, ipam, driver);
    assert_eq!(plugin.del_network()?, DelOutcome::LinkAlreadyAbsent);

    delete_test_netns(netns_name)?;

    Ok(())
}
