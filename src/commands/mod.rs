use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::info;

use crate::config::{parse_cni_args, NetConf};
use crate::driver::IpRouteDriver;
use crate::error::Error;
use crate::ipam::DelegatedIpam;
use crate::plugin::EniPlugin;
use crate::types::{CmdArgs, ErrorDoc, SUPPORTED_VERSIONS};

/// Build command arguments from an environment lookup and stdin bytes.
/// `CNI_NETNS` may be empty for DEL.
pub fn parse_args_from<F>(command: &str, lookup: F, stdin_data: Vec<u8>) -> crate::error::Result<CmdArgs>
where
    F: Fn(&str) -> Option<String>,
{
    let require = |key: &str| {
        lookup(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::InvalidArgs(format!("{} not found in environment", key)))
    };

    let container_id = require("CNI_CONTAINERID")?;
    let ifname = require("CNI_IFNAME")?;
    let path = require("CNI_PATH")?;
    let netns = if command == "DEL" {
        lookup("CNI_NETNS").unwrap_or_default()
    } else {
        require("CNI_NETNS")?
    };

    let args_raw = lookup("CNI_ARGS").unwrap_or_default();
    let args = parse_cni_args(&args_raw)?;

    Ok(CmdArgs {
        container_id,
        netns,
        ifname,
        args_raw,
        args,
        path,
        stdin_data,
    })
}

/// Read the network configuration the runtime writes to stdin
pub fn read_stdin() -> Result<Vec<u8>> {
    let mut stdin_data = Vec::new();
    io::stdin()
        .read_to_end(&mut stdin_data)
        .context("Failed to read from stdin")?;
    Ok(stdin_data)
}

/// Parse command arguments from environment
pub fn parse_args(command: &str, stdin_data: Vec<u8>) -> Result<CmdArgs> {
    Ok(parse_args_from(command, |k| env::var(k).ok(), stdin_data)?)
}

fn plugin_for(command: &str, stdin_data: Vec<u8>) -> Result<EniPlugin> {
    let args = parse_args(command, stdin_data)?;
    let conf = NetConf::parse(&args.stdin_data)?;
    Ok(EniPlugin::new(
        conf,
        args,
        Arc::new(DelegatedIpam::new()),
        Arc::new(IpRouteDriver::default()),
    ))
}

/// Execute the add command
pub fn cmd_add(stdin_data: Vec<u8>) -> Result<()> {
    let plugin = plugin_for("ADD", stdin_data)?;
    let result = plugin.add_network()?;
    result.print(&plugin.config().cni_version)?;
    Ok(())
}

/// Execute the delete command
pub fn cmd_del(stdin_data: Vec<u8>) -> Result<()> {
    let plugin = plugin_for("DEL", stdin_data)?;
    let outcome = plugin.del_network()?;
    info!(?outcome, "DEL complete");
    Ok(())
}

/// Execute the check command
pub fn cmd_check(stdin_data: Vec<u8>) -> Result<()> {
    let plugin = plugin_for("CHECK", stdin_data)?;
    plugin.check_network()?;
    Ok(())
}

fn latest_version() -> &'static str {
    SUPPORTED_VERSIONS.last().copied().unwrap_or_default()
}

/// Supported versions document for `VERSION`
pub fn version_info() -> serde_json::Value {
    serde_json::json!({
        "cniVersion": latest_version(),
        "supportedVersions": SUPPORTED_VERSIONS,
    })
}

/// `cniVersion` declared by a configuration document, or the newest
/// supported version when it cannot be read
pub fn cni_version_of(stdin_data: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Versioned {
        #[serde(rename = "cniVersion", default)]
        cni_version: String,
    }

    serde_json::from_slice::<Versioned>(stdin_data)
        .ok()
        .map(|v| v.cni_version)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| latest_version().to_string())
}

/// A failed invocation and the version its error document is written in
#[derive(Debug)]
pub struct Failure {
    pub cni_version: String,
    pub error: anyhow::Error,
}

impl Failure {
    fn new(cni_version: impl Into<String>, error: impl Into<anyhow::Error>) -> Self {
        Self {
            cni_version: cni_version.into(),
            error: error.into(),
        }
    }

    pub fn to_error_doc(&self) -> ErrorDoc {
        ErrorDoc::new(&self.cni_version, error_code(&self.error), format!("{:#}", self.error))
    }
}

/// Main entry point for the CNI plugin
pub fn run_cni() -> std::result::Result<(), Failure> {
    let cmd = env::var("CNI_COMMAND").map_err(|_| {
        Failure::new(
            latest_version(),
            Error::InvalidArgs("CNI_COMMAND not found in environment".into()),
        )
    })?;

    if cmd == "VERSION" {
        println!("{}", version_info());
        return Ok(());
    }

    let stdin_data = read_stdin().map_err(|e| Failure::new(latest_version(), e))?;
    let cni_version = cni_version_of(&stdin_data);

    let result = match cmd.as_str() {
        "ADD" => cmd_add(stdin_data),
        "DEL" => cmd_del(stdin_data),
        "CHECK" => cmd_check(stdin_data),
        _ => Err(Error::InvalidArgs(format!("Unknown CNI command: {}", cmd)).into()),
    };
    result.map_err(|e| Failure::new(cni_version, e))
}

/// CNI error code for a failure surfaced from `run_cni`
pub fn error_code(err: &anyhow::Error) -> u32 {
    err.downcast_ref::<Error>().map(Error::code).unwrap_or(999)
}
