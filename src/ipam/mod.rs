//! IPAM delegation.
//!
//! The plugin never allocates addresses itself. It runs the IPAM plugin named
//! by `ipam.type` and hands whatever schema comes back to the adapter.

use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::adapter::{AdapterError, IpamResult};
use crate::extargs::{parse_ipinfos, ExtArgsError, IPINFOS_ARG};
use crate::types::{self, CmdArgs, ErrorDoc, IPConfig};

#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    #[error("could not find IPAM plugin {plugin:?} in {path:?}")]
    NotFound { plugin: String, path: String },

    #[error("failed to execute IPAM plugin {plugin}: {source}")]
    Spawn {
        plugin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IPAM plugin {plugin} failed with code {code}: {msg}")]
    Plugin { plugin: String, code: u32, msg: String },

    #[error("IPAM plugin {plugin} exited with {status}: {stderr}")]
    Failed {
        plugin: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error(transparent)]
    Result(#[from] AdapterError),

    #[error(transparent)]
    IpInfos(#[from] ExtArgsError),
}

pub trait Ipam: Send + Sync {
    /// Obtain an address for the container described by `args`
    fn allocate(&self, ipam_type: &str, args: &CmdArgs) -> Result<IpamResult, IpamError>;

    /// Look up the address previously handed to the container
    fn resolve(&self, ipam_type: &str, args: &CmdArgs) -> Result<IpamResult, IpamError>;
}

/// Executes the IPAM plugin found on `CNI_PATH`
#[derive(Debug, Clone, Default)]
pub struct DelegatedIpam;

impl DelegatedIpam {
    pub fn new() -> Self {
        Self
    }

    /// First executable named `plugin` in the `:`-separated search path
    pub fn find_plugin(plugin: &str, search_path: &str) -> Option<PathBuf> {
        if plugin.is_empty() || plugin.contains('/') {
            return None;
        }
        env::split_paths(search_path)
            .map(|dir| dir.join(plugin))
            .find(|candidate| candidate.is_file())
    }

    fn exec(&self, plugin: &str, command: &str, args: &CmdArgs) -> Result<IpamResult, IpamError> {
        let bin = Self::find_plugin(plugin, &args.path).ok_or_else(|| IpamError::NotFound {
            plugin: plugin.to_string(),
            path: args.path.clone(),
        })?;
        debug!(plugin = %bin.display(), command, "delegating to IPAM");

        let spawn_err = |source| IpamError::Spawn {
            plugin: plugin.to_string(),
            source,
        };
        let mut child = Command::new(&bin)
            .env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", &args.container_id)
            .env("CNI_NETNS", &args.netns)
            .env("CNI_IFNAME", &args.ifname)
            .env("CNI_ARGS", &args.args_raw)
            .env("CNI_PATH", &args.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&args.stdin_data).map_err(spawn_err)?;
        }
        let output = child.wait_with_output().map_err(spawn_err)?;

        if !output.status.success() {
            if let Ok(doc) = serde_json::from_slice::<ErrorDoc>(&output.stdout) {
                return Err(IpamError::Plugin {
                    plugin: plugin.to_string(),
                    code: doc.code,
                    msg: doc.msg,
                });
            }
            return Err(IpamError::Failed {
                plugin: plugin.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(IpamResult::from_slice(&output.stdout)?)
    }
}

/// Address already assigned to the pod, taken from the `ipinfos` entry of
/// CNI_ARGS. `Ok(None)` when the entry is absent or holds no IPv4 address.
pub fn assigned_address(args: &CmdArgs) -> Result<Option<IpamResult>, IpamError> {
    let Some(raw) = args.args.get(IPINFOS_ARG) else {
        return Ok(None);
    };
    let found = parse_ipinfos(raw)?.into_iter().find(|info| info.ip.is_ipv4());
    Ok(found.map(|info| {
        IpamResult::Current(types::Result {
            ips: vec![IPConfig {
                version: Some("4".to_string()),
                interface: None,
                address: info.ip,
                gateway: info.gateway,
            }],
            ..Default::default()
        })
    }))
}

impl Ipam for DelegatedIpam {
    fn allocate(&self, ipam_type: &str, args: &CmdArgs) -> Result<IpamResult, IpamError> {
        info!(ipam_type, container_id = %args.container_id, "allocating address");
        self.exec(ipam_type, "ADD", args)
    }

    // Without `ipinfos` the delegate is expected to return the address it
    // already holds for this container instead of handing out a new one.
    fn resolve(&self, ipam_type: &str, args: &CmdArgs) -> Result<IpamResult, IpamError> {
        if let Some(result) = assigned_address(args)? {
            debug!(container_id = %args.container_id, "address taken from {}", IPINFOS_ARG);
            return Ok(result);
        }
        info!(ipam_type, container_id = %args.container_id, "resolving allocated address");
        self.exec(ipam_type, "ADD", args)
    }
}
