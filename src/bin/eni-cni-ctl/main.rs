use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::Command;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use eni_cni::config::{NetConf, DEFAULT_ENI, DEFAULT_ROUTE_TABLE};
use eni_cni::extargs::{parse_extended_cni_args, ExtendedCniArgs, EXTENDED_CNI_ARGS_ANNOTATION};
use eni_cni::veth::{host_veth_name, VETH_PREFIX};

/// Operator helper for the ENI CNI plugin
#[derive(Parser)]
#[command(name = "eni-cni-ctl", author, version, about)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the host-side veth name a pod gets
    VethName {
        /// Pod namespace
        #[arg(long)]
        namespace: String,

        /// Pod name
        #[arg(long)]
        pod: String,
    },

    /// Generate a network configuration
    Generate {
        /// Network name
        #[arg(long, default_value = "eni-network")]
        name: String,

        /// Host ENI interface
        #[arg(long, default_value = DEFAULT_ENI)]
        eni: String,

        /// Policy route table id
        #[arg(long, default_value_t = DEFAULT_ROUTE_TABLE)]
        route_table: u32,

        /// IPAM plugin type
        #[arg(long, default_value = "galaxy-ipam")]
        ipam: String,

        /// Output file path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Decode an extended-args annotation value (read from stdin when omitted)
    ExtArgs {
        value: Option<String>,

        /// Also print the decoded request_ip_range groups
        #[arg(long)]
        ranges: bool,
    },

    /// List host-side veths created by the plugin
    Status,
}

#[derive(Debug)]
struct VethStatus {
    name: String,
    state: String,
    mac: Option<String>,
}

fn get_veth_status() -> Result<Vec<VethStatus>> {
    let output = Command::new("ip")
        .args(["-j", "-d", "link", "show", "type", "veth"])
        .output()
        .context("Failed to execute ip link show command")?;

    if !output.status.success() {
        anyhow::bail!(
            "Failed to get interface status: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let interfaces: Vec<serde_json::Value> =
        serde_json::from_slice(&output.stdout).context("Failed to parse ip link output")?;

    Ok(interfaces
        .iter()
        .filter_map(|iface| {
            let name = iface.get("ifname")?.as_str()?;
            if !name.starts_with(VETH_PREFIX) {
                return None;
            }
            Some(VethStatus {
                name: name.to_string(),
                state: iface
                    .get("operstate")
                    .and_then(|v| v.as_str())
                    .unwrap_or("UNKNOWN")
                    .to_string(),
                mac: iface.get("address").and_then(|v| v.as_str()).map(str::to_string),
            })
        })
        .collect())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set default subscriber")?;

    match cli.command {
        Commands::VethName { namespace, pod } => {
            println!("{}", host_veth_name(VETH_PREFIX, &namespace, &pod));
        }

        Commands::Generate { name, eni, route_table, ipam, output } => {
            let config = NetConf::new_default(&name, &eni, route_table, &ipam);
            if let Some(path) = output {
                config.save(&path)?;
                info!(path = %path.display(), "network configuration written");
            } else {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        }

        Commands::ExtArgs { value, ranges } => {
            let value = match value {
                Some(v) => v,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let annotations = HashMap::from([(EXTENDED_CNI_ARGS_ANNOTATION.to_string(), value.clone())]);
            let common = parse_extended_cni_args(&annotations)?.unwrap_or_default();

            let mut keys: Vec<_> = common.keys().collect();
            keys.sort();
            for key in keys {
                println!("{}: {}", key, common[key].get());
            }
            if ranges {
                for (i, group) in ExtendedCniArgs::parse(&value)?.ip_ranges()?.iter().enumerate() {
                    for range in group {
                        println!("range[{}]: {} ~ {}", i, range.first, range.last);
                    }
                }
            }
        }

        Commands::Status => {
            let status = get_veth_status()?;
            if status.is_empty() {
                println!("No ENI veth interfaces found");
            } else {
                for veth in status {
                    println!(
                        "  {} state={} mac={}",
                        veth.name,
                        veth.state,
                        veth.mac.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }

    Ok(())
}
