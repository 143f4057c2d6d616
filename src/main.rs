mod config;
mod error;
mod ipam;
mod lab;
mod models;
mod render;
mod runtime;
mod topology;
mod utils;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use error::{LabError, Result};
use lab::{GenerateRequest, GeneratedLab, LabManager};
use models::{Allocation, Ipv4Cidr, LabSpec, LabSummary};
use runtime::DockerComposeRuntime;

/// Generate and run containerized FRR spine-leaf labs
#[derive(Debug, Parser)]
#[command(name = "labforge")]
#[command(version)]
struct Cli {
    /// Directory holding generated labs and the shared address pool
    #[arg(long, value_name = "DIR")]
    labs_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Plan addresses and write FRR configs plus a compose descriptor
    Generate {
        /// Lab name (compose project and container prefix)
        #[arg(long)]
        name: String,

        #[arg(long, default_value_t = 1)]
        spines: u32,

        #[arg(long, default_value_t = 2)]
        leaves: u32,

        /// Overwrite an existing lab
        #[arg(long)]
        force: bool,

        /// Start the lab after generating it
        #[arg(long)]
        up: bool,

        /// Use this management subnet instead of carving one from the pool
        #[arg(long, value_name = "CIDR")]
        mgmt_subnet: Option<String>,

        /// FRR container image
        #[arg(long)]
        image: Option<String>,
    },

    /// Start a generated lab
    Up { lab: String },

    /// Stop a running lab
    Down {
        lab: String,

        /// Keep the lab's subnets reserved in the pool
        #[arg(long)]
        keep_addresses: bool,

        /// Delete the lab directory after stopping
        #[arg(long)]
        purge: bool,
    },

    /// Return a lab's subnets to the pool without stopping anything
    Release { lab: String },

    /// List generated labs
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show address pool allocations
    Pool {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    // Initialize tracing
    let default_filter = if cli.verbose { "labforge=debug" } else { "labforge=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let mut cfg = Config::load();
    if let Some(dir) = cli.labs_dir {
        cfg.labs_dir = dir;
    }
    if let Commands::Generate { image: Some(image), .. } = &cli.command {
        cfg.frr_image = image.clone();
    }
    tracing::debug!("Labs dir: {}", cfg.labs_dir.display());

    let runtime = DockerComposeRuntime::from_config(&cfg)?;
    let manager = LabManager::new(cfg, runtime)?;

    match cli.command {
        Commands::Generate {
            name,
            spines,
            leaves,
            force,
            up,
            mgmt_subnet,
            image: _,
        } => {
            let mgmt_subnet = mgmt_subnet
                .map(|s| {
                    s.parse::<Ipv4Cidr>()
                        .map_err(|e| LabError::invalid_subnet(s.as_str(), e))
                })
                .transpose()?;
            let req = GenerateRequest {
                spec: LabSpec::new(name, spines, leaves)?,
                force,
                mgmt_subnet,
            };
            let lab = manager.generate(&req).await?;
            print_generated(&lab);
            if up {
                manager.up(&req.spec.name).await?;
            }
        }
        Commands::Up { lab } => manager.up(&lab).await?,
        Commands::Down {
            lab,
            keep_addresses,
            purge,
        } => {
            let release = manager.config().release_on_down && !keep_addresses;
            let released = manager.down(&lab, release, purge).await?;
            if !released.is_empty() {
                println!("Released {} subnets of {}", released.len(), lab);
            }
        }
        Commands::Release { lab } => {
            let released = manager.release(&lab).await?;
            println!("Released {} subnets of {}", released.len(), lab);
        }
        Commands::List { json } => {
            let labs = manager.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&labs)?);
            } else {
                print_labs(&labs);
            }
        }
        Commands::Pool { json } => {
            let allocations = manager.allocations().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&allocations)?);
            } else {
                print_allocations(&allocations);
            }
        }
    }
    Ok(())
}

fn print_generated(lab: &GeneratedLab) {
    println!("Lab created: {} ({} files)", lab.path.display(), lab.artifacts.len());
    println!("Nodes:");
    let mgmt = lab.plan.management();
    for (node, ip) in lab.topology.nodes.iter().zip(&mgmt.addresses) {
        println!("  - {:8} {:6} {:15} AS{}", node.name, node.role.as_str(), ip, node.asn);
    }
    println!("Links:");
    for link in &lab.plan.links {
        println!("  - {:16} {}", link.link, link.subnet);
    }
}

fn print_labs(labs: &[LabSummary]) {
    if labs.is_empty() {
        println!("No labs found");
        return;
    }
    println!("{:<16} {:>6} {:>6}  {:<18} PATH", "NAME", "SPINES", "LEAVES", "MGMT");
    for l in labs {
        println!(
            "{:<16} {:>6} {:>6}  {:<18} {}",
            l.name, l.spine_count, l.leaf_count, l.mgmt_subnet, l.path
        );
    }
}

fn print_allocations(allocations: &[Allocation]) {
    if allocations.is_empty() {
        println!("No allocations");
        return;
    }
    println!("{:<16} {:<16} {:<18} ALLOCATED", "LAB", "NETWORK", "SUBNET");
    for a in allocations {
        println!(
            "{:<16} {:<16} {:<18} {}",
            a.lab,
            a.network,
            a.subnet.to_string(),
            a.allocated_at.to_rfc3339()
        );
    }
}
