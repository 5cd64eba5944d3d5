//! convoyd — the Convoy daemon.
//!
//! Single binary that assembles all Convoy subsystems:
//! - State store (redb)
//! - Instance runtime client (simulated or HTTP agent)
//! - Per-service reconcilers (rollout + scaling control loops)
//! - Health monitor + utilization poller
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! convoyd run --config convoy.toml --data-dir /var/lib/convoy
//! convoyd check --config convoy.toml
//! convoyd init --name api --image shop/api:v1
//! ```

mod daemon;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use convoy_core::ConvoyConfig;
use daemon::{RunOptions, RuntimeKind};

#[derive(Parser)]
#[command(name = "convoyd", about = "Convoy daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane: reconcilers, utilization poller, REST API.
    Run {
        /// Path to the fleet configuration.
        #[arg(long, default_value = "convoy.toml")]
        config: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/convoy")]
        data_dir: PathBuf,

        /// API listen address.
        #[arg(long, default_value = "0.0.0.0:8600")]
        listen: String,

        /// Reconcile interval per service.
        #[arg(long, default_value = "5s", value_parser = parse_duration_arg)]
        tick_interval: Duration,

        /// Utilization scrape interval.
        #[arg(long, default_value = "15s", value_parser = parse_duration_arg)]
        metric_interval: Duration,

        /// Instance runtime backend.
        #[arg(long, value_enum, default_value_t = RuntimeKind::Sim)]
        runtime: RuntimeKind,

        /// Agent address for the `http` runtime, e.g. `10.0.0.5:7070`.
        #[arg(long)]
        runtime_url: Option<String>,
    },

    /// Validate a fleet configuration and print the resolved specs.
    Check {
        /// Path to the fleet configuration.
        #[arg(long, default_value = "convoy.toml")]
        config: PathBuf,
    },

    /// Write a starter configuration for a single service.
    Init {
        /// Service name.
        #[arg(long)]
        name: String,

        /// Image reference, e.g. `registry.local/shop/api:v1`.
        #[arg(long)]
        image: String,

        /// Output path.
        #[arg(long, default_value = "convoy.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,convoyd=debug,convoy=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            listen,
            tick_interval,
            metric_interval,
            runtime,
            runtime_url,
        } => {
            daemon::run(RunOptions {
                config,
                data_dir,
                listen,
                tick_interval,
                metric_interval,
                runtime,
                runtime_url,
            })
            .await
        }
        Command::Check { config } => check(&config),
        Command::Init {
            name,
            image,
            output,
        } => init(&name, &image, &output),
    }
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    convoy_core::parse_duration(s)
        .ok_or_else(|| format!("invalid duration {s:?} (try 500ms, 5s, 1m)"))
}

/// Load and validate a configuration, printing each resolved spec.
fn check(config: &Path) -> anyhow::Result<()> {
    let specs = ConvoyConfig::from_file(config)?.build_all()?;
    for spec in &specs {
        println!(
            "{}: image={} port={} replicas={}..{} surge={} unavailable={} target={}%",
            spec.name,
            spec.image,
            spec.port,
            spec.replicas.min,
            spec.replicas.max,
            spec.limits.max_surge,
            spec.limits.max_unavailable,
            spec.target_utilization_pct,
        );
    }
    println!("{}: {} service(s) ok", config.display(), specs.len());
    Ok(())
}

/// Write a starter configuration, refusing to clobber an existing file.
fn init(name: &str, image: &str, output: &Path) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }
    let config = ConvoyConfig::scaffold(name, image);
    config.build_all()?;
    std::fs::write(output, config.to_toml_string())?;
    println!("wrote {}", output.display());
    Ok(())
}
