//! replaygate CLI
//!
//! Runs an in-process cluster, validates config files and prints a sample
//! config.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use replaygate_harness::{Cluster, HarnessConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replaygate")]
#[command(about = "Quorum-gated transaction replay and submission test harness")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Toml,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a local cluster until the test finishes or the duration elapses
    Run {
        /// Config file (.toml or .json); defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Longest time to run (e.g., "30s", "5m")
        #[arg(short, long, default_value = "60s")]
        duration: humantime::Duration,

        /// Override the number of nodes (uniform weights)
        #[arg(long)]
        nodes: Option<u64>,

        /// Override the workload seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the expected-state export directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },

    /// Check a config file without running it
    ValidateConfig {
        config: PathBuf,
    },

    /// Print a sample config
    SampleConfig {
        #[arg(long, value_enum, default_value = "toml")]
        format: Format,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            duration,
            nodes,
            seed,
            export_dir,
        } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
                )
                .init();

            let mut config = match config {
                Some(path) => HarnessConfig::load(&path)?,
                None => HarnessConfig::default(),
            };
            if let Some(nodes) = nodes {
                config = config.with_nodes(nodes);
            }
            if let Some(seed) = seed {
                config = config.with_seed(seed);
            }
            if let Some(dir) = export_dir {
                config = config.with_export_dir(dir);
            }

            let cluster = Cluster::new(config)?;
            let stop = Arc::new(AtomicBool::new(false));
            let mut run = {
                let stop = stop.clone();
                tokio::task::spawn_blocking(move || cluster.run(stop))
            };

            println!("Starting cluster for up to {:?}...", *duration);
            let report = tokio::select! {
                result = &mut run => result.context("cluster task failed")??,
                _ = tokio::time::sleep(*duration) => {
                    stop.store(true, Ordering::SeqCst);
                    run.await.context("cluster task failed")??
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("Interrupted, stopping cluster...");
                    stop.store(true, Ordering::SeqCst);
                    run.await.context("cluster task failed")??
                }
            };
            report.print();
            if !report.passed() {
                bail!("run failed");
            }
        }

        Commands::ValidateConfig { config } => {
            let loaded = HarnessConfig::load(&config)?;
            loaded.validate()?;
            println!("{} is valid", config.display());
        }

        Commands::SampleConfig { format } => {
            let sample = HarnessConfig::sample();
            let text = match format {
                Format::Toml => toml::to_string_pretty(&sample)?,
                Format::Json => serde_json::to_string_pretty(&sample)?,
            };
            print!("{text}");
        }
    }

    Ok(())
}
