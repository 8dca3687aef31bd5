//! ebbflowd — the ebbflow daemon.
//!
//! One binary, three roles:
//! - `autoscaler`: grows and shrinks the backend pool from CPU readings
//! - `balancer`: forwards traffic across the pool
//! - `standalone`: both in one process, sharing a single registry
//!
//! # Usage
//!
//! ```text
//! ebbflowd --config ebbflow.toml autoscaler
//! ebbflowd --config ebbflow.toml balancer --listen 0.0.0.0:8000
//! PROM_URL=http://prometheus:9090 ebbflowd standalone
//! ```

mod autoscaler_mode;
mod balancer_mode;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::{Notify, watch};
use tracing::{info, warn};

use ebbflow_core::EbbflowConfig;
use ebbflow_runtime::{DockerRuntime, InstanceRegistry};

const DEFAULT_CONFIG: &str = "ebbflow.toml";

#[derive(Parser)]
#[command(name = "ebbflowd", about = "ebbflow autoscaler and load balancer", version)]
struct Cli {
    /// Configuration file. Missing default file means built-in defaults.
    #[arg(long, global = true, env = "EBBFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscale controller only.
    Autoscaler,

    /// Run the load balancer only.
    Balancer {
        /// Listen address, overrides `balancer.listen`.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Run the autoscaler and the load balancer in one process.
    Standalone {
        /// Listen address, overrides `balancer.listen`.
        #[arg(long)]
        listen: Option<String>,
    },
}

/// Environment overrides applied on top of the config file.
#[derive(Args, Default)]
struct Overrides {
    #[arg(long, global = true, env = "PROM_URL")]
    prom_url: Option<String>,

    #[arg(long, global = true, env = "DOCKER_IMAGE")]
    docker_image: Option<String>,

    #[arg(long, global = true, env = "CPU_THRESHOLD")]
    cpu_threshold: Option<f64>,

    #[arg(long, global = true, env = "MIN_INSTANCES")]
    min_instances: Option<u32>,

    #[arg(long, global = true, env = "MAX_INSTANCES")]
    max_instances: Option<u32>,

    /// Seconds between autoscaler ticks.
    #[arg(long, global = true, env = "CHECK_INTERVAL")]
    check_interval: Option<u64>,
}

impl Overrides {
    fn apply(&self, config: &mut EbbflowConfig) {
        if let Some(url) = &self.prom_url {
            config.metrics.prometheus_url = url.clone();
        }
        if let Some(image) = &self.docker_image {
            config.runtime.image = image.clone();
        }
        if let Some(threshold) = self.cpu_threshold {
            config.autoscaler.cpu_threshold = threshold;
        }
        if let Some(min) = self.min_instances {
            config.autoscaler.min_instances = min;
        }
        if let Some(max) = self.max_instances {
            config.autoscaler.max_instances = max;
        }
        if let Some(secs) = self.check_interval {
            config.autoscaler.check_interval = format!("{secs}s");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = load_config(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);
    if let Command::Balancer { listen: Some(listen) } | Command::Standalone { listen: Some(listen) } =
        &cli.command
    {
        config.balancer.listen = listen.clone();
    }
    config.validate().context("invalid configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let registry = Arc::new(InstanceRegistry::new(
        DockerRuntime::new(&config.runtime),
        config.autoscaler.scale_timeout(),
    ));

    match cli.command {
        Command::Autoscaler => {
            info!("ebbflowd starting in autoscaler mode");
            autoscaler_mode::run_autoscaler(&config, registry, None, shutdown_rx).await?;
        }
        Command::Balancer { .. } => {
            info!("ebbflowd starting in balancer mode");
            balancer_mode::run_balancer(&config, registry, None, shutdown_rx).await?;
        }
        Command::Standalone { .. } => {
            info!("ebbflowd starting in standalone mode");
            // Resizes reach the routing table without waiting for its interval.
            let scaled = Arc::new(Notify::new());
            let autoscaler = tokio::spawn({
                let config = config.clone();
                let registry = Arc::clone(&registry);
                let scaled = Arc::clone(&scaled);
                let shutdown = shutdown_rx.clone();
                async move { autoscaler_mode::run_autoscaler(&config, registry, Some(scaled), shutdown).await }
            });
            if let Err(e) = balancer_mode::run_balancer(&config, registry, Some(scaled), shutdown_rx).await {
                autoscaler.abort();
                return Err(e);
            }
            match autoscaler.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "autoscaler exited with an error"),
                Err(e) => warn!(error = %e, "autoscaler task failed"),
            }
        }
    }

    info!("ebbflowd stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,ebbflowd=debug,ebbflow_autoscale=debug")
    });
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Read the config file, or fall back to defaults when the default file
/// is absent. An explicitly named file must exist.
fn load_config(path: Option<&Path>) -> anyhow::Result<EbbflowConfig> {
    match path {
        Some(path) => EbbflowConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                Ok(EbbflowConfig::from_file(default)?)
            } else {
                info!("no {DEFAULT_CONFIG} found, using defaults");
                Ok(EbbflowConfig::default())
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
