//! l3sync-agent: router reconciliation daemon.
//!
//! This daemon:
//! - Loads the device inventory and builds one reconciliation context per device
//! - Watches the desired-state document for router changes
//! - Heartbeats the control plane and reconciles every device on a fixed tick
//! - Writes a JSON status snapshot for external reporting

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use l3sync::config::{load_inventory, AgentConfig};
use l3sync::control_plane::FileControlPlane;
use l3sync::driver::DryRunDriver;
use l3sync::retry::RetryPolicy;
use l3sync::{DeviceContext, FleetCoordinator};

/// l3sync router reconciliation agent
#[derive(Parser, Debug)]
#[command(name = "l3sync-agent", version, about)]
struct Args {
    /// Desired-state document (JSON, `{"routers": [...]}`)
    #[arg(long)]
    desired_state: PathBuf,

    /// Device inventory (JSON list of devices)
    #[arg(long)]
    devices: PathBuf,

    /// Agent host name (defaults to hostname)
    #[arg(long)]
    host: Option<String>,

    /// Seconds between reconciliation ticks
    #[arg(long, default_value = "10")]
    tick_interval: u64,

    /// Seconds a tick waits for its device workers
    #[arg(long, default_value = "300")]
    tick_budget: u64,

    /// Control-plane heartbeat timeout in seconds
    #[arg(long, default_value = "6")]
    heartbeat_timeout: u64,

    /// Desired-state fetch timeout in seconds
    #[arg(long, default_value = "180")]
    fetch_timeout: u64,

    /// Device probe timeout in seconds
    #[arg(long, default_value = "5")]
    probe_timeout: u64,

    /// Driver operation timeout in seconds
    #[arg(long, default_value = "30")]
    op_timeout: u64,

    /// Attempts per resource before a deletion is abandoned
    #[arg(long, default_value = "5")]
    deletion_attempts: u32,

    /// Seconds between deletion attempts
    #[arg(long, default_value = "3")]
    deletion_backoff: u64,

    /// Write the fleet status snapshot here after every tick
    #[arg(long)]
    status_file: Option<PathBuf>,
}

impl Args {
    fn agent_config(&self, host: String) -> AgentConfig {
        AgentConfig {
            host,
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout),
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
            probe_timeout: Duration::from_secs(self.probe_timeout),
            op_timeout: Duration::from_secs(self.op_timeout),
            tick_budget: Duration::from_secs(self.tick_budget),
            deletion: RetryPolicy::new(
                self.deletion_attempts,
                Duration::from_secs(self.deletion_backoff),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "l3sync=info,l3sync_agent=info,audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let host = args.host.clone().unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let config = args.agent_config(host.clone());

    info!("Starting l3sync-agent: {}", host);
    info!("Desired state: {}", args.desired_state.display());

    let inventory = load_inventory(&args.devices)
        .with_context(|| format!("Failed to load inventory {}", args.devices.display()))?;

    let control_plane = Arc::new(FileControlPlane::new(&args.desired_state));

    let mut contexts = Vec::with_capacity(inventory.len());
    for device in &inventory {
        let interfaces = device
            .interface_map()
            .with_context(|| format!("Invalid interface map for {}", device.name))?;
        info!(
            device = %device.name,
            address = device.address.as_deref().unwrap_or("-"),
            "Managing device"
        );
        contexts.push(
            DeviceContext::new(
                device.name.clone(),
                Box::new(DryRunDriver::new(&device.name)),
                control_plane.clone(),
                config.clone(),
            )
            .with_interfaces(interfaces),
        );
    }

    let fleet = FleetCoordinator::new(control_plane.clone(), config, contexts);

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to set up SIGHUP handler")?;

    let mut ticker = tokio::time::interval(Duration::from_secs(args.tick_interval.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, requesting full resync");
                fleet.resync_requested();
            }
            _ = ticker.tick() => {
                let changes = match control_plane.poll_changes().await {
                    Ok(changes) => changes,
                    Err(e) => {
                        warn!("Failed to poll desired state: {}", e);
                        Default::default()
                    }
                };
                let report = fleet.process_tick(&changes.updated, &changes.removed).await;
                if !report.control_plane_reachable {
                    warn!("Tick skipped, control plane unreachable");
                }
                if let Some(path) = &args.status_file {
                    if let Err(e) = write_status(path, &fleet).await {
                        error!(error = %e, "Failed to write status file");
                    }
                }
            }
        }
    }

    info!("Agent stopped");
    Ok(())
}

async fn write_status(path: &Path, fleet: &FleetCoordinator) -> Result<()> {
    let status = fleet.status();
    let json = serde_json::to_vec_pretty(&status).context("Failed to encode status")?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
