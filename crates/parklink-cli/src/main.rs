//! ParkLink supervisor daemon.
//!
//! Connects to every configured station, drives the parking state machines
//! from station events and persists visit history until interrupted.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parklink_parking::{format_amount, format_elapsed};
use parklink_storage::{Database, DatabaseConfig, SqliteStationRecordRepository};
use parklink_supervisor::ParkingHub;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, TransportKind};

/// Command line arguments; flags override the configuration file.
#[derive(Parser, Debug)]
#[command(name = "parklink")]
#[command(about = "Parking station link manager", version)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Station transport
    #[arg(short, long, value_enum)]
    transport: Option<TransportKind>,

    /// Base TCP port; station N listens on base + N
    #[arg(long)]
    base_port: Option<u16>,

    /// SQLite database file
    #[arg(long)]
    database: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)
                .with_context(|| format!("Failed to load config '{}'", path.display()))?,
            None => AppConfig::default(),
        };

        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(base_port) = self.base_port {
            config.base_port = base_port;
        }
        if let Some(database) = self.database {
            config.database_path = database;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;
    init_tracing(&config.log_level);

    let db = Database::new(DatabaseConfig::new(config.database_path.clone()))
        .await
        .with_context(|| format!("Failed to open database '{}'", config.database_path))?;
    let repository = SqliteStationRecordRepository::new(db.pool().clone());

    let hub = Arc::new(ParkingHub::new(config.hub_config()).with_storage(repository));
    for entry in &config.stations {
        let (station_id, connector) = config.connector_for(entry)?;
        hub.add_station(station_id, connector)
            .await
            .with_context(|| format!("Failed to add station {}", station_id))?;
    }

    let connected = hub.start().await;
    info!(
        transport = ?config.transport,
        stations = config.stations.len(),
        connected,
        "ParkLink running, press Ctrl+C to stop"
    );

    let status = (config.status_interval_secs > 0).then(|| {
        tokio::spawn(log_status(
            Arc::clone(&hub),
            Duration::from_secs(config.status_interval_secs),
        ))
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown requested");

    if let Some(status) = status {
        status.abort();
    }
    let shutdown = hub.shutdown().await;
    db.close().await;
    shutdown.context("Failed to save station records")?;

    Ok(())
}

/// Periodic one-line summary per station.
async fn log_status(hub: Arc<ParkingHub>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let links = hub.link_statuses();
        for station_id in hub.station_ids() {
            let snapshot = match hub.parking_system(station_id) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(station_id = %station_id, error = %e, "Status unavailable");
                    continue;
                }
            };
            let uptime = links
                .get(&station_id)
                .and_then(|link| link.uptime)
                .map(|uptime| format_elapsed(uptime.num_seconds().max(0).unsigned_abs()))
                .unwrap_or_else(|| "-".to_string());

            info!(
                station_id = %station_id,
                connected = hub.connection_status(station_id),
                uptime = %uptime,
                available = snapshot.available_spaces,
                total = snapshot.total_spaces,
                barrier = %snapshot.barrier_state,
                vehicles = snapshot.stats.total_vehicles,
                revenue = %format_amount(snapshot.stats.total_fee),
                revenue_usd = %format!("{:.2}", snapshot.stats.total_fee_converted),
                "Station status"
            );
        }
    }
}
