//! Station supervision for ParkLink.
//!
//! Wires station links to parking state:
//!
//! ```text
//!  StationLink ──LinkEvent──> Dispatcher ──transition──> ParkingStation
//!       ^                         │
//!       └──────── Command ────────┤
//!                                 └──schedule──> BarrierScheduler ──close──> StationLink
//! ```
//!
//! [`ParkingHub`] is the entry point for consumers: it owns the link
//! registry, the stations and the background tasks, and exposes snapshots
//! and local actions per station.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use parklink_core::StationId;
//! use parklink_network::{AnyConnector, TcpConnector, TcpConnectorConfig};
//! use parklink_supervisor::{HubConfig, ParkingHub};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = Arc::new(ParkingHub::new(HubConfig::default()));
//!
//! let station = StationId::new(1)?;
//! let connector = TcpConnector::new(station, TcpConnectorConfig::for_station(station, 5000)?);
//! hub.add_station(station, AnyConnector::Tcp(connector)).await?;
//!
//! hub.start().await;
//! let snapshot = hub.parking_system(station)?;
//! println!("{} free", snapshot.available_spaces);
//!
//! hub.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod scheduler;

pub use dispatcher::{Dispatcher, Reaction, react};
pub use error::{HubError, Result};
pub use hub::{HubConfig, ParkingHub};
pub use scheduler::BarrierScheduler;
