//! Station links for ParkLink.
//!
//! Every configured station gets one [`StationLink`]: a transport (TCP
//! listener, serial port or in-memory mock), a dedicated read task that
//! turns bytes into [`Message`](parklink_protocol::Message)s, and a
//! serialized write path for [`Command`](parklink_protocol::Command)s.
//! The [`LinkRegistry`] owns all links, starts and stops them together and
//! reconnects the ones that dropped.
//!
//! ```text
//!            ┌──────────────┐   LinkEvent   ┌────────────┐
//! Station 1 ─┤ StationLink  ├──────────────>│            │
//!            └──────────────┘               │ consumer   │
//!            ┌──────────────┐   LinkEvent   │ (one task  │
//! Station 2 ─┤ StationLink  ├──────────────>│  per link) │
//!            └──────────────┘               └────────────┘
//!                   ^
//!                   │ reconnect when Disconnected
//!            ┌──────────────┐
//!            │ LinkRegistry │
//!            └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use parklink_core::{BarrierState, StationId};
//! use parklink_network::{AnyConnector, LinkConfig, LinkRegistry, TcpConnector, TcpConnectorConfig};
//! use parklink_protocol::Command;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let station = StationId::new(1)?;
//! let connector = TcpConnector::new(station, TcpConnectorConfig::for_station(station, 5000)?);
//!
//! let registry = LinkRegistry::new(LinkConfig::default());
//! let mut events = registry.register(station, AnyConnector::Tcp(connector))?;
//! registry.start_all().await;
//!
//! registry.send(station, Command::barrier(BarrierState::Open)).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![allow(async_fn_in_trait)]

pub mod error;
pub mod link;
pub mod registry;
pub mod transport;

pub use error::{Result, TransportError};
pub use link::{LinkConfig, LinkEvent, LinkState, LinkStatus, StationLink};
pub use registry::LinkRegistry;
pub use transport::mock::{MockConnector, MockStation};
pub use transport::serial::{SerialConnector, SerialConnectorConfig};
pub use transport::tcp::{TcpConnector, TcpConnectorConfig};
pub use transport::{
    AnyConnector, AnyReader, AnyWriter, Connector, FrameReader, FrameWriter, ReadOutcome, Session,
};
