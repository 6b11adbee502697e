//! SQLite persistence for ParkLink station records.
//!
//! Each station persists one [`StationRecord`](parklink_core::StationRecord):
//! its completed visits, the exchange rate and the time of the last
//! exchange-rate refresh. Vehicles still parked are not persisted; a
//! restart starts with an empty lot.
//!
//! - [`Database`] - connection pool with embedded migrations
//! - [`StationRecordRepository`] - data access trait, with the SQLite
//!   implementation [`SqliteStationRecordRepository`]
//!
//! # Example
//!
//! ```no_run
//! use parklink_core::{StationId, StationRecord};
//! use parklink_storage::{Database, DatabaseConfig, SqliteStationRecordRepository, StationRecordRepository};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("parklink.db")).await?;
//! let records = SqliteStationRecordRepository::new(db.pool().clone());
//!
//! let station = StationId::new(1)?;
//! let record = records.load(station).await?.unwrap_or_default();
//! records.save(station, &record).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod repositories;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use repositories::{SqliteStationRecordRepository, StationRecordRepository};
