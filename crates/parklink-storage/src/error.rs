use parklink_core::StationId;
use thiserror::Error;

/// Storage errors for persisted station records.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection or query execution failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration execution failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row cannot be turned back into a record.
    #[error("Corrupt record for station {station_id}: {reason}")]
    CorruptRecord { station_id: StationId, reason: String },

    /// A value does not fit the database column.
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    pub fn corrupt(station_id: StationId, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            station_id,
            reason: reason.into(),
        }
    }
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
