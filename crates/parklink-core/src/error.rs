use thiserror::Error;

/// Failures of a parking transition.
///
/// Every transition is all-or-nothing: when one of these is returned the
/// station state is exactly what it was before the call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("No free space available")]
    NoCapacity,

    #[error("No vehicles parked")]
    NoVehicles,

    #[error("No exit awaiting confirmation")]
    NoPendingExit,

    #[error("Invalid space {space} (station has {total} spaces)")]
    InvalidSpace { space: u8, total: u8 },

    #[error("Invalid exchange rate: {rate}")]
    InvalidExchangeRate { rate: f64 },
}

/// Failures decoding a single frame.
///
/// The reader logs and drops the frame; the stream continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("No JSON object in frame")]
    NoJsonObject,

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Frame too large: {size} bytes (max {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Invalid station ID: {0}")]
    InvalidStationId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
