//! Transport errors.
//!
//! None of these ever escape a link as a crash: a failed open leaves the
//! link `Disconnected`, a failed read or write tears the session down and
//! waits for the reconnect supervisor.

use parklink_core::StationId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not be opened.
    #[error("Failed to open {endpoint}: {reason}")]
    OpenFailed { endpoint: String, reason: String },

    /// No station connected to a TCP endpoint in time.
    #[error("No station connected to {endpoint} within {timeout_ms}ms")]
    AcceptTimeout { endpoint: String, timeout_ms: u64 },

    /// A write did not complete in time.
    #[error("Write timeout after {0}ms")]
    WriteTimeout(u64),

    /// The peer went away.
    #[error("Connection closed: {0}")]
    Closed(String),

    /// No session is open for the station.
    #[error("Station {0} not connected")]
    NotConnected(StationId),

    /// A link for the station is already registered.
    #[error("Station {0} already registered")]
    DuplicateStation(StationId),

    /// A frame could not be encoded or decoded; the connection itself is fine.
    #[error("Codec error: {0}")]
    Codec(parklink_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Socket failures surface from the codec as `parklink_core::Error::Io`;
/// they belong to the connection, not to the frame.
impl From<parklink_core::Error> for TransportError {
    fn from(err: parklink_core::Error) -> Self {
        match err {
            parklink_core::Error::Io(io) => Self::Io(io),
            other => Self::Codec(other),
        }
    }
}

impl TransportError {
    pub fn open_failed(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::OpenFailed {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_failed_display() {
        let err = TransportError::open_failed("/dev/ttyUSB0", "permission denied");
        assert_eq!(
            err.to_string(),
            "Failed to open /dev/ttyUSB0: permission denied"
        );
    }

    #[test]
    fn test_not_connected_display() {
        let err = TransportError::NotConnected(StationId::new(7).unwrap());
        assert_eq!(err.to_string(), "Station 7 not connected");
    }

    #[test]
    fn test_codec_error_from_core() {
        let err: TransportError =
            parklink_core::Error::from(parklink_core::ProtocolError::NoJsonObject).into();
        assert!(matches!(err, TransportError::Codec(_)));
    }

    #[test]
    fn test_io_error_from_codec_is_connection_error() {
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let err: TransportError = parklink_core::Error::from(reset).into();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
