use parklink_core::{DomainError, StationId};
use parklink_network::TransportError;
use parklink_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

/// Errors returned by [`ParkingHub`](crate::ParkingHub) operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// No station with this id is configured.
    #[error("Unknown station {0}")]
    UnknownStation(StationId),

    /// The station is already configured.
    #[error("Station {0} already configured")]
    DuplicateStation(StationId),

    /// Stations can only be added before the hub starts.
    #[error("Hub already started")]
    AlreadyStarted,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_is_transparent() {
        let err = HubError::from(DomainError::NoCapacity);
        assert_eq!(err.to_string(), DomainError::NoCapacity.to_string());
    }

    #[test]
    fn test_unknown_station_display() {
        let err = HubError::UnknownStation(StationId::new(12).unwrap());
        assert_eq!(err.to_string(), "Unknown station 12");
    }
}
