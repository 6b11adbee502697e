use crate::{
    Result,
    constants::{DEFAULT_EXCHANGE_RATE, MAX_STATION_ID, MIN_STATION_ID},
    error::{DomainError, Error},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Station identifier, also the `parking_id` carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct StationId(u8);

impl StationId {
    /// Create a new station ID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidStationId` if the ID is outside the valid range (1-99).
    pub fn new(id: u8) -> Result<Self> {
        if !(MIN_STATION_ID..=MAX_STATION_ID).contains(&id) {
            return Err(Error::InvalidStationId(format!(
                "station ID must be {MIN_STATION_ID}-{MAX_STATION_ID}, got {id}"
            )));
        }
        Ok(StationId(id))
    }

    /// Get the raw station ID as u8.
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// TCP port for this station given the listener base port.
    ///
    /// Returns `None` when `base_port + id` does not fit a port number.
    #[must_use]
    pub fn port_from(&self, base_port: u16) -> Option<u16> {
        base_port.checked_add(u16::from(self.0))
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id: u8 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidStationId(format!("not a number: {s}")))?;
        StationId::new(id)
    }
}

impl TryFrom<u8> for StationId {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        StationId::new(id)
    }
}

impl From<StationId> for u8 {
    fn from(id: StationId) -> u8 {
        id.0
    }
}

/// A parking space number, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceNumber(u8);

impl SpaceNumber {
    /// Validate a space number against the number of spaces of a station.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSpace` when `space` is 0 or above `total`.
    pub fn new(space: u8, total: u8) -> std::result::Result<Self, DomainError> {
        if space == 0 || space > total {
            return Err(DomainError::InvalidSpace { space, total });
        }
        Ok(SpaceNumber(space))
    }

    #[must_use]
    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based index into per-space tables.
    #[must_use]
    pub fn index(&self) -> usize {
        usize::from(self.0) - 1
    }
}

impl fmt::Display for SpaceNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a parked vehicle.
///
/// Generated from a random UUID so that two entries in the same instant
/// never collide, across restarts included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl VehicleId {
    /// Generate a fresh vehicle ID.
    ///
    /// # Examples
    ///
    /// ```
    /// use parklink_core::VehicleId;
    ///
    /// let a = VehicleId::generate();
    /// let b = VehicleId::generate();
    /// assert_ne!(a, b);
    /// assert!(a.as_str().starts_with('V'));
    /// ```
    #[must_use]
    pub fn generate() -> Self {
        VehicleId(format!("V{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VehicleId {
    fn from(raw: String) -> Self {
        VehicleId(raw)
    }
}

/// Barrier position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierState {
    Open,
    #[default]
    Closed,
}

impl BarrierState {
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, BarrierState::Open)
    }
}

impl fmt::Display for BarrierState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BarrierState::Open => write!(f, "open"),
            BarrierState::Closed => write!(f, "closed"),
        }
    }
}

/// What the station display is showing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Free spaces.
    #[default]
    Spaces,
    /// Fee of the vehicle awaiting exit confirmation, in thousands.
    Fee,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DisplayMode::Spaces => write!(f, "spaces"),
            DisplayMode::Fee => write!(f, "fee"),
        }
    }
}

/// A completed visit, appended to the station history on confirmed exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub vehicle_id: VehicleId,
    pub space: SpaceNumber,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub duration_secs: u64,
    pub fee: u64,
}

/// Persisted per-station record.
///
/// Loaded when a station is registered and written back on shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub visit_history: Vec<VisitRecord>,
    pub exchange_rate: f64,
    pub last_exchange_refresh: Option<DateTime<Utc>>,
}

impl Default for StationRecord {
    fn default() -> Self {
        Self {
            visit_history: Vec::new(),
            exchange_rate: DEFAULT_EXCHANGE_RATE,
            last_exchange_refresh: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1)]
    #[case(42)]
    #[case(99)]
    fn test_station_id_valid(#[case] id: u8) {
        assert_eq!(StationId::new(id).unwrap().as_u8(), id);
    }

    #[rstest]
    #[case(0)]
    #[case(100)]
    #[case(255)]
    fn test_station_id_invalid(#[case] id: u8) {
        assert!(matches!(
            StationId::new(id),
            Err(Error::InvalidStationId(_))
        ));
    }

    #[test]
    fn test_station_id_from_str() {
        let id: StationId = " 7 ".parse().unwrap();
        assert_eq!(id.as_u8(), 7);
        assert!("x".parse::<StationId>().is_err());
        assert!("0".parse::<StationId>().is_err());
    }

    #[test]
    fn test_station_id_serde_rejects_out_of_range() {
        let id: StationId = serde_json::from_str("3").unwrap();
        assert_eq!(id.as_u8(), 3);
        assert!(serde_json::from_str::<StationId>("0").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "3");
    }

    #[test]
    fn test_station_port() {
        let id = StationId::new(2).unwrap();
        assert_eq!(id.port_from(5000), Some(5002));
        assert_eq!(id.port_from(u16::MAX), None);
    }

    #[rstest]
    #[case(1, 2, true)]
    #[case(2, 2, true)]
    #[case(0, 2, false)]
    #[case(3, 2, false)]
    fn test_space_number_validation(#[case] space: u8, #[case] total: u8, #[case] ok: bool) {
        assert_eq!(SpaceNumber::new(space, total).is_ok(), ok);
    }

    #[test]
    fn test_space_number_index() {
        let space = SpaceNumber::new(2, 2).unwrap();
        assert_eq!(space.index(), 1);
        assert_eq!(space.get(), 2);
    }

    #[test]
    fn test_vehicle_ids_are_unique_under_rapid_generation() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| VehicleId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_barrier_and_display_wire_names() {
        assert_eq!(serde_json::to_string(&BarrierState::Open).unwrap(), "\"open\"");
        assert_eq!(serde_json::to_string(&DisplayMode::Fee).unwrap(), "\"fee\"");
        assert_eq!(BarrierState::default(), BarrierState::Closed);
        assert_eq!(DisplayMode::default().to_string(), "spaces");
    }

    #[test]
    fn test_station_record_default_is_empty() {
        let record = StationRecord::default();
        assert!(record.visit_history.is_empty());
        assert_eq!(record.exchange_rate, DEFAULT_EXCHANGE_RATE);
        assert!(record.last_exchange_refresh.is_none());
    }
}
