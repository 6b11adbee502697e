//! Parking domain for a single station.
//!
//! [`ParkingState`] holds the occupancy ledger, the sensor view, the visit
//! history and the display/barrier state of one station, and exposes pure
//! transitions on it. [`ParkingStation`] wraps it behind a per-station lock
//! so that hardware events and local actions are serialized.

pub mod format;
pub mod state_machine;
pub mod station;

pub use format::{format_amount, format_elapsed};
pub use state_machine::{
    ExitQuote, ParkedVehicle, ParkingConfig, ParkingSnapshot, ParkingState, ParkingStateBuilder,
    ParkingStats, SpaceView,
};
pub use station::ParkingStation;
