//! Shared, lock-protected parking state of one station.

use std::sync::{Mutex, MutexGuard, PoisonError};

use parklink_core::{BarrierState, DisplayMode, DomainError, SpaceNumber, StationId, VehicleId, VisitRecord};

use crate::{ExitQuote, ParkingConfig, ParkingSnapshot, ParkingState, ParkingStats};

/// A station's [`ParkingState`] behind a mutex.
///
/// Transitions from hardware events and from local actions go through the
/// same lock, so they are applied one at a time. The lock is never held
/// across an await point; callers that need to talk to the station compute
/// their commands inside [`with`](Self::with) and send them afterwards.
#[derive(Debug)]
pub struct ParkingStation {
    id: StationId,
    state: Mutex<ParkingState>,
}

impl ParkingStation {
    pub fn new(state: ParkingState) -> Self {
        Self {
            id: state.station_id(),
            state: Mutex::new(state),
        }
    }

    pub fn with_config(id: StationId, config: ParkingConfig) -> Self {
        Self::new(ParkingState::builder(id).with_config(config).build())
    }

    pub fn id(&self) -> StationId {
        self.id
    }

    /// Run `f` with exclusive access to the state.
    ///
    /// A panic in an earlier holder does not poison the station: every
    /// transition is all-or-nothing, so the state is still consistent.
    pub fn with<R>(&self, f: impl FnOnce(&mut ParkingState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> ParkingSnapshot {
        self.lock().snapshot()
    }

    pub fn stats(&self) -> ParkingStats {
        self.lock().stats()
    }

    pub fn enter_vehicle(&self) -> Result<(VehicleId, SpaceNumber), DomainError> {
        self.lock().enter_vehicle()
    }

    pub fn request_exit(&self) -> Result<ExitQuote, DomainError> {
        self.lock().request_exit()
    }

    pub fn confirm_exit(&self) -> Result<VisitRecord, DomainError> {
        self.lock().confirm_exit()
    }

    pub fn take_manual_space(&self, space: u8) -> Result<bool, DomainError> {
        self.lock().take_manual_space(space)
    }

    pub fn release_manual_space(&self, space: u8) -> Result<bool, DomainError> {
        self.lock().release_manual_space(space)
    }

    pub fn control_barrier(&self, state: BarrierState) {
        self.lock().control_barrier(state);
    }

    pub fn set_display(&self, mode: DisplayMode, value: impl Into<String>) {
        self.lock().set_display(mode, value);
    }

    fn lock(&self) -> MutexGuard<'_, ParkingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> ParkingStation {
        ParkingStation::new(ParkingState::new(StationId::new(3).unwrap()))
    }

    #[test]
    fn test_delegates_to_state() {
        let station = station();
        assert_eq!(station.id().as_u8(), 3);

        station.enter_vehicle().unwrap();
        assert_eq!(station.snapshot().available_spaces, 1);

        station.request_exit().unwrap();
        station.confirm_exit().unwrap();
        assert_eq!(station.stats().total_vehicles, 1);
    }

    #[test]
    fn test_with_gives_consistent_view() {
        let station = station();
        let (available, value) = station.with(|state| {
            state.take_manual_space(1).unwrap();
            (state.available_spaces(), state.display_value().to_string())
        });
        assert_eq!(available, 1);
        assert_eq!(value, "1");
    }

    #[test]
    fn test_survives_poisoned_lock() {
        let station = std::sync::Arc::new(station());
        let clone = station.clone();
        let _ = std::thread::spawn(move || {
            clone.with(|_| panic!("boom"));
        })
        .join();

        assert!(station.enter_vehicle().is_ok());
    }
}
