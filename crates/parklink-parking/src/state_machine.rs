//! Parking state machine for one station.
//!
//! The state keeps two views of each space:
//! - the **ledger**: which vehicle was assigned the space on entry, used for billing
//! - the **sensor view**: whether the station's sensor reports the space as taken
//!
//! A space is occupied when either view says so, and the number of free
//! spaces is derived from that. This makes
//! `available_spaces() + occupied_count() == total_spaces()` hold by
//! construction, and keeps availability inside `[0, total]` no matter how
//! sensor updates and ledger transitions interleave.
//!
//! # Transitions
//!
//! | Transition | Fails with | Effect |
//! |---|---|---|
//! | `enter_vehicle` | `NoCapacity` | new vehicle on the lowest free space, barrier open |
//! | `request_exit` | `NoVehicles` | oldest vehicle quoted, display shows the fee |
//! | `confirm_exit` | `NoPendingExit` | vehicle billed and moved to history, barrier open |
//! | `take_manual_space` | `InvalidSpace` | sensor view marks the space taken |
//! | `release_manual_space` | `InvalidSpace` | sensor view marks the space free |
//! | `refresh_exchange_rate` | `InvalidExchangeRate` | new rate, at most once per interval |
//!
//! Every transition is all-or-nothing: on error the state is untouched.
//! Transitions never perform I/O; commands for the station are derived from
//! the resulting state by the caller.
//!
//! # Examples
//!
//! ```
//! use chrono::{Duration, Utc};
//! use parklink_core::{DomainError, StationId};
//! use parklink_parking::ParkingState;
//!
//! let mut state = ParkingState::new(StationId::new(1).unwrap());
//! let t0 = Utc::now();
//!
//! let (first, space) = state.enter_vehicle_at(t0).unwrap();
//! assert_eq!(space.get(), 1);
//! state.enter_vehicle_at(t0).unwrap();
//! assert_eq!(state.enter_vehicle_at(t0), Err(DomainError::NoCapacity));
//!
//! let quote = state.request_exit_at(t0 + Duration::seconds(25)).unwrap();
//! assert_eq!(quote.vehicle_id, first);
//! assert_eq!(quote.fee, 3_000);
//!
//! state.confirm_exit_at(t0 + Duration::seconds(26)).unwrap();
//! assert_eq!(state.available_spaces(), 1);
//! assert_eq!(state.history().len(), 1);
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parklink_core::constants::{
    BILLING_UNIT_SECS, DEFAULT_BASE_FEE, DEFAULT_EXCHANGE_RATE, DEFAULT_TOTAL_SPACES,
    EXCHANGE_REFRESH_INTERVAL_SECS, FEE_DISPLAY_DIVISOR,
};
use parklink_core::{
    BarrierState, DisplayMode, DomainError, SpaceNumber, StationId, StationRecord, VehicleId,
    VisitRecord,
};

type Result<T> = std::result::Result<T, DomainError>;

/// Billing and capacity settings of a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingConfig {
    /// Number of spaces.
    pub total_spaces: u8,

    /// Fee per billable unit.
    pub base_fee: u64,

    /// Length of one billable unit in seconds.
    pub billing_unit_secs: u64,

    /// Minimum time between two accepted exchange-rate refreshes.
    pub exchange_refresh_interval: Duration,

    /// Rate used when no persisted rate exists.
    pub initial_exchange_rate: f64,
}

impl Default for ParkingConfig {
    fn default() -> Self {
        Self {
            total_spaces: DEFAULT_TOTAL_SPACES,
            base_fee: DEFAULT_BASE_FEE,
            billing_unit_secs: BILLING_UNIT_SECS,
            exchange_refresh_interval: Duration::from_secs(EXCHANGE_REFRESH_INTERVAL_SECS),
            initial_exchange_rate: DEFAULT_EXCHANGE_RATE,
        }
    }
}

/// A vehicle currently in the lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkedVehicle {
    pub vehicle_id: VehicleId,
    pub space: SpaceNumber,
    pub entry_time: DateTime<Utc>,
}

/// Result of `request_exit`: the vehicle awaiting confirmation and its fee so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitQuote {
    pub vehicle_id: VehicleId,
    pub duration_secs: u64,
    pub fee: u64,
}

/// Aggregates over the visit history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParkingStats {
    pub total_vehicles: usize,
    pub average_duration_secs: f64,
    pub total_fee: u64,
    /// `total_fee` at the current exchange rate.
    pub total_fee_converted: f64,
}

/// Both views of one space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceView {
    pub space: SpaceNumber,
    pub assigned_to: Option<VehicleId>,
    pub sensed: bool,
}

impl SpaceView {
    pub fn is_occupied(&self) -> bool {
        self.sensed || self.assigned_to.is_some()
    }
}

/// Read-only copy of a station's state for consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSnapshot {
    pub station_id: StationId,
    pub total_spaces: u8,
    pub available_spaces: u8,
    pub spaces: Vec<SpaceView>,
    pub occupied_vehicles: Vec<ParkedVehicle>,
    pub pending_exit: Option<VehicleId>,
    pub history: Vec<VisitRecord>,
    pub barrier_state: BarrierState,
    pub display_mode: DisplayMode,
    pub display_value: String,
    pub exchange_rate: f64,
    pub last_exchange_refresh: Option<DateTime<Utc>>,
    pub stats: ParkingStats,
}

/// Parking state of one station.
///
/// # Thread Safety
///
/// This struct is not synchronized. Share it through
/// [`ParkingStation`](crate::ParkingStation), which serializes transitions.
#[derive(Debug, Clone)]
pub struct ParkingState {
    station_id: StationId,
    config: ParkingConfig,

    /// Sensor view, indexed by `SpaceNumber::index()`.
    sensed: Vec<bool>,

    /// Ledger, in entry order.
    vehicles: Vec<ParkedVehicle>,

    pending_exit: Option<VehicleId>,
    history: Vec<VisitRecord>,
    barrier: BarrierState,
    display_mode: DisplayMode,
    display_value: String,
    exchange_rate: f64,
    last_exchange_refresh: Option<DateTime<Utc>>,
}

impl ParkingState {
    /// Create an empty state with the default configuration.
    pub fn new(station_id: StationId) -> Self {
        Self::builder(station_id).build()
    }

    /// Create a builder, used to apply a configuration and a persisted record.
    ///
    /// # Examples
    ///
    /// ```
    /// use parklink_core::{StationId, StationRecord};
    /// use parklink_parking::{ParkingConfig, ParkingState};
    ///
    /// let record = StationRecord { exchange_rate: 530.0, ..StationRecord::default() };
    /// let state = ParkingState::builder(StationId::new(2).unwrap())
    ///     .with_config(ParkingConfig { total_spaces: 4, ..ParkingConfig::default() })
    ///     .with_record(record)
    ///     .build();
    ///
    /// assert_eq!(state.available_spaces(), 4);
    /// assert_eq!(state.exchange_rate(), 530.0);
    /// ```
    pub fn builder(station_id: StationId) -> ParkingStateBuilder {
        ParkingStateBuilder {
            station_id,
            config: ParkingConfig::default(),
            record: None,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn station_id(&self) -> StationId {
        self.station_id
    }

    pub fn config(&self) -> &ParkingConfig {
        &self.config
    }

    pub fn total_spaces(&self) -> u8 {
        self.config.total_spaces
    }

    /// Spaces neither assigned to a vehicle nor reported taken by a sensor.
    pub fn available_spaces(&self) -> u8 {
        self.config.total_spaces - self.occupied_count()
    }

    /// Spaces assigned to a vehicle or reported taken by a sensor.
    pub fn occupied_count(&self) -> u8 {
        let occupied = self
            .space_numbers()
            .filter(|space| self.is_occupied(*space))
            .count();
        // Bounded by total_spaces, which is a u8.
        u8::try_from(occupied).unwrap_or(u8::MAX)
    }

    /// Vehicles in the lot, oldest entry first.
    pub fn occupied_vehicles(&self) -> &[ParkedVehicle] {
        &self.vehicles
    }

    pub fn pending_exit(&self) -> Option<&VehicleId> {
        self.pending_exit.as_ref()
    }

    pub fn history(&self) -> &[VisitRecord] {
        &self.history
    }

    pub fn barrier_state(&self) -> BarrierState {
        self.barrier
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    pub fn display_value(&self) -> &str {
        &self.display_value
    }

    pub fn exchange_rate(&self) -> f64 {
        self.exchange_rate
    }

    pub fn last_exchange_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_exchange_refresh
    }

    /// Whether the sensor view reports `space` as taken.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSpace` for a space outside `1..=total`.
    pub fn is_space_sensed(&self, space: u8) -> Result<bool> {
        let space = SpaceNumber::new(space, self.config.total_spaces)?;
        Ok(self.sensed[space.index()])
    }

    /// Both views of every space, in space order.
    pub fn spaces(&self) -> Vec<SpaceView> {
        self.space_numbers()
            .map(|space| SpaceView {
                space,
                assigned_to: self.assigned_vehicle(space).map(|v| v.vehicle_id.clone()),
                sensed: self.sensed[space.index()],
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Admit a vehicle now.
    pub fn enter_vehicle(&mut self) -> Result<(VehicleId, SpaceNumber)> {
        self.enter_vehicle_at(Utc::now())
    }

    /// Admit a vehicle at `now` on the lowest-numbered free space.
    ///
    /// # Errors
    /// Returns `DomainError::NoCapacity` when no space is free.
    pub fn enter_vehicle_at(&mut self, now: DateTime<Utc>) -> Result<(VehicleId, SpaceNumber)> {
        let space = self
            .space_numbers()
            .find(|space| !self.is_occupied(*space))
            .ok_or(DomainError::NoCapacity)?;

        let vehicle_id = VehicleId::generate();
        self.vehicles.push(ParkedVehicle {
            vehicle_id: vehicle_id.clone(),
            space,
            entry_time: now,
        });

        self.show_spaces();
        self.barrier = BarrierState::Open;

        Ok((vehicle_id, space))
    }

    /// Quote the oldest vehicle now.
    pub fn request_exit(&mut self) -> Result<ExitQuote> {
        self.request_exit_at(Utc::now())
    }

    /// Quote the oldest vehicle at `now` and mark it as the pending exit.
    ///
    /// Occupancy is not changed; `confirm_exit` completes the exit.
    ///
    /// # Errors
    /// Returns `DomainError::NoVehicles` when the ledger is empty.
    pub fn request_exit_at(&mut self, now: DateTime<Utc>) -> Result<ExitQuote> {
        let vehicle = self.vehicles.first().ok_or(DomainError::NoVehicles)?;

        let duration_secs = elapsed_secs(vehicle.entry_time, now);
        let fee = self.calculate_fee(duration_secs);
        let quote = ExitQuote {
            vehicle_id: vehicle.vehicle_id.clone(),
            duration_secs,
            fee,
        };

        self.pending_exit = Some(quote.vehicle_id.clone());
        self.display_mode = DisplayMode::Fee;
        self.display_value = (fee / FEE_DISPLAY_DIVISOR).to_string();

        Ok(quote)
    }

    /// Confirm the pending exit now.
    pub fn confirm_exit(&mut self) -> Result<VisitRecord> {
        self.confirm_exit_at(Utc::now())
    }

    /// Bill the pending vehicle at `now`, move it to history and open the barrier.
    ///
    /// The fee is recomputed from the confirmation time, so it can exceed
    /// the quote when billable units elapsed in between.
    ///
    /// # Errors
    /// Returns `DomainError::NoPendingExit` when no exit was requested.
    pub fn confirm_exit_at(&mut self, now: DateTime<Utc>) -> Result<VisitRecord> {
        let position = self
            .pending_exit
            .as_ref()
            .and_then(|pending| self.vehicles.iter().position(|v| &v.vehicle_id == pending))
            .ok_or(DomainError::NoPendingExit)?;

        let vehicle = self.vehicles.remove(position);
        let duration_secs = elapsed_secs(vehicle.entry_time, now);
        let record = VisitRecord {
            vehicle_id: vehicle.vehicle_id,
            space: vehicle.space,
            entry_time: vehicle.entry_time,
            exit_time: now,
            duration_secs,
            fee: self.calculate_fee(duration_secs),
        };

        self.history.push(record.clone());
        self.pending_exit = None;
        self.show_spaces();
        self.barrier = BarrierState::Open;

        Ok(record)
    }

    /// Fee for a stay of `duration_secs`.
    ///
    /// Every started billable unit is charged, so a stay shorter than one
    /// unit still pays one.
    ///
    /// # Examples
    ///
    /// ```
    /// use parklink_core::StationId;
    /// use parklink_parking::ParkingState;
    ///
    /// let state = ParkingState::new(StationId::new(1).unwrap());
    /// assert_eq!(state.calculate_fee(0), 1_000);
    /// assert_eq!(state.calculate_fee(9), 1_000);
    /// assert_eq!(state.calculate_fee(10), 2_000);
    /// assert_eq!(state.calculate_fee(25), 3_000);
    /// ```
    pub fn calculate_fee(&self, duration_secs: u64) -> u64 {
        let unit = self.config.billing_unit_secs.max(1);
        (duration_secs / unit)
            .saturating_add(1)
            .saturating_mul(self.config.base_fee)
    }

    /// Mark `space` as taken in the sensor view.
    ///
    /// Returns `true` when this changed the number of free spaces, which is
    /// not the case when the space was already occupied in either view.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSpace` for a space outside `1..=total`.
    pub fn take_manual_space(&mut self, space: u8) -> Result<bool> {
        let space = SpaceNumber::new(space, self.config.total_spaces)?;
        let was_occupied = self.is_occupied(space);

        self.sensed[space.index()] = true;
        self.refresh_spaces_display();

        Ok(!was_occupied)
    }

    /// Mark `space` as free in the sensor view.
    ///
    /// Returns `true` when this changed the number of free spaces, which is
    /// not the case when the space is still assigned to a vehicle.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSpace` for a space outside `1..=total`.
    pub fn release_manual_space(&mut self, space: u8) -> Result<bool> {
        let space = SpaceNumber::new(space, self.config.total_spaces)?;
        let was_occupied = self.is_occupied(space);

        self.sensed[space.index()] = false;
        self.refresh_spaces_display();

        Ok(was_occupied && !self.is_occupied(space))
    }

    /// Set the barrier position.
    pub fn control_barrier(&mut self, state: BarrierState) {
        self.barrier = state;
    }

    /// Record what the station display was told to show.
    pub fn set_display(&mut self, mode: DisplayMode, value: impl Into<String>) {
        self.display_mode = mode;
        self.display_value = value.into();
    }

    /// Switch the display back to free spaces.
    pub fn show_spaces(&mut self) {
        self.display_mode = DisplayMode::Spaces;
        self.display_value = self.available_spaces().to_string();
    }

    /// Replace the exchange rate if the refresh interval has elapsed.
    ///
    /// Returns `true` when the rate was replaced. The first refresh is
    /// always accepted.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidExchangeRate` for a rate that is not a
    /// positive finite number.
    pub fn refresh_exchange_rate(&mut self, rate: f64, now: DateTime<Utc>) -> Result<bool> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(DomainError::InvalidExchangeRate { rate });
        }

        let due = match self.last_exchange_refresh {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.config.exchange_refresh_interval),
        };

        if due {
            self.exchange_rate = rate;
            self.last_exchange_refresh = Some(now);
        }
        Ok(due)
    }

    /// Totals over the visit history; all zero when it is empty.
    pub fn stats(&self) -> ParkingStats {
        if self.history.is_empty() {
            return ParkingStats::default();
        }

        let total_vehicles = self.history.len();
        let total_duration: u64 = self.history.iter().map(|v| v.duration_secs).sum();
        let total_fee: u64 = self.history.iter().map(|v| v.fee).sum();

        ParkingStats {
            total_vehicles,
            average_duration_secs: total_duration as f64 / total_vehicles as f64,
            total_fee,
            total_fee_converted: total_fee as f64 / self.exchange_rate,
        }
    }

    /// Copy of the whole state for consumers.
    pub fn snapshot(&self) -> ParkingSnapshot {
        ParkingSnapshot {
            station_id: self.station_id,
            total_spaces: self.total_spaces(),
            available_spaces: self.available_spaces(),
            spaces: self.spaces(),
            occupied_vehicles: self.vehicles.clone(),
            pending_exit: self.pending_exit.clone(),
            history: self.history.clone(),
            barrier_state: self.barrier,
            display_mode: self.display_mode,
            display_value: self.display_value.clone(),
            exchange_rate: self.exchange_rate,
            last_exchange_refresh: self.last_exchange_refresh,
            stats: self.stats(),
        }
    }

    /// Persistent part of the state.
    pub fn to_record(&self) -> StationRecord {
        StationRecord {
            visit_history: self.history.clone(),
            exchange_rate: self.exchange_rate,
            last_exchange_refresh: self.last_exchange_refresh,
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn space_numbers(&self) -> impl Iterator<Item = SpaceNumber> + use<> {
        let total = self.config.total_spaces;
        (1..=total).filter_map(move |n| SpaceNumber::new(n, total).ok())
    }

    fn assigned_vehicle(&self, space: SpaceNumber) -> Option<&ParkedVehicle> {
        self.vehicles.iter().find(|v| v.space == space)
    }

    fn is_occupied(&self, space: SpaceNumber) -> bool {
        self.sensed[space.index()] || self.assigned_vehicle(space).is_some()
    }

    /// Keep a spaces display current; a fee quote on screen is left alone.
    fn refresh_spaces_display(&mut self) {
        if self.display_mode == DisplayMode::Spaces {
            self.show_spaces();
        }
    }
}

/// Whole seconds from `from` to `to`, zero if the clock went backwards.
fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_seconds()).unwrap_or(0)
}

/// Builder for [`ParkingState`].
#[derive(Debug)]
pub struct ParkingStateBuilder {
    station_id: StationId,
    config: ParkingConfig,
    record: Option<StationRecord>,
}

impl ParkingStateBuilder {
    pub fn with_config(mut self, config: ParkingConfig) -> Self {
        self.config = config;
        self
    }

    /// Restore history and exchange rate from a persisted record.
    pub fn with_record(mut self, record: StationRecord) -> Self {
        self.record = Some(record);
        self
    }

    pub fn build(self) -> ParkingState {
        let (history, exchange_rate, last_exchange_refresh) = match self.record {
            Some(record) => (
                record.visit_history,
                record.exchange_rate,
                record.last_exchange_refresh,
            ),
            None => (Vec::new(), self.config.initial_exchange_rate, None),
        };

        // A corrupt persisted rate would make conversions meaningless.
        let exchange_rate = if exchange_rate.is_finite() && exchange_rate > 0.0 {
            exchange_rate
        } else {
            self.config.initial_exchange_rate
        };

        let mut state = ParkingState {
            station_id: self.station_id,
            sensed: vec![false; usize::from(self.config.total_spaces)],
            config: self.config,
            vehicles: Vec::new(),
            pending_exit: None,
            history,
            barrier: BarrierState::Closed,
            display_mode: DisplayMode::Spaces,
            display_value: String::new(),
            exchange_rate,
            last_exchange_refresh,
        };
        state.show_spaces();
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn station() -> StationId {
        StationId::new(1).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn lot_with(total_spaces: u8) -> ParkingState {
        ParkingState::builder(station())
            .with_config(ParkingConfig {
                total_spaces,
                ..ParkingConfig::default()
            })
            .build()
    }

    fn assert_invariants(state: &ParkingState) {
        assert_eq!(
            state.available_spaces() + state.occupied_count(),
            state.total_spaces()
        );
        if let Some(pending) = state.pending_exit() {
            assert!(
                state
                    .occupied_vehicles()
                    .iter()
                    .any(|v| &v.vehicle_id == pending)
            );
        }
        let mut spaces: Vec<_> = state.occupied_vehicles().iter().map(|v| v.space).collect();
        spaces.sort();
        spaces.dedup();
        assert_eq!(spaces.len(), state.occupied_vehicles().len());
    }

    #[test]
    fn test_new_state_is_empty_and_closed() {
        let state = ParkingState::new(station());
        assert_eq!(state.total_spaces(), 2);
        assert_eq!(state.available_spaces(), 2);
        assert_eq!(state.barrier_state(), BarrierState::Closed);
        assert_eq!(state.display_mode(), DisplayMode::Spaces);
        assert_eq!(state.display_value(), "2");
        assert!(state.pending_exit().is_none());
        assert_invariants(&state);
    }

    #[rstest]
    #[case(0, 1_000)]
    #[case(9, 1_000)]
    #[case(10, 2_000)]
    #[case(19, 2_000)]
    #[case(25, 3_000)]
    #[case(600, 61_000)]
    fn test_calculate_fee(#[case] duration: u64, #[case] expected: u64) {
        let state = ParkingState::new(station());
        assert_eq!(state.calculate_fee(duration), expected);
    }

    #[test]
    fn test_calculate_fee_saturates() {
        let state = ParkingState::new(station());
        assert_eq!(state.calculate_fee(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_enter_assigns_lowest_free_space_and_opens_barrier() {
        let mut state = ParkingState::new(station());

        let (_, space) = state.enter_vehicle_at(t0()).unwrap();
        assert_eq!(space.get(), 1);
        assert_eq!(state.available_spaces(), 1);
        assert_eq!(state.display_value(), "1");
        assert_eq!(state.barrier_state(), BarrierState::Open);

        let (_, space) = state.enter_vehicle_at(t0()).unwrap();
        assert_eq!(space.get(), 2);
        assert_invariants(&state);
    }

    #[test]
    fn test_enter_on_full_lot_leaves_state_unchanged() {
        let mut state = lot_with(1);
        state.enter_vehicle_at(t0()).unwrap();
        state.control_barrier(BarrierState::Closed);
        let before = state.snapshot();

        assert_eq!(state.enter_vehicle_at(t0()), Err(DomainError::NoCapacity));
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_enter_reuses_space_freed_by_exit() {
        let mut state = ParkingState::new(station());
        state.enter_vehicle_at(t0()).unwrap();
        state.enter_vehicle_at(t0()).unwrap();

        state.request_exit_at(t0() + secs(5)).unwrap();
        state.confirm_exit_at(t0() + secs(5)).unwrap();

        let (_, space) = state.enter_vehicle_at(t0() + secs(6)).unwrap();
        assert_eq!(space.get(), 1);
        assert_invariants(&state);
    }

    #[test]
    fn test_request_exit_on_empty_lot() {
        let mut state = ParkingState::new(station());
        assert_eq!(state.request_exit_at(t0()), Err(DomainError::NoVehicles));
        assert_eq!(state.display_mode(), DisplayMode::Spaces);
    }

    #[test]
    fn test_request_exit_quotes_oldest_without_freeing_space() {
        let mut state = ParkingState::new(station());
        let (first, _) = state.enter_vehicle_at(t0()).unwrap();
        state.enter_vehicle_at(t0() + secs(3)).unwrap();

        let quote = state.request_exit_at(t0() + secs(42)).unwrap();

        assert_eq!(quote.vehicle_id, first);
        assert_eq!(quote.duration_secs, 42);
        assert_eq!(quote.fee, 5_000);
        assert_eq!(state.pending_exit(), Some(&first));
        assert_eq!(state.display_mode(), DisplayMode::Fee);
        assert_eq!(state.display_value(), "5");
        assert_eq!(state.available_spaces(), 0);
        assert_invariants(&state);
    }

    #[test]
    fn test_confirm_without_request() {
        let mut state = ParkingState::new(station());
        state.enter_vehicle_at(t0()).unwrap();
        let before = state.snapshot();

        assert_eq!(state.confirm_exit_at(t0()), Err(DomainError::NoPendingExit));
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_confirm_uses_confirmation_time_fee() {
        let mut state = ParkingState::new(station());
        let (vehicle, space) = state.enter_vehicle_at(t0()).unwrap();

        let quote = state.request_exit_at(t0() + secs(5)).unwrap();
        assert_eq!(quote.fee, 1_000);

        let record = state.confirm_exit_at(t0() + secs(31)).unwrap();
        assert_eq!(record.vehicle_id, vehicle);
        assert_eq!(record.space, space);
        assert_eq!(record.duration_secs, 31);
        assert_eq!(record.fee, 4_000);
        assert_eq!(record.exit_time, t0() + secs(31));
    }

    #[test]
    fn test_confirm_moves_vehicle_to_history_and_resets_display() {
        let mut state = ParkingState::new(station());
        state.enter_vehicle_at(t0()).unwrap();
        state.control_barrier(BarrierState::Closed);
        state.request_exit_at(t0() + secs(12)).unwrap();

        state.confirm_exit_at(t0() + secs(12)).unwrap();

        assert!(state.occupied_vehicles().is_empty());
        assert!(state.pending_exit().is_none());
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.display_mode(), DisplayMode::Spaces);
        assert_eq!(state.display_value(), "2");
        assert_eq!(state.barrier_state(), BarrierState::Open);
        assert_eq!(
            state.confirm_exit_at(t0() + secs(13)),
            Err(DomainError::NoPendingExit)
        );
    }

    #[test]
    fn test_end_to_end_two_space_scenario() {
        let mut state = ParkingState::new(station());

        let (v1, s1) = state.enter_vehicle_at(t0()).unwrap();
        assert_eq!(s1.get(), 1);
        assert_eq!(state.available_spaces(), 1);

        let (v2, s2) = state.enter_vehicle_at(t0() + secs(1)).unwrap();
        assert_eq!(s2.get(), 2);
        assert_ne!(v1, v2);
        assert_eq!(state.available_spaces(), 0);

        assert_eq!(
            state.enter_vehicle_at(t0() + secs(2)),
            Err(DomainError::NoCapacity)
        );

        let quote = state.request_exit_at(t0() + secs(20)).unwrap();
        assert_eq!(quote.vehicle_id, v1);
        assert_eq!(quote.fee, 3_000);

        assert!(state.confirm_exit_at(t0() + secs(21)).is_ok());
        assert_eq!(state.available_spaces(), 1);
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.occupied_vehicles()[0].vehicle_id, v2);
        assert_invariants(&state);
    }

    #[test]
    fn test_manual_take_and_release_adjust_availability_once() {
        let mut state = ParkingState::new(station());

        assert!(state.take_manual_space(2).unwrap());
        assert_eq!(state.available_spaces(), 1);
        assert_eq!(state.display_value(), "1");

        // Already taken: no double decrement
        assert!(!state.take_manual_space(2).unwrap());
        assert_eq!(state.available_spaces(), 1);

        assert!(state.release_manual_space(2).unwrap());
        assert_eq!(state.available_spaces(), 2);

        // Already free: no overflow past total
        assert!(!state.release_manual_space(2).unwrap());
        assert_eq!(state.available_spaces(), 2);
        assert_invariants(&state);
    }

    #[test]
    fn test_sensor_on_ledger_space_does_not_double_count() {
        let mut state = ParkingState::new(station());
        state.enter_vehicle_at(t0()).unwrap();
        assert_eq!(state.available_spaces(), 1);

        assert!(!state.take_manual_space(1).unwrap());
        assert_eq!(state.available_spaces(), 1);

        // Sensor clears while the ledger still holds the vehicle
        assert!(!state.release_manual_space(1).unwrap());
        assert_eq!(state.available_spaces(), 1);
        assert_invariants(&state);
    }

    #[test]
    fn test_sensed_space_is_skipped_on_entry() {
        let mut state = ParkingState::new(station());
        state.take_manual_space(1).unwrap();

        let (_, space) = state.enter_vehicle_at(t0()).unwrap();
        assert_eq!(space.get(), 2);
        assert_eq!(state.enter_vehicle_at(t0()), Err(DomainError::NoCapacity));
        assert_invariants(&state);
    }

    #[test]
    fn test_manual_space_does_not_clobber_fee_display() {
        let mut state = ParkingState::new(station());
        state.enter_vehicle_at(t0()).unwrap();
        state.request_exit_at(t0() + secs(15)).unwrap();

        state.take_manual_space(2).unwrap();

        assert_eq!(state.display_mode(), DisplayMode::Fee);
        assert_eq!(state.display_value(), "2");
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    fn test_manual_space_out_of_range(#[case] space: u8) {
        let mut state = ParkingState::new(station());
        let err = DomainError::InvalidSpace { space, total: 2 };
        assert_eq!(state.take_manual_space(space), Err(err.clone()));
        assert_eq!(state.release_manual_space(space), Err(err.clone()));
        assert_eq!(state.is_space_sensed(space), Err(err));
    }

    #[test]
    fn test_exchange_rate_refresh_is_gated_by_interval() {
        let mut state = ParkingState::new(station());

        assert!(state.refresh_exchange_rate(510.0, t0()).unwrap());
        assert_eq!(state.exchange_rate(), 510.0);

        assert!(!state.refresh_exchange_rate(520.0, t0() + secs(60)).unwrap());
        assert_eq!(state.exchange_rate(), 510.0);
        assert_eq!(state.last_exchange_refresh(), Some(t0()));

        assert!(state.refresh_exchange_rate(520.0, t0() + secs(3_600)).unwrap());
        assert_eq!(state.exchange_rate(), 520.0);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-5.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn test_exchange_rate_rejects_invalid(#[case] rate: f64) {
        let mut state = ParkingState::new(station());
        assert!(matches!(
            state.refresh_exchange_rate(rate, t0()),
            Err(DomainError::InvalidExchangeRate { .. })
        ));
        assert_eq!(state.exchange_rate(), DEFAULT_EXCHANGE_RATE);
    }

    #[test]
    fn test_stats_empty_history_is_zero() {
        let state = ParkingState::new(station());
        assert_eq!(state.stats(), ParkingStats::default());
    }

    #[test]
    fn test_stats_over_history() {
        let mut state = ParkingState::new(station());
        state.refresh_exchange_rate(500.0, t0()).unwrap();

        state.enter_vehicle_at(t0()).unwrap();
        state.request_exit_at(t0() + secs(10)).unwrap();
        state.confirm_exit_at(t0() + secs(10)).unwrap();

        state.enter_vehicle_at(t0()).unwrap();
        state.request_exit_at(t0() + secs(30)).unwrap();
        state.confirm_exit_at(t0() + secs(30)).unwrap();

        let stats = state.stats();
        assert_eq!(stats.total_vehicles, 2);
        assert_eq!(stats.average_duration_secs, 20.0);
        assert_eq!(stats.total_fee, 6_000);
        assert_eq!(stats.total_fee_converted, 12.0);
    }

    #[test]
    fn test_record_round_trips_through_builder() {
        let mut state = ParkingState::new(station());
        state.refresh_exchange_rate(512.5, t0()).unwrap();
        state.enter_vehicle_at(t0()).unwrap();
        state.request_exit_at(t0() + secs(10)).unwrap();
        state.confirm_exit_at(t0() + secs(10)).unwrap();

        let restored = ParkingState::builder(station())
            .with_record(state.to_record())
            .build();

        assert_eq!(restored.history(), state.history());
        assert_eq!(restored.exchange_rate(), 512.5);
        assert_eq!(restored.last_exchange_refresh(), Some(t0()));
        assert_eq!(restored.available_spaces(), 2);
    }

    #[test]
    fn test_builder_replaces_corrupt_rate() {
        let record = StationRecord {
            exchange_rate: 0.0,
            ..StationRecord::default()
        };
        let state = ParkingState::builder(station()).with_record(record).build();
        assert_eq!(state.exchange_rate(), DEFAULT_EXCHANGE_RATE);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut state = ParkingState::new(station());
        state.enter_vehicle_at(t0()).unwrap();
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["available_spaces"], 1);
        assert_eq!(json["barrier_state"], "open");
        assert_eq!(json["spaces"][0]["space"], 1);
    }
}
