//! Property tests for occupancy accounting under arbitrary event sequences.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parklink_core::{DomainError, StationId};
use parklink_parking::{ParkingConfig, ParkingState};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Event {
    Enter,
    RequestExit,
    ConfirmExit,
    Take(u8),
    Release(u8),
    Wait(i64),
}

fn any_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::Enter),
        Just(Event::RequestExit),
        Just(Event::ConfirmExit),
        (0u8..6).prop_map(Event::Take),
        (0u8..6).prop_map(Event::Release),
        (0i64..120).prop_map(Event::Wait),
    ]
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
}

fn check_invariants(state: &ParkingState) -> Result<(), TestCaseError> {
    prop_assert!(state.available_spaces() <= state.total_spaces());
    prop_assert_eq!(
        state.available_spaces() + state.occupied_count(),
        state.total_spaces()
    );
    prop_assert!(state.occupied_vehicles().len() <= usize::from(state.total_spaces()));

    if let Some(pending) = state.pending_exit() {
        prop_assert!(
            state
                .occupied_vehicles()
                .iter()
                .any(|v| &v.vehicle_id == pending)
        );
    }

    for visit in state.history() {
        prop_assert!(visit.exit_time >= visit.entry_time);
        prop_assert_eq!(visit.fee, state.calculate_fee(visit.duration_secs));
    }
    Ok(())
}

proptest! {
    /// Property: no sequence of events breaks occupancy accounting.
    #[test]
    fn prop_occupancy_invariants_hold(
        total_spaces in 1u8..=4,
        events in prop::collection::vec(any_event(), 0..64),
    ) {
        let mut state = ParkingState::builder(StationId::new(1).unwrap())
            .with_config(ParkingConfig { total_spaces, ..ParkingConfig::default() })
            .build();
        let mut now = start();

        for event in events {
            match event {
                Event::Enter => {
                    let was_available = state.available_spaces();
                    match state.enter_vehicle_at(now) {
                        Ok(_) => prop_assert_eq!(state.available_spaces(), was_available - 1),
                        Err(err) => {
                            prop_assert_eq!(err, DomainError::NoCapacity);
                            prop_assert_eq!(was_available, 0);
                        }
                    }
                }
                Event::RequestExit => {
                    let vehicles = state.occupied_vehicles().len();
                    let result = state.request_exit_at(now);
                    prop_assert_eq!(result.is_err(), vehicles == 0);
                }
                Event::ConfirmExit => {
                    let had_pending = state.pending_exit().is_some();
                    let history = state.history().len();
                    let result = state.confirm_exit_at(now);
                    prop_assert_eq!(result.is_ok(), had_pending);
                    prop_assert_eq!(state.history().len(), history + usize::from(had_pending));
                }
                Event::Take(space) => {
                    let _ = state.take_manual_space(space);
                }
                Event::Release(space) => {
                    let _ = state.release_manual_space(space);
                }
                Event::Wait(secs) => now += Duration::seconds(secs),
            }
            check_invariants(&state)?;
        }
    }

    /// Property: fees never decrease with duration and every started unit is billed.
    #[test]
    fn prop_fee_is_monotonic(a in 0u64..100_000, b in 0u64..100_000) {
        let state = ParkingState::new(StationId::new(1).unwrap());
        let (short, long) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(state.calculate_fee(short) <= state.calculate_fee(long));
        prop_assert!(state.calculate_fee(short) >= 1_000);
        prop_assert_eq!(state.calculate_fee(short) % 1_000, 0);
    }
}
