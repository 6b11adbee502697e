//! Deferred barrier close.
//!
//! Every barrier opened by the dispatcher closes again after a fixed delay.
//! There is at most one pending close per station: scheduling again replaces
//! (and aborts) the previous one, so a vehicle that arrives while the
//! barrier is still open gets the full delay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use parklink_core::{BarrierState, StationId};
use parklink_network::LinkRegistry;
use parklink_parking::ParkingStation;
use parklink_protocol::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug)]
struct PendingClose {
    ticket: u64,
    task: JoinHandle<()>,
}

#[derive(Debug)]
pub struct BarrierScheduler {
    delay: Duration,
    registry: Arc<LinkRegistry>,
    pending: Mutex<HashMap<StationId, PendingClose>>,
    next_ticket: AtomicU64,
}

impl BarrierScheduler {
    pub fn new(registry: Arc<LinkRegistry>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            registry,
            pending: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Close the station's barrier after the delay, replacing any pending close.
    pub fn schedule_close(self: &Arc<Self>, station: Arc<ParkingStation>) {
        let station_id = station.id();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        // Held until the entry is in place, so even a zero delay finds it.
        let mut pending = self.lock_pending();

        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(scheduler.delay).await;
            scheduler.fire(&station, ticket).await;
        });

        if let Some(previous) = pending.insert(station_id, PendingClose { ticket, task }) {
            previous.task.abort();
            debug!(station_id = %station_id, "Pending barrier close replaced");
        }
    }

    /// Drop the pending close of a station. Returns whether one existed.
    pub fn cancel(&self, station_id: StationId) -> bool {
        match self.lock_pending().remove(&station_id) {
            Some(pending) => {
                pending.task.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every pending close. Returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.lock_pending().drain().collect();
        for (_, pending) in &drained {
            pending.task.abort();
        }
        drained.len()
    }

    pub fn is_pending(&self, station_id: StationId) -> bool {
        self.lock_pending().contains_key(&station_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    async fn fire(&self, station: &ParkingStation, ticket: u64) {
        let station_id = station.id();
        {
            let mut pending = self.lock_pending();
            if pending.get(&station_id).is_none_or(|p| p.ticket != ticket) {
                return;
            }
            pending.remove(&station_id);
        }

        // Unregistered, or closed by `stop_all()`.
        let torn_down = self
            .registry
            .link_for(station_id)
            .is_none_or(|link| link.is_closed());
        if torn_down {
            debug!(station_id = %station_id, "Station link torn down, barrier close skipped");
            return;
        }

        station.control_barrier(BarrierState::Closed);
        match self
            .registry
            .send(station_id, Command::barrier(BarrierState::Closed))
            .await
        {
            Ok(()) => debug!(station_id = %station_id, "Barrier closed"),
            Err(e) => warn!(station_id = %station_id, error = %e, "Barrier close not delivered"),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<StationId, PendingClose>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
