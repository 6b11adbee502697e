//! Owns every station link and keeps them connected.
//!
//! `start_all()` connects all registered links concurrently and then starts
//! a supervisor task. The supervisor wakes up every `reconnect_interval`, or
//! right away when a link loses its session, and reconnects every link that
//! is `Disconnected`. Links that are already `Connecting` are left alone.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use parklink_core::StationId;
use parklink_protocol::Command;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::link::{LinkConfig, LinkEvent, LinkState, LinkStatus, StationLink};
use crate::transport::AnyConnector;
use crate::{Result, TransportError};

type LinkMap = Arc<RwLock<HashMap<StationId, Arc<StationLink>>>>;

#[derive(Debug)]
struct Supervisor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug)]
pub struct LinkRegistry {
    config: LinkConfig,
    links: LinkMap,

    /// Shared by every link; signalled when one of them drops.
    lost: Arc<Notify>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl LinkRegistry {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            links: Arc::new(RwLock::new(HashMap::new())),
            lost: Arc::new(Notify::new()),
            supervisor: Mutex::new(None),
        }
    }

    /// Create the link for a station and return the receiver for its events.
    ///
    /// # Errors
    /// Returns `TransportError::DuplicateStation` when the station already
    /// has a link.
    pub fn register(
        &self,
        station_id: StationId,
        connector: AnyConnector,
    ) -> Result<mpsc::Receiver<LinkEvent>> {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        if links.contains_key(&station_id) {
            return Err(TransportError::DuplicateStation(station_id));
        }

        let (link, events) = StationLink::with_lost_signal(
            station_id,
            connector,
            self.config.clone(),
            Arc::clone(&self.lost),
        );
        debug!(station_id = %station_id, endpoint = %link.status().endpoint, "Link registered");
        links.insert(station_id, link);

        Ok(events)
    }

    /// Remove a station's link and close it.
    ///
    /// The supervisor stops reconnecting it and lookups return `None`.
    pub async fn unregister(&self, station_id: StationId) -> Option<Arc<StationLink>> {
        let link = self
            .links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&station_id)?;

        link.shutdown().await;
        info!(station_id = %station_id, "Link unregistered");
        Some(link)
    }

    /// Connect every link, then keep them connected.
    ///
    /// Returns how many links are connected once the first round is done.
    pub async fn start_all(&self) -> usize {
        let links = self.links();
        let results = join_all(links.iter().map(|link| link.connect())).await;
        let connected = results.iter().filter(|ok| **ok).count();

        info!(
            connected,
            total = links.len(),
            "Initial station connection round finished"
        );
        for link in links.iter().filter(|link| !link.is_connected()) {
            warn!(station_id = %link.station_id(), "Station not connected, will keep retrying");
        }

        self.spawn_supervisor();
        connected
    }

    /// Stop reconnecting and close every link.
    pub async fn stop_all(&self) {
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(Supervisor { cancel, task }) = supervisor {
            cancel.cancel();
            match task.await {
                Ok(()) => debug!("Reconnect supervisor stopped"),
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(error = %e, "Reconnect supervisor panicked"),
            }
        }

        let links = self.links();
        join_all(links.iter().map(|link| link.shutdown())).await;
        info!(count = links.len(), "All station links closed");
    }

    pub fn link_for(&self, station_id: StationId) -> Option<Arc<StationLink>> {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&station_id)
            .cloned()
    }

    pub fn is_connected(&self, station_id: StationId) -> bool {
        self.link_for(station_id)
            .is_some_and(|link| link.is_connected())
    }

    /// Send one command to a station.
    ///
    /// # Errors
    /// `TransportError::NotConnected` for unknown or disconnected stations,
    /// or the transport error of the failed write.
    pub async fn send(&self, station_id: StationId, command: Command) -> Result<()> {
        let link = self
            .link_for(station_id)
            .ok_or(TransportError::NotConnected(station_id))?;
        link.send(command).await
    }

    /// Registered station ids in ascending order.
    pub fn station_ids(&self) -> Vec<StationId> {
        let mut ids: Vec<_> = self
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Connection status of every link, keyed by station.
    pub fn statuses(&self) -> BTreeMap<StationId, LinkStatus> {
        self.links()
            .iter()
            .map(|link| (link.station_id(), link.status()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn links(&self) -> Vec<Arc<StationLink>> {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn spawn_supervisor(&self) {
        let mut supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if supervisor.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            Arc::clone(&self.links),
            Arc::clone(&self.lost),
            self.config.reconnect_interval,
            cancel.clone(),
        ));
        *supervisor = Some(Supervisor { cancel, task });
    }
}

async fn supervise(
    links: LinkMap,
    lost: Arc<Notify>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    debug!(interval_ms = interval.as_millis() as u64, "Reconnect supervisor started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = lost.notified() => {}
            _ = ticker.tick() => {}
        }

        let dropped: Vec<_> = links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|link| link.state() == LinkState::Disconnected)
            .cloned()
            .collect();
        if dropped.is_empty() {
            continue;
        }

        debug!(count = dropped.len(), "Reconnecting dropped stations");
        let round = join_all(dropped.iter().map(|link| link.connect()));
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            results = round => results,
        };

        for (link, ok) in dropped.iter().zip(results) {
            if ok {
                info!(station_id = %link.station_id(), "Station reconnected");
            } else {
                debug!(station_id = %link.station_id(), "Station still unreachable");
            }
        }
    }
}
