//! Consumer facade over every station.
//!
//! The hub owns the [`LinkRegistry`], one [`ParkingStation`] per configured
//! station, the barrier scheduler and the dispatcher tasks. It is built
//! explicitly by the entry point; nothing in the crate is global.
//!
//! # Lifecycle
//!
//! 1. `ParkingHub::new(config)`, optionally `.with_storage(repository)`
//! 2. `add_station()` for every configured station; persisted records are
//!    loaded here
//! 3. `start()` spawns the dispatchers and connects every link
//! 4. consumer calls (`parking_system`, `enter_vehicle`, ...)
//! 5. `shutdown()` stops the tasks, closes the links and saves the records

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use parklink_core::constants::DEFAULT_AUTO_CLOSE_DELAY_MS;
use parklink_core::{
    BarrierState, DisplayMode, DomainError, SpaceNumber, StationId, VehicleId, VisitRecord,
};
use parklink_network::{AnyConnector, LinkConfig, LinkEvent, LinkRegistry, LinkStatus};
use parklink_parking::{ExitQuote, ParkingConfig, ParkingSnapshot, ParkingState, ParkingStation};
use parklink_protocol::Command;
use parklink_storage::{SqliteStationRecordRepository, StationRecordRepository};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{HubError, Result};
use crate::scheduler::BarrierScheduler;

/// Settings shared by every station of the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub link: LinkConfig,
    pub parking: ParkingConfig,

    /// Delay before a barrier opened by a station button closes again.
    pub auto_close_delay: Duration,

    /// Save station records periodically; `None` saves only on shutdown.
    pub autosave_interval: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            parking: ParkingConfig::default(),
            auto_close_delay: Duration::from_millis(DEFAULT_AUTO_CLOSE_DELAY_MS),
            autosave_interval: None,
        }
    }
}

/// How a background task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    Success,
    Cancelled,
    Panic,
}

#[derive(Debug)]
struct Running {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

#[derive(Debug)]
pub struct ParkingHub {
    config: HubConfig,
    registry: Arc<LinkRegistry>,
    scheduler: Arc<BarrierScheduler>,
    storage: Option<SqliteStationRecordRepository>,
    stations: RwLock<BTreeMap<StationId, Arc<ParkingStation>>>,

    /// Link event receivers waiting for `start()`.
    unstarted: Mutex<Vec<(StationId, mpsc::Receiver<LinkEvent>)>>,
    running: Mutex<Option<Running>>,
}

impl ParkingHub {
    pub fn new(config: HubConfig) -> Self {
        let registry = Arc::new(LinkRegistry::new(config.link.clone()));
        let scheduler = BarrierScheduler::new(Arc::clone(&registry), config.auto_close_delay);

        Self {
            config,
            registry,
            scheduler,
            storage: None,
            stations: RwLock::new(BTreeMap::new()),
            unstarted: Mutex::new(Vec::new()),
            running: Mutex::new(None),
        }
    }

    /// Persist station records in `storage`.
    pub fn with_storage(mut self, storage: SqliteStationRecordRepository) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Configure a station and its transport.
    ///
    /// The persisted record is loaded when storage is configured; an absent
    /// record means an empty history.
    ///
    /// # Errors
    /// - `HubError::AlreadyStarted` after `start()`
    /// - `HubError::DuplicateStation` for an id configured twice
    /// - `HubError::Storage` when the record cannot be read
    pub async fn add_station(&self, station_id: StationId, connector: AnyConnector) -> Result<()> {
        if self.lock_running().is_some() {
            return Err(HubError::AlreadyStarted);
        }
        if self.read_stations().contains_key(&station_id) {
            return Err(HubError::DuplicateStation(station_id));
        }

        let record = match &self.storage {
            Some(storage) => storage.load(station_id).await?,
            None => None,
        };
        let restored = record.as_ref().map_or(0, |r| r.visit_history.len());

        let mut builder =
            ParkingState::builder(station_id).with_config(self.config.parking.clone());
        if let Some(record) = record {
            builder = builder.with_record(record);
        }
        let station = Arc::new(ParkingStation::new(builder.build()));

        let events = self
            .registry
            .register(station_id, connector)
            .map_err(|_| HubError::DuplicateStation(station_id))?;

        self.write_stations().insert(station_id, station);
        self.lock_unstarted().push((station_id, events));

        info!(station_id = %station_id, restored_visits = restored, "Station configured");
        Ok(())
    }

    /// Spawn the dispatchers and connect every station.
    ///
    /// Returns how many stations are connected after the first round;
    /// the others keep being retried in the background.
    pub async fn start(self: &Arc<Self>) -> usize {
        {
            let mut running = self.lock_running();
            if running.is_some() {
                return self.registry.statuses().values().filter(|s| s.is_connected()).count();
            }

            let cancel = CancellationToken::new();
            let mut tasks = JoinSet::new();

            for (station_id, events) in self.lock_unstarted().drain(..) {
                let Some(station) = self.read_stations().get(&station_id).cloned() else {
                    continue;
                };
                let dispatcher = Dispatcher::new(
                    station,
                    Arc::clone(&self.registry),
                    Arc::clone(&self.scheduler),
                );
                tasks.spawn(dispatcher.run(events, cancel.child_token()));
            }

            if let Some(interval) = self.config.autosave_interval
                && self.storage.is_some()
            {
                tasks.spawn(Arc::clone(self).autosave(interval, cancel.child_token()));
            }

            *running = Some(Running { cancel, tasks });
        }

        let connected = self.registry.start_all().await;
        info!(stations = self.registry.len(), connected, "Parking hub started");
        connected
    }

    /// Stop every task, close the links and save the records.
    ///
    /// # Errors
    /// Returns `HubError::Storage` when saving fails; the links are closed
    /// regardless.
    pub async fn shutdown(&self) -> Result<()> {
        let running = self.lock_running().take();

        if let Some(Running { cancel, mut tasks }) = running {
            cancel.cancel();
            let mut panics = 0;
            while let Some(result) = tasks.join_next().await {
                if Self::classify_task_result(result) == TaskTermination::Panic {
                    panics += 1;
                }
            }
            if panics > 0 {
                error!(panics, "Hub tasks panicked before shutdown");
            }
        }

        let cancelled = self.scheduler.cancel_all();
        debug!(cancelled, "Pending barrier closes dropped");

        self.registry.stop_all().await;
        self.save().await?;

        info!("Parking hub stopped");
        Ok(())
    }

    /// Write every station's record to storage, if configured.
    pub async fn save(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        for station in self.stations() {
            let record = station.with(|state| state.to_record());
            storage.save(station.id(), &record).await?;
        }
        debug!("Station records saved");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn station_ids(&self) -> Vec<StationId> {
        self.read_stations().keys().copied().collect()
    }

    /// Snapshot of a station's parking state.
    pub fn parking_system(&self, station_id: StationId) -> Result<ParkingSnapshot> {
        Ok(self.station(station_id)?.snapshot())
    }

    /// Whether the station's link is connected; `false` for unknown stations.
    pub fn connection_status(&self, station_id: StationId) -> bool {
        self.registry.is_connected(station_id)
    }

    pub fn link_statuses(&self) -> BTreeMap<StationId, LinkStatus> {
        self.registry.statuses()
    }

    // ------------------------------------------------------------------
    // Local actions
    // ------------------------------------------------------------------

    pub async fn enter_vehicle(&self, station_id: StationId) -> Result<(VehicleId, SpaceNumber)> {
        let station = self.station(station_id)?;
        let entered = station.enter_vehicle()?;
        self.resync_display(&station).await;
        Ok(entered)
    }

    pub async fn request_exit(&self, station_id: StationId) -> Result<ExitQuote> {
        let station = self.station(station_id)?;
        let quote = station.request_exit()?;
        self.resync_display(&station).await;
        Ok(quote)
    }

    pub async fn confirm_exit(&self, station_id: StationId) -> Result<VisitRecord> {
        let station = self.station(station_id)?;
        let visit = station.confirm_exit()?;
        self.resync_display(&station).await;
        Ok(visit)
    }

    /// Mark a space taken; returns whether availability changed.
    pub async fn take_manual_space(&self, station_id: StationId, space: u8) -> Result<bool> {
        let station = self.station(station_id)?;
        let changed = station.take_manual_space(space)?;
        self.resync_display(&station).await;
        Ok(changed)
    }

    /// Mark a space free; returns whether availability changed.
    pub async fn release_manual_space(&self, station_id: StationId, space: u8) -> Result<bool> {
        let station = self.station(station_id)?;
        let changed = station.release_manual_space(space)?;
        self.resync_display(&station).await;
        Ok(changed)
    }

    /// Move the barrier; the recorded state changes only once the command is sent.
    pub async fn control_barrier(&self, station_id: StationId, state: BarrierState) -> Result<()> {
        let station = self.station(station_id)?;
        self.registry
            .send(station_id, Command::barrier(state))
            .await?;
        station.control_barrier(state);
        Ok(())
    }

    /// Switch a space LED.
    pub async fn control_led(&self, station_id: StationId, space: u8, on: bool) -> Result<()> {
        let station = self.station(station_id)?;
        let total = station.with(|state| state.total_spaces());
        let space = SpaceNumber::new(space, total)?;

        self.registry
            .send(station_id, Command::LedControl { space, on })
            .await?;
        Ok(())
    }

    /// Show a value on the station display; the recorded display follows.
    pub async fn update_display(
        &self,
        station_id: StationId,
        value: impl Into<String>,
        mode: DisplayMode,
    ) -> Result<()> {
        let station = self.station(station_id)?;
        let value = value.into();

        self.registry
            .send(station_id, Command::display(&value, mode))
            .await?;
        station.set_display(mode, value);
        Ok(())
    }

    /// Offer a new exchange rate to every station.
    ///
    /// Returns how many stations accepted it; a station refreshed less than
    /// the refresh interval ago keeps its rate.
    ///
    /// # Errors
    /// `HubError::Domain` for a rate that is not a positive finite number.
    pub fn refresh_exchange_rate(&self, rate: f64) -> Result<usize> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(DomainError::InvalidExchangeRate { rate }.into());
        }

        let now = Utc::now();
        let mut accepted = 0;
        for station in self.stations() {
            if station.with(|state| state.refresh_exchange_rate(rate, now))? {
                accepted += 1;
            }
        }

        info!(rate, accepted, "Exchange rate offered");
        Ok(accepted)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn station(&self, station_id: StationId) -> Result<Arc<ParkingStation>> {
        self.read_stations()
            .get(&station_id)
            .cloned()
            .ok_or(HubError::UnknownStation(station_id))
    }

    fn stations(&self) -> Vec<Arc<ParkingStation>> {
        self.read_stations().values().cloned().collect()
    }

    /// Best effort: a disconnected station gets the display on reconnect.
    async fn resync_display(&self, station: &ParkingStation) {
        let station_id = station.id();
        if !self.registry.is_connected(station_id) {
            return;
        }

        let command = station.with(|state| Command::display(state.display_value(), state.display_mode()));
        if let Err(e) = self.registry.send(station_id, command).await {
            warn!(station_id = %station_id, error = %e, "Display resync failed");
        }
    }

    async fn autosave(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.save().await {
                warn!(error = %e, "Periodic save failed");
            }
        }
    }

    fn classify_task_result(result: std::result::Result<(), tokio::task::JoinError>) -> TaskTermination {
        match result {
            Ok(()) => TaskTermination::Success,
            Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
            Err(_) => TaskTermination::Panic,
        }
    }

    fn read_stations(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, BTreeMap<StationId, Arc<ParkingStation>>> {
        self.stations.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_stations(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, BTreeMap<StationId, Arc<ParkingStation>>> {
        self.stations.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_unstarted(&self) -> MutexGuard<'_, Vec<(StationId, mpsc::Receiver<LinkEvent>)>> {
        self.unstarted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
