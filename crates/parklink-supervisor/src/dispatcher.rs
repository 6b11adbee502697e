//! Turns station messages into parking transitions and station commands.
//!
//! Each station has its own dispatcher task fed by its link's events, so
//! one slow station never delays another. Reacting to a message happens in
//! two steps:
//!
//! 1. under the station lock, apply the transition and plan the commands
//!    to send (a [`Reaction`]);
//! 2. with the lock released, send the planned commands.

use std::sync::Arc;

use parklink_core::{BarrierState, DomainError, StationId};
use parklink_network::{LinkEvent, LinkRegistry};
use parklink_parking::{ParkingState, ParkingStation};
use parklink_protocol::{Button, Command, Message};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scheduler::BarrierScheduler;

/// What a transition asks the station to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reaction {
    /// Sent first, in order.
    pub commands: Vec<Command>,

    /// Schedule a deferred barrier close once `commands` are sent.
    pub close_barrier: bool,

    /// Sent after the barrier close is scheduled.
    pub display: Option<Command>,
}

impl Reaction {
    fn display_only(state: &ParkingState) -> Self {
        Self {
            display: Some(current_display(state)),
            ..Self::default()
        }
    }

    fn open_barrier(state: &ParkingState) -> Self {
        Self {
            commands: vec![Command::barrier(BarrierState::Open)],
            close_barrier: true,
            display: Some(current_display(state)),
        }
    }
}

fn current_display(state: &ParkingState) -> Command {
    Command::display(state.display_value(), state.display_mode())
}

/// Apply one message to the state and plan the commands it triggers.
pub fn react(state: &mut ParkingState, message: &Message) -> Reaction {
    let station_id = state.station_id();

    match message {
        Message::SensorUpdate {
            space1_occupied,
            space2_occupied,
        } => {
            for (space, occupied) in [(1u8, *space1_occupied), (2u8, *space2_occupied)] {
                reconcile_space(state, space, occupied);
            }
            Reaction::display_only(state)
        }

        Message::ButtonPress {
            button: Button::Enter,
        } => match state.enter_vehicle() {
            Ok((vehicle_id, space)) => {
                info!(
                    station_id = %station_id,
                    vehicle_id = %vehicle_id,
                    space = %space,
                    available = state.available_spaces(),
                    "Vehicle entered"
                );
                Reaction::open_barrier(state)
            }
            Err(e) => {
                warn!(station_id = %station_id, error = %e, "Entry refused");
                Reaction::default()
            }
        },

        Message::ButtonPress {
            button: Button::Exit,
        } => {
            if state.pending_exit().is_some() {
                match state.confirm_exit() {
                    Ok(visit) => {
                        info!(
                            station_id = %station_id,
                            vehicle_id = %visit.vehicle_id,
                            duration_secs = visit.duration_secs,
                            fee = visit.fee,
                            "Vehicle exited"
                        );
                        Reaction::open_barrier(state)
                    }
                    Err(e) => {
                        warn!(station_id = %station_id, error = %e, "Exit confirmation failed");
                        Reaction::default()
                    }
                }
            } else {
                match state.request_exit() {
                    Ok(quote) => {
                        info!(
                            station_id = %station_id,
                            vehicle_id = %quote.vehicle_id,
                            fee = quote.fee,
                            "Exit requested"
                        );
                        Reaction::display_only(state)
                    }
                    Err(DomainError::NoVehicles) => {
                        info!(station_id = %station_id, "Exit pressed with an empty lot");
                        Reaction::default()
                    }
                    Err(e) => {
                        warn!(station_id = %station_id, error = %e, "Exit request failed");
                        Reaction::default()
                    }
                }
            }
        }

        Message::ConnectionAnnounce { mac, status } => {
            info!(
                station_id = %station_id,
                mac = mac.as_deref().unwrap_or("unknown"),
                status = status.as_deref().unwrap_or("unknown"),
                "Station announced itself"
            );
            Reaction::display_only(state)
        }
    }
}

/// Follow one sensor reading, acting only on a change of the sensed value.
fn reconcile_space(state: &mut ParkingState, space: u8, occupied: bool) {
    let station_id = state.station_id();

    let known = match state.is_space_sensed(space) {
        Ok(known) => known,
        Err(_) => {
            debug!(station_id = %station_id, space, "Sensor reading for a space the station lacks");
            return;
        }
    };
    if known == occupied {
        return;
    }

    let changed = if occupied {
        state.take_manual_space(space)
    } else {
        state.release_manual_space(space)
    };
    debug!(
        station_id = %station_id,
        space,
        occupied,
        availability_changed = changed.unwrap_or(false),
        "Sensor changed"
    );
}

/// Per-station event loop.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    station: Arc<ParkingStation>,
    registry: Arc<LinkRegistry>,
    scheduler: Arc<BarrierScheduler>,
}

impl Dispatcher {
    pub fn new(
        station: Arc<ParkingStation>,
        registry: Arc<LinkRegistry>,
        scheduler: Arc<BarrierScheduler>,
    ) -> Self {
        Self {
            station,
            registry,
            scheduler,
        }
    }

    pub fn station_id(&self) -> StationId {
        self.station.id()
    }

    /// Handle events until the link's channel closes or `cancel` fires.
    pub async fn run(self, mut events: mpsc::Receiver<LinkEvent>, cancel: CancellationToken) {
        debug!(station_id = %self.station_id(), "Dispatcher started");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Some(event) => self.handle(event).await,
                None => break,
            }
        }

        debug!(station_id = %self.station_id(), "Dispatcher stopped");
    }

    pub async fn handle(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected(_) => {
                let display = self.station.with(|state| current_display(state));
                self.send_all([display]).await;
            }
            LinkEvent::Disconnected(station_id) => {
                debug!(station_id = %station_id, "Link down, waiting for reconnect");
            }
            LinkEvent::Message(_, message) => {
                let reaction = self.station.with(|state| react(state, &message));
                self.apply(reaction).await;
            }
        }
    }

    async fn apply(&self, reaction: Reaction) {
        let Reaction {
            commands,
            close_barrier,
            display,
        } = reaction;

        self.send_all(commands).await;
        if close_barrier {
            self.scheduler.schedule_close(Arc::clone(&self.station));
        }
        self.send_all(display).await;
    }

    /// Send in order, stopping at the first failure.
    async fn send_all(&self, commands: impl IntoIterator<Item = Command>) {
        let station_id = self.station_id();

        for command in commands {
            let kind = command.kind();
            if let Err(e) = self.registry.send(station_id, command).await {
                warn!(station_id = %station_id, command = kind, error = %e, "Command not delivered");
                return;
            }
        }
    }
}
