//! In-memory transport for tests and demos.
//!
//! A [`MockConnector`] plays the supervisor side; the paired [`MockStation`]
//! plays the physical station: it injects raw bytes (noise included), reads
//! back the frames written by the supervisor and can drop the connection or
//! refuse the next opens.
//!
//! # Examples
//!
//! ```
//! use parklink_core::StationId;
//! use parklink_network::{Connector, FrameReader, MockConnector, ReadOutcome};
//!
//! #[tokio::main]
//! async fn main() -> parklink_network::Result<()> {
//!     let (mut connector, station) = MockConnector::new(StationId::new(1).unwrap());
//!     let mut session = connector.open().await?;
//!
//!     station.send_bytes(b"noise{\"type\":\"button_press\",\"button\":\"enter\"}\n");
//!     assert!(matches!(session.reader.read_line().await?, ReadOutcome::Line(_)));
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use parklink_core::StationId;
use parklink_core::constants::DEFAULT_READ_TIMEOUT_MS;
use parklink_protocol::{FrameDecoder, OutboundFrame};
use tokio::sync::mpsc;

use super::{AnyReader, AnyWriter, Connector, FrameReader, FrameWriter, ReadOutcome, Session};
use crate::{Result, TransportError};

#[derive(Debug)]
enum StationInput {
    Bytes(Vec<u8>),
    Disconnect,
}

#[derive(Debug, Default)]
struct Shared {
    /// Input channel of the current session.
    session: Option<mpsc::UnboundedSender<StationInput>>,
    opens: usize,
    failed_opens: usize,
    fail_opens: usize,
    fail_writes: bool,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Supervisor side of the in-memory transport.
#[derive(Debug)]
pub struct MockConnector {
    station_id: StationId,
    shared: SharedState,
    outbound_tx: mpsc::UnboundedSender<String>,
    read_timeout: Duration,
}

impl MockConnector {
    /// Create a connector and the station handle that drives it.
    pub fn new(station_id: StationId) -> (Self, MockStation) {
        let shared = SharedState::default();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let connector = Self {
            station_id,
            shared: Arc::clone(&shared),
            outbound_tx,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        };
        let station = MockStation {
            station_id,
            shared,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
        };

        (connector, station)
    }
}

impl Connector for MockConnector {
    async fn open(&mut self) -> Result<Session> {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        {
            let mut shared = lock(&self.shared);
            if shared.fail_opens > 0 {
                shared.fail_opens -= 1;
                shared.failed_opens += 1;
                return Err(TransportError::open_failed(
                    self.endpoint(),
                    "station unreachable",
                ));
            }
            shared.opens += 1;
            shared.session = Some(input_tx);
        }

        Ok(Session {
            reader: AnyReader::Mock(MockReader {
                input_rx,
                decoder: FrameDecoder::new(),
                read_timeout: self.read_timeout,
            }),
            writer: AnyWriter::Mock(MockWriter {
                shared: Arc::clone(&self.shared),
                outbound_tx: self.outbound_tx.clone(),
            }),
            peer: format!("mock-station-{}", self.station_id),
        })
    }

    fn endpoint(&self) -> String {
        format!("mock://{}", self.station_id)
    }
}

#[derive(Debug)]
pub struct MockReader {
    input_rx: mpsc::UnboundedReceiver<StationInput>,
    decoder: FrameDecoder,
    read_timeout: Duration,
}

impl FrameReader for MockReader {
    async fn read_line(&mut self) -> Result<ReadOutcome> {
        loop {
            if let Some(line) = self.decoder.next_frame() {
                return Ok(ReadOutcome::Line(line));
            }

            match tokio::time::timeout(self.read_timeout, self.input_rx.recv()).await {
                Err(_) => return Ok(ReadOutcome::Idle),
                Ok(Some(StationInput::Bytes(bytes))) => {
                    let _ = self.decoder.feed(&bytes);
                }
                Ok(Some(StationInput::Disconnect)) | Ok(None) => return Ok(ReadOutcome::Closed),
            }
        }
    }
}

#[derive(Debug)]
pub struct MockWriter {
    shared: SharedState,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl FrameWriter for MockWriter {
    async fn write_frame(&mut self, frame: OutboundFrame) -> Result<()> {
        if lock(&self.shared).fail_writes {
            return Err(TransportError::closed("mock write failure"));
        }

        let json = frame.to_json().map_err(parklink_core::Error::from)?;
        // A dropped station handle just discards output.
        let _ = self.outbound_tx.send(json);
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Station side of the in-memory transport.
#[derive(Debug)]
pub struct MockStation {
    station_id: StationId,
    shared: SharedState,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MockStation {
    pub fn station_id(&self) -> StationId {
        self.station_id
    }

    /// Push raw bytes into the current session.
    ///
    /// Returns `false` when no session is open.
    pub fn send_bytes(&self, bytes: &[u8]) -> bool {
        lock(&self.shared)
            .session
            .as_ref()
            .is_some_and(|tx| tx.send(StationInput::Bytes(bytes.to_vec())).is_ok())
    }

    /// Push one JSON line into the current session.
    pub fn send_line(&self, json: &str) -> bool {
        let mut bytes = json.as_bytes().to_vec();
        bytes.push(b'\n');
        self.send_bytes(&bytes)
    }

    /// Drop the current session as if the cable was pulled.
    pub fn disconnect(&self) {
        if let Some(tx) = lock(&self.shared).session.take() {
            let _ = tx.send(StationInput::Disconnect);
        }
    }

    /// Whether a session is open and its reader is alive.
    pub fn is_connected(&self) -> bool {
        lock(&self.shared)
            .session
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Make the next `count` opens fail.
    pub fn fail_next_opens(&self, count: usize) {
        lock(&self.shared).fail_opens = count;
    }

    /// Make every write fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.shared).fail_writes = fail;
    }

    /// Successful opens so far.
    pub fn open_count(&self) -> usize {
        lock(&self.shared).opens
    }

    /// Refused opens so far.
    pub fn failed_open_count(&self) -> usize {
        lock(&self.shared).failed_opens
    }

    /// Next frame written by the supervisor, as JSON without the newline.
    pub async fn recv_frame(&self, timeout: Duration) -> Option<String> {
        let mut rx = self.outbound_rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Discard every frame written so far.
    pub async fn drain_frames(&self) -> Vec<String> {
        let mut rx = self.outbound_rx.lock().await;
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}
