//! TCP transport: one listening socket per station.
//!
//! The supervisor listens on `base_port + station_id` and each station
//! connects as a client. Only one client is served per station; a new
//! connection displaces the current one:
//!
//! ```text
//! station (old) ──X
//!                    TcpListener :5001 ──> TcpReader ──> StationLink
//! station (new) ──────┘  accepted while the old session reads,
//!                        parked in the pending slot, served by the next open()
//! ```
//!
//! Every accepted client immediately receives a welcome frame:
//!
//! ```text
//! {"type":"welcome","status":"connected","message":"Connection established","parking_id":1}
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parklink_core::constants::{
    CLOSE_TIMEOUT_MS, DEFAULT_ACCEPT_TIMEOUT_MS, DEFAULT_READ_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS,
};
use parklink_core::{Error, StationId};
use parklink_protocol::{Command, JsonLineCodec, OutboundFrame};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::{AnyReader, AnyWriter, Connector, FrameReader, FrameWriter, ReadOutcome, Session};
use crate::{Result, TransportError};

type PendingSlot = Arc<Mutex<Option<(TcpStream, SocketAddr)>>>;

/// Configuration for a station's TCP endpoint.
///
/// # Example
///
/// ```
/// use parklink_core::StationId;
/// use parklink_network::TcpConnectorConfig;
///
/// let station = StationId::new(3).unwrap();
/// let config = TcpConnectorConfig::for_station(station, 5000).unwrap();
/// assert_eq!(config.bind_addr.port(), 5003);
/// ```
#[derive(Debug, Clone)]
pub struct TcpConnectorConfig {
    /// Address the station listener binds to.
    pub bind_addr: SocketAddr,

    /// How long one connect attempt waits for a station to show up.
    pub accept_timeout: Duration,

    /// Idle read timeout.
    pub read_timeout: Duration,

    /// Timeout for a single frame write.
    pub write_timeout: Duration,
}

impl TcpConnectorConfig {
    /// Listen on all interfaces at `base_port + station`.
    ///
    /// # Errors
    /// Returns `Error::Config` when the port does not fit in a `u16`.
    pub fn for_station(station: StationId, base_port: u16) -> parklink_core::Result<Self> {
        let port = station.port_from(base_port).ok_or_else(|| {
            Error::config(format!(
                "base port {base_port} + station {station} exceeds {}",
                u16::MAX
            ))
        })?;

        Ok(Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        })
    }
}

impl Default for TcpConnectorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            accept_timeout: Duration::from_millis(DEFAULT_ACCEPT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }
}

/// Accepts one station client at a time on the station's port.
///
/// The listener is bound on the first `open()` and kept for the lifetime of
/// the connector, so stations can reconnect to the same port.
#[derive(Debug)]
pub struct TcpConnector {
    station_id: StationId,
    config: TcpConnectorConfig,
    listener: Option<Arc<TcpListener>>,

    /// Client accepted by a reader while an older session was active.
    pending: PendingSlot,
}

impl TcpConnector {
    pub fn new(station_id: StationId, config: TcpConnectorConfig) -> Self {
        Self {
            station_id,
            config,
            listener: None,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Bound address, once the listener exists.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Bind the listener now instead of on the first `open()`.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let listener = self.listener().await?;
        Ok(listener.local_addr()?)
    }

    async fn listener(&mut self) -> Result<Arc<TcpListener>> {
        if let Some(listener) = &self.listener {
            return Ok(Arc::clone(listener));
        }

        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| TransportError::open_failed(self.endpoint(), e))?;
        info!(
            station_id = %self.station_id,
            addr = %self.config.bind_addr,
            "Station listener bound"
        );

        let listener = Arc::new(listener);
        self.listener = Some(Arc::clone(&listener));
        Ok(listener)
    }

    async fn next_client(&self, listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = pending {
            return Ok(client);
        }

        match tokio::time::timeout(self.config.accept_timeout, listener.accept()).await {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::AcceptTimeout {
                endpoint: self.endpoint(),
                timeout_ms: self.config.accept_timeout.as_millis() as u64,
            }),
        }
    }
}

impl Connector for TcpConnector {
    async fn open(&mut self) -> Result<Session> {
        let listener = self.listener().await?;
        let (stream, addr) = self.next_client(&listener).await?;

        // Commands are tiny and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            warn!(station_id = %self.station_id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let mut writer = TcpWriter {
            framed: FramedWrite::new(write_half, JsonLineCodec::new()),
            write_timeout: self.config.write_timeout,
        };
        writer
            .write_frame(OutboundFrame::new(self.station_id, Command::welcome()))
            .await?;

        info!(station_id = %self.station_id, peer = %addr, "Station connected over TCP");

        let reader = TcpReader {
            station_id: self.station_id,
            framed: FramedRead::new(read_half, JsonLineCodec::new()),
            listener,
            pending: Arc::clone(&self.pending),
            read_timeout: self.config.read_timeout,
        };

        Ok(Session {
            reader: AnyReader::Tcp(reader),
            writer: AnyWriter::Tcp(writer),
            peer: addr.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.config.bind_addr)
    }
}

#[derive(Debug)]
pub struct TcpReader {
    station_id: StationId,
    framed: FramedRead<OwnedReadHalf, JsonLineCodec>,
    listener: Arc<TcpListener>,
    pending: PendingSlot,
    read_timeout: Duration,
}

impl FrameReader for TcpReader {
    async fn read_line(&mut self) -> Result<ReadOutcome> {
        tokio::select! {
            next = tokio::time::timeout(self.read_timeout, self.framed.next()) => match next {
                Err(_) => Ok(ReadOutcome::Idle),
                Ok(Some(Ok(line))) => Ok(ReadOutcome::Line(line)),
                Ok(Some(Err(e))) => Err(e.into()),
                Ok(None) => Ok(ReadOutcome::Closed),
            },
            accepted = self.listener.accept() => {
                let (stream, addr) = accepted?;
                info!(
                    station_id = %self.station_id,
                    peer = %addr,
                    "New station client displaces the current one"
                );
                *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some((stream, addr));
                Ok(ReadOutcome::Displaced)
            }
        }
    }
}

#[derive(Debug)]
pub struct TcpWriter {
    framed: FramedWrite<OwnedWriteHalf, JsonLineCodec>,
    write_timeout: Duration,
}

impl FrameWriter for TcpWriter {
    async fn write_frame(&mut self, frame: OutboundFrame) -> Result<()> {
        match tokio::time::timeout(self.write_timeout, self.framed.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::WriteTimeout(
                self.write_timeout.as_millis() as u64
            )),
        }
    }

    async fn close(&mut self) {
        let close_timeout = Duration::from_millis(CLOSE_TIMEOUT_MS);

        match tokio::time::timeout(close_timeout, self.framed.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Error flushing during close"),
            Err(_) => debug!("Flush timeout during close ({}ms)", CLOSE_TIMEOUT_MS),
        }

        match tokio::time::timeout(close_timeout, self.framed.get_mut().shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Error during shutdown"),
            Err(_) => debug!("Shutdown timeout during close ({}ms)", CLOSE_TIMEOUT_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> StationId {
        StationId::new(1).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = TcpConnectorConfig::default();
        assert_eq!(config.accept_timeout.as_millis(), 5000);
        assert_eq!(config.read_timeout.as_millis(), 100);
        assert_eq!(config.write_timeout.as_millis(), 500);
    }

    #[test]
    fn test_for_station_port_overflow() {
        let station = StationId::new(99).unwrap();
        assert!(TcpConnectorConfig::for_station(station, u16::MAX - 10).is_err());
        assert_eq!(
            TcpConnectorConfig::for_station(station, u16::MAX - 99)
                .unwrap()
                .bind_addr
                .port(),
            u16::MAX
        );
    }

    #[tokio::test]
    async fn test_open_times_out_without_client() {
        let config = TcpConnectorConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            accept_timeout: Duration::from_millis(50),
            ..TcpConnectorConfig::default()
        };
        let mut connector = TcpConnector::new(station(), config);

        let result = connector.open().await;
        assert!(matches!(result, Err(TransportError::AcceptTimeout { .. })));
        assert!(connector.local_addr().is_some());
    }

    #[tokio::test]
    async fn test_open_sends_welcome() {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let config = TcpConnectorConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..TcpConnectorConfig::default()
        };
        let mut connector = TcpConnector::new(station(), config);

        let addr = connector.bind().await.unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let session = connector.open().await.unwrap();
        assert!(session.peer.starts_with("127.0.0.1:"));

        let welcome = client.await.unwrap();
        assert_eq!(
            welcome,
            r#"{"type":"welcome","status":"connected","message":"Connection established","parking_id":1}"#
        );
    }
}
