//! Serial transport for stations wired over USB/UART.
//!
//! The port is opened at 115200 baud, 8-N-1, no flow control. Most station
//! boards reset when the port opens, so the connector waits a settle delay
//! and then clears both buffers before the first read; whatever the board
//! printed while booting is discarded.
//!
//! `serialport` is blocking, so every read and write runs on the blocking
//! pool. Reads are bounded by the port timeout and a timeout is reported
//! as [`ReadOutcome::Idle`].

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use parklink_core::StationId;
use parklink_core::constants::{
    DEFAULT_READ_TIMEOUT_MS, DEFAULT_SERIAL_SETTLE_MS, DEFAULT_WRITE_TIMEOUT_MS, SERIAL_BAUD_RATE,
};
use parklink_protocol::{FrameDecoder, JsonLineCodec, OutboundFrame};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use super::{AnyReader, AnyWriter, Connector, FrameReader, FrameWriter, ReadOutcome, Session};
use crate::{Result, TransportError};

/// Bytes requested per blocking read.
const READ_CHUNK_SIZE: usize = 256;

/// Serial port settings for one station.
#[derive(Debug, Clone)]
pub struct SerialConnectorConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,

    pub baud_rate: u32,

    /// Blocking read timeout; bounds how long the read task is unresponsive.
    pub read_timeout: Duration,

    pub write_timeout: Duration,

    /// Wait after opening before the buffers are cleared.
    pub settle_delay: Duration,
}

impl SerialConnectorConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: SERIAL_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            settle_delay: Duration::from_millis(DEFAULT_SERIAL_SETTLE_MS),
        }
    }
}

#[derive(Debug)]
pub struct SerialConnector {
    station_id: StationId,
    config: SerialConnectorConfig,
}

impl SerialConnector {
    pub fn new(station_id: StationId, config: SerialConnectorConfig) -> Self {
        Self { station_id, config }
    }

    fn open_port(config: &SerialConnectorConfig) -> serialport::Result<Box<dyn SerialPort>> {
        serialport::new(&config.path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout)
            .open()
    }
}

impl Connector for SerialConnector {
    async fn open(&mut self) -> Result<Session> {
        let config = self.config.clone();
        let endpoint = self.endpoint();

        let port = tokio::task::spawn_blocking(move || Self::open_port(&config))
            .await
            .map_err(|e| TransportError::open_failed(&endpoint, e))?
            .map_err(|e| TransportError::open_failed(&endpoint, e))?;

        tokio::time::sleep(self.config.settle_delay).await;

        port.clear(ClearBuffer::All)
            .map_err(|e| TransportError::open_failed(&endpoint, e))?;

        let mut write_port = port
            .try_clone()
            .map_err(|e| TransportError::open_failed(&endpoint, e))?;
        write_port
            .set_timeout(self.config.write_timeout)
            .map_err(|e| TransportError::open_failed(&endpoint, e))?;

        info!(
            station_id = %self.station_id,
            port = %self.config.path,
            baud_rate = self.config.baud_rate,
            "Serial port opened"
        );

        Ok(Session {
            reader: AnyReader::Serial(SerialReader {
                port: Some(port),
                decoder: FrameDecoder::new(),
            }),
            writer: AnyWriter::Serial(SerialWriter {
                port: Some(write_port),
                codec: JsonLineCodec::new(),
                write_timeout: self.config.write_timeout,
            }),
            peer: self.config.path.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("serial://{}", self.config.path)
    }
}

pub struct SerialReader {
    /// Lent to the blocking pool while a read is in flight.
    port: Option<Box<dyn SerialPort>>,
    decoder: FrameDecoder,
}

impl fmt::Debug for SerialReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialReader")
            .field("port", &self.port.as_ref().and_then(|p| p.name()))
            .field("decoder", &self.decoder)
            .finish()
    }
}

impl FrameReader for SerialReader {
    async fn read_line(&mut self) -> Result<ReadOutcome> {
        if let Some(line) = self.decoder.next_frame() {
            return Ok(ReadOutcome::Line(line));
        }

        let mut port = self
            .port
            .take()
            .ok_or_else(|| TransportError::closed("serial port released"))?;

        let (port, result) = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_CHUNK_SIZE];
            let result = port.read(&mut buf).map(|n| buf[..n].to_vec());
            (port, result)
        })
        .await
        .map_err(|e| TransportError::closed(e.to_string()))?;
        self.port = Some(port);

        match result {
            Ok(bytes) => {
                let _ = self.decoder.feed(&bytes);
                Ok(self
                    .decoder
                    .next_frame()
                    .map_or(ReadOutcome::Idle, ReadOutcome::Line))
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(ReadOutcome::Idle),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct SerialWriter {
    port: Option<Box<dyn SerialPort>>,
    codec: JsonLineCodec,
    write_timeout: Duration,
}

impl fmt::Debug for SerialWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialWriter")
            .field("port", &self.port.as_ref().and_then(|p| p.name()))
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl FrameWriter for SerialWriter {
    async fn write_frame(&mut self, frame: OutboundFrame) -> Result<()> {
        let bytes = self.codec.encode_to_vec(frame)?;
        let mut port = self
            .port
            .take()
            .ok_or_else(|| TransportError::closed("serial port released"))?;

        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = port.write_all(&bytes).and_then(|()| port.flush());
            (port, result)
        })
        .await
        .map_err(|e| TransportError::closed(e.to_string()))?;
        self.port = Some(port);

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(TransportError::WriteTimeout(
                self.write_timeout.as_millis() as u64,
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&mut self) {
        if let Some(port) = self.port.take() {
            debug!(port = ?port.name(), "Releasing serial port");
        }
    }
}
