//! Byte transports to a station.
//!
//! A [`Connector`] opens a [`Session`]: a reader half driven by the link's
//! read task and a writer half shared behind the link's write lock. The
//! halves are independent so that a slow station never blocks the writer
//! behind a pending read.
//!
//! # Enum Dispatch
//!
//! Native `async fn` in traits is not object-safe, so the link holds the
//! concrete [`AnyConnector`] / [`AnyReader`] / [`AnyWriter`] enums instead
//! of `Box<dyn ...>`.

pub mod mock;
pub mod serial;
pub mod tcp;

use parklink_protocol::OutboundFrame;

use crate::Result;
use mock::{MockConnector, MockReader, MockWriter};
use serial::{SerialConnector, SerialReader, SerialWriter};
use tcp::{TcpConnector, TcpReader, TcpWriter};

/// Result of one bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete, trimmed, non-empty line.
    Line(String),

    /// Nothing arrived within the read timeout. Not an error.
    Idle,

    /// The peer closed the stream.
    Closed,

    /// Another station connected to the same endpoint and replaced this one.
    Displaced,
}

/// An open transport split into its two halves.
#[derive(Debug)]
pub struct Session {
    pub reader: AnyReader,
    pub writer: AnyWriter,

    /// Human-readable description of the other end.
    pub peer: String,
}

/// Opens sessions to one station.
pub trait Connector {
    /// Open a fresh session.
    ///
    /// Stale input from an earlier session must not leak into the new one.
    async fn open(&mut self) -> Result<Session>;

    /// Endpoint description used in logs and errors.
    fn endpoint(&self) -> String;
}

/// Read half of a session.
pub trait FrameReader {
    /// Wait for the next line, at most for the configured read timeout.
    async fn read_line(&mut self) -> Result<ReadOutcome>;
}

/// Write half of a session.
pub trait FrameWriter {
    /// Write one frame followed by a newline.
    async fn write_frame(&mut self, frame: OutboundFrame) -> Result<()>;

    /// Flush and release the transport. Never fails.
    async fn close(&mut self);
}

#[derive(Debug)]
#[non_exhaustive]
pub enum AnyConnector {
    Tcp(TcpConnector),
    Serial(SerialConnector),
    Mock(MockConnector),
}

impl Connector for AnyConnector {
    async fn open(&mut self) -> Result<Session> {
        match self {
            Self::Tcp(connector) => connector.open().await,
            Self::Serial(connector) => connector.open().await,
            Self::Mock(connector) => connector.open().await,
        }
    }

    fn endpoint(&self) -> String {
        match self {
            Self::Tcp(connector) => connector.endpoint(),
            Self::Serial(connector) => connector.endpoint(),
            Self::Mock(connector) => connector.endpoint(),
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum AnyReader {
    Tcp(TcpReader),
    Serial(SerialReader),
    Mock(MockReader),
}

impl FrameReader for AnyReader {
    async fn read_line(&mut self) -> Result<ReadOutcome> {
        match self {
            Self::Tcp(reader) => reader.read_line().await,
            Self::Serial(reader) => reader.read_line().await,
            Self::Mock(reader) => reader.read_line().await,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum AnyWriter {
    Tcp(TcpWriter),
    Serial(SerialWriter),
    Mock(MockWriter),
}

impl FrameWriter for AnyWriter {
    async fn write_frame(&mut self, frame: OutboundFrame) -> Result<()> {
        match self {
            Self::Tcp(writer) => writer.write_frame(frame).await,
            Self::Serial(writer) => writer.write_frame(frame).await,
            Self::Mock(writer) => writer.write_frame(frame).await,
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Tcp(writer) => writer.close().await,
            Self::Serial(writer) => writer.close().await,
            Self::Mock(writer) => writer.close().await,
        }
    }
}
