//! Tokio codec for the station line protocol.
//!
//! [`JsonLineCodec`] wraps a [`FrameDecoder`] so that async transports can use
//! `FramedRead` / `FramedWrite`:
//! - [`Decoder`] yields raw lines. JSON extraction is left to
//!   [`parse_message`](crate::parse_message) so that one garbled line never
//!   terminates the framed stream.
//! - [`Encoder<OutboundFrame>`] writes one JSON object followed by a newline.
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use parklink_core::{BarrierState, StationId};
//! use parklink_protocol::{Command, JsonLineCodec, OutboundFrame, parse_message};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> parklink_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:5001").await?;
//! let mut framed = Framed::new(stream, JsonLineCodec::new());
//!
//! let station = StationId::new(1)?;
//! framed
//!     .send(OutboundFrame::new(station, Command::barrier(BarrierState::Open)))
//!     .await?;
//!
//! while let Some(Ok(line)) = framed.next().await {
//!     if let Ok(inbound) = parse_message(&line) {
//!         println!("{:?}", inbound.message);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use bytes::BytesMut;
use parklink_core::constants::{FRAME_DELIMITER, MAX_LINE_LENGTH};
use parklink_core::{Error, ProtocolError, Result};
use tokio_util::codec::{Decoder, Encoder};

use crate::{FrameDecoder, OutboundFrame};

/// Tokio codec for newline-delimited JSON frames.
#[derive(Debug)]
pub struct JsonLineCodec {
    decoder: FrameDecoder,

    /// Largest encoded frame accepted by the encoder, newline included.
    max_frame_size: usize,
}

impl JsonLineCodec {
    /// Create a codec with the default line limit.
    ///
    /// # Example
    ///
    /// ```
    /// use parklink_protocol::JsonLineCodec;
    ///
    /// let codec = JsonLineCodec::new();
    /// assert_eq!(codec.max_frame_size(), 8 * 1024);
    /// ```
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_LINE_LENGTH)
    }

    /// Create a codec with a custom line limit, applied in both directions.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            decoder: FrameDecoder::with_max_line_length(max_frame_size),
            max_frame_size,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame into a standalone buffer.
    ///
    /// Used by blocking transports that write bytes themselves.
    pub fn encode_to_vec(&mut self, frame: OutboundFrame) -> Result<Vec<u8>> {
        let mut buffer = BytesMut::new();
        self.encode(frame, &mut buffer)?;
        Ok(buffer.to_vec())
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLineCodec {
    type Item = String;
    type Error = Error;

    /// Decode the next complete line.
    ///
    /// - `Ok(Some(line))` - a trimmed, non-empty line
    /// - `Ok(None)` - need more data
    ///
    /// Noise never produces an error; only I/O failures of the underlying
    /// transport end the stream.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            // All bytes move into the decoder's own buffer.
            let _ = self.decoder.feed(src);
            src.clear();
        }

        Ok(self.decoder.next_frame())
    }
}

impl Encoder<OutboundFrame> for JsonLineCodec {
    type Error = Error;

    fn encode(&mut self, item: OutboundFrame, dst: &mut BytesMut) -> Result<()> {
        let json = item.to_json()?;

        let size = json.len() + 1;
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max_size: self.max_frame_size,
            }
            .into());
        }

        dst.reserve(size);
        dst.extend_from_slice(json.as_bytes());
        dst.extend_from_slice(&[FRAME_DELIMITER]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, parse_message};
    use parklink_core::{BarrierState, DisplayMode, StationId};

    #[test]
    fn test_decode_partial_then_complete() {
        let mut codec = JsonLineCodec::new();
        let mut buffer = BytesMut::from(&b"{\"type\":\"button_"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        assert!(buffer.is_empty());

        buffer.extend_from_slice(b"press\",\"button\":\"enter\"}\n");
        let line = codec.decode(&mut buffer).unwrap().unwrap();
        assert!(parse_message(&line).is_ok());
    }

    #[test]
    fn test_decode_yields_queued_lines_one_by_one() {
        let mut codec = JsonLineCodec::new();
        let mut buffer = BytesMut::from(&b"a\nb\n"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap().as_deref(), Some("a"));
        assert_eq!(codec.decode(&mut buffer).unwrap().as_deref(), Some("b"));
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_decode_noise_is_not_an_error() {
        let mut codec = JsonLineCodec::new();
        let mut buffer = BytesMut::from(&b"\x00\x01\xff garbage }{ \n"[..]);

        let line = codec.decode(&mut buffer).unwrap().unwrap();
        assert!(parse_message(&line).is_err());
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = JsonLineCodec::new();
        let mut buffer = BytesMut::new();
        let station = StationId::new(1).unwrap();

        codec
            .encode(
                OutboundFrame::new(station, Command::barrier(BarrierState::Open)),
                &mut buffer,
            )
            .unwrap();

        assert_eq!(
            &buffer[..],
            b"{\"type\":\"barrier_control\",\"state\":\"open\",\"parking_id\":1}\n"
        );
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let mut codec = JsonLineCodec::with_max_frame_size(32);
        let station = StationId::new(1).unwrap();
        let frame = OutboundFrame::new(station, Command::display("x".repeat(64), DisplayMode::Spaces));

        let err = codec.encode_to_vec(frame).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::FrameTooLarge { max_size: 32, .. })
        ));
    }
}
