//! Line-delimited JSON protocol spoken between the supervisor and parking stations.
//!
//! - [`FrameDecoder`] turns a noisy byte stream into candidate lines.
//! - [`parse_message`] extracts and validates the JSON object of one line.
//! - [`JsonLineCodec`] plugs both into `tokio_util::codec` for async transports.

pub mod codec;
pub mod frame_decoder;
pub mod message;

pub use codec::JsonLineCodec;
pub use frame_decoder::{DecoderState, DrainFrames, FrameDecoder};
pub use message::{Button, Command, Inbound, Message, OutboundFrame, parse_message};
