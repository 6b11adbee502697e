//! Line framing for station byte streams.
//!
//! Serial lines and TCP sockets deliver bytes in arbitrary chunks: half a
//! frame, three frames at once, or boot noise from a microcontroller that
//! just reset. The [`FrameDecoder`] buffers whatever arrives and hands out
//! complete newline-terminated lines, leaving JSON extraction to
//! [`parse_message`](crate::parse_message).
//!
//! # Framing
//!
//! ```text
//! garbage{"type":"button_press","button":"enter","parking_id":1}\n
//! └──────────────────────── one frame ─────────────────────────┘
//! ```
//!
//! Bytes are decoded permissively: invalid UTF-8 sequences are dropped
//! instead of failing the stream, each line is trimmed, and empty lines are
//! skipped.
//!
//! # Usage
//!
//! ```
//! use parklink_protocol::FrameDecoder;
//!
//! let mut decoder = FrameDecoder::new();
//!
//! // Partial frame: nothing yet
//! assert_eq!(decoder.feed(b"{\"type\":\"sensor").count(), 0);
//!
//! // Rest of the frame plus the start of the next one
//! let lines: Vec<String> = decoder.feed(b"_update\"}\n{\"ty").collect();
//! assert_eq!(lines, vec!["{\"type\":\"sensor_update\"}"]);
//! assert!(decoder.buffered_len() > 0);
//! ```

use bytes::BytesMut;
use parklink_core::constants::{FRAME_DELIMITER, MAX_LINE_LENGTH};
use std::collections::VecDeque;

/// Initial buffer capacity for incoming transport data.
const INITIAL_BUFFER_CAPACITY: usize = 1024; // 1 KB

/// Initial capacity of the ready-line queue.
const INITIAL_FRAME_QUEUE_CAPACITY: usize = 4;

/// Decoder states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Accumulating bytes of the current line.
    Scanning,

    /// Skipping the tail of a line that exceeded the length limit.
    ///
    /// Everything up to and including the next newline is dropped, then the
    /// decoder returns to `Scanning`.
    Discarding,
}

/// Stateful line decoder for station streams.
///
/// ```text
/// ┌──────────┐  newline: emit line   ┌──────────┐
/// │ Scanning │──────────────────────>│ Scanning │
/// └──────────┘                       └──────────┘
///      │ buffer > max_line_length          ^
///      v                                   │ newline
/// ┌────────────┐                           │
/// │ Discarding │───────────────────────────┘
/// └────────────┘
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: DecoderState,
    frames: VecDeque<String>,
    max_line_length: usize,
    discarded_lines: u64,
}

impl FrameDecoder {
    /// Create a decoder with the default line length limit.
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    /// Create a decoder with a custom line length limit.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: DecoderState::Scanning,
            frames: VecDeque::with_capacity(INITIAL_FRAME_QUEUE_CAPACITY),
            max_line_length,
            discarded_lines: 0,
        }
    }

    /// Feed bytes read from the transport.
    ///
    /// Returns an iterator over every line completed so far, including lines
    /// queued by earlier calls and not yet consumed. The remainder of an
    /// unterminated line stays buffered for the next call.
    ///
    /// # Example
    ///
    /// ```
    /// use parklink_protocol::FrameDecoder;
    ///
    /// let mut decoder = FrameDecoder::new();
    /// let lines: Vec<String> = decoder.feed(b"a\n\n  b  \r\nc").collect();
    /// assert_eq!(lines, vec!["a", "b"]);
    /// ```
    pub fn feed(&mut self, bytes: &[u8]) -> DrainFrames<'_> {
        self.buffer.extend_from_slice(bytes);
        while self.try_extract_line() {}
        self.enforce_line_limit();
        self.drain_frames()
    }

    /// Next complete line, if any.
    pub fn next_frame(&mut self) -> Option<String> {
        self.frames.pop_front()
    }

    /// Number of lines ready for extraction.
    pub fn frames_available(&self) -> usize {
        self.frames.len()
    }

    /// Bytes of the current unterminated line.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Current decoder state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Lines dropped for exceeding the length limit since creation.
    pub fn discarded_lines(&self) -> u64 {
        self.discarded_lines
    }

    /// Discard buffered bytes and queued lines.
    ///
    /// Called when a transport is reopened so that a half-received line from
    /// the previous session is not glued to the first line of the new one.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.frames.clear();
        self.state = DecoderState::Scanning;
    }

    /// Iterator draining the lines queued so far.
    pub fn drain_frames(&mut self) -> DrainFrames<'_> {
        DrainFrames { decoder: self }
    }

    /// Extract one newline-terminated segment from the buffer.
    ///
    /// Returns `true` if a segment was consumed.
    fn try_extract_line(&mut self) -> bool {
        let Some(pos) = self.buffer.iter().position(|&b| b == FRAME_DELIMITER) else {
            return false;
        };

        let segment = self.buffer.split_to(pos + 1);

        match self.state {
            DecoderState::Discarding => {
                self.state = DecoderState::Scanning;
            }
            DecoderState::Scanning => {
                if let Some(line) = decode_line(&segment[..pos]) {
                    self.frames.push_back(line);
                }
            }
        }
        true
    }

    /// Drop an unterminated line that grew past the length limit.
    fn enforce_line_limit(&mut self) {
        if self.buffer.len() > self.max_line_length {
            self.buffer.clear();
            if self.state == DecoderState::Scanning {
                self.discarded_lines += 1;
            }
            self.state = DecoderState::Discarding;
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode raw line bytes, dropping invalid UTF-8 and surrounding whitespace.
fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let cleaned: String = text
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect();
    let trimmed = cleaned.trim();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Iterator over queued lines, see [`FrameDecoder::drain_frames`].
#[derive(Debug)]
pub struct DrainFrames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for DrainFrames<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.decoder.frames_available();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DrainFrames<'_> {}
