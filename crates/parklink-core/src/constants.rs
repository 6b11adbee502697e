//! Core constants for the station link protocol and the parking domain.
//!
//! This module centralizes every default used across the ParkLink workspace:
//! wire framing, transport timing, station identification and billing. Config
//! structs in the other crates build their `Default` impls from these values.
//!
//! # Wire Format
//!
//! Stations and the supervisor exchange newline-delimited JSON objects:
//!
//! ```text
//! {"type":"button_press","button":"enter","parking_id":1}\n
//! {"type":"barrier_control","state":"open","parking_id":1}\n
//! ```
//!
//! # Usage
//!
//! ```
//! use parklink_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(FRAME_DELIMITER, b'\n');
//! let read_timeout = Duration::from_millis(DEFAULT_READ_TIMEOUT_MS);
//! assert_eq!(read_timeout.as_millis(), 100);
//! ```

// ============================================================================
// Framing
// ============================================================================

/// Terminates every frame on the wire.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Opening character of the JSON object carried by a frame.
pub const OBJECT_START: char = '{';

/// Closing character of the JSON object carried by a frame.
pub const OBJECT_END: char = '}';

/// Maximum length of a single line before the decoder gives up on it.
///
/// Station frames are well under 200 bytes. A line that grows past this
/// limit without a newline is noise from a misconfigured baud rate or a
/// stuck peer; the decoder discards it and resynchronizes on the next
/// newline.
pub const MAX_LINE_LENGTH: usize = 8 * 1024; // 8 KB

/// Name of the station identifier field in every frame.
pub const PARKING_ID_FIELD: &str = "parking_id";

/// Name of the variant tag field in every frame.
pub const TYPE_FIELD: &str = "type";

// ============================================================================
// Station Identification
// ============================================================================

/// Minimum valid station ID.
pub const MIN_STATION_ID: u8 = 1;

/// Maximum valid station ID.
///
/// Keeps `DEFAULT_TCP_BASE_PORT + id` inside the unprivileged port range
/// for any reasonable base port.
pub const MAX_STATION_ID: u8 = 99;

// ============================================================================
// Transport Timing
// ============================================================================

/// Serial line speed used by the station firmware.
pub const SERIAL_BAUD_RATE: u32 = 115_200;

/// Short read timeout (milliseconds).
///
/// A read that returns no data within this window is not an error; the
/// read loop simply polls again. Keeping it short bounds how long a
/// shutdown request waits for a blocked serial read.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Write timeout (milliseconds).
///
/// A write that cannot complete within this window marks the link as
/// disconnected.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 500;

/// Number of open attempts made by a single `connect()` call.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 2;

/// Delay between two open attempts within one `connect()` call (milliseconds).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Interval of the registry's reconnect check (milliseconds).
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;

/// Time a freshly opened serial port is left to settle (milliseconds).
///
/// Opening the port resets most USB-serial microcontroller boards; frames
/// written before the firmware boots are lost.
pub const DEFAULT_SERIAL_SETTLE_MS: u64 = 2_000;

/// Time a TCP connect attempt waits for a station to dial in (milliseconds).
pub const DEFAULT_ACCEPT_TIMEOUT_MS: u64 = 5_000;

/// Base port for the per-station TCP listeners.
///
/// Station `N` listens on `DEFAULT_TCP_BASE_PORT + N`.
///
/// # Examples
///
/// ```
/// use parklink_core::constants::DEFAULT_TCP_BASE_PORT;
///
/// let station_two = DEFAULT_TCP_BASE_PORT + 2;
/// assert_eq!(station_two, 5002);
/// ```
pub const DEFAULT_TCP_BASE_PORT: u16 = 5_000;

/// Timeout for flushing and shutting down a stream on close (milliseconds).
pub const CLOSE_TIMEOUT_MS: u64 = 500;

// ============================================================================
// Parking Domain
// ============================================================================

/// Spaces per station.
///
/// Station firmware reports two occupancy sensors.
pub const DEFAULT_TOTAL_SPACES: u8 = 2;

/// Fee charged per billable unit, in local currency units.
pub const DEFAULT_BASE_FEE: u64 = 1_000;

/// Length of one billable unit (seconds).
pub const BILLING_UNIT_SECS: u64 = 10;

/// Divisor applied to a fee before it is shown on the station display.
///
/// The 7-segment display shows thousands.
pub const FEE_DISPLAY_DIVISOR: u64 = 1_000;

/// Exchange rate used until the first refresh (local units per US dollar).
pub const DEFAULT_EXCHANGE_RATE: f64 = 505.0;

/// Minimum time between two accepted exchange-rate refreshes (seconds).
pub const EXCHANGE_REFRESH_INTERVAL_SECS: u64 = 3_600;

/// Delay before a barrier opened by the dispatcher closes again (milliseconds).
pub const DEFAULT_AUTO_CLOSE_DELAY_MS: u64 = 3_000;

// ============================================================================
// Handshake
// ============================================================================

/// Status reported in the welcome frame sent to a TCP station on accept.
pub const WELCOME_STATUS: &str = "connected";

/// Message text carried by the welcome frame.
pub const WELCOME_MESSAGE: &str = "Connection established";

// ============================================================================
// Persistence
// ============================================================================

/// Default SQLite database file for station records.
pub const DEFAULT_DATABASE_PATH: &str = "parklink.db";
