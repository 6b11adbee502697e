//! Typed inbound messages and outbound commands.
//!
//! Both directions are closed tagged unions keyed by the `type` field. A
//! frame whose `type` is not one of the known variants is rejected with
//! [`ProtocolError::UnknownType`] instead of being silently ignored.
//!
//! # Inbound (station to supervisor)
//!
//! ```text
//! {"type":"sensor_update","space1_occupied":true,"space2_occupied":false,"parking_id":1}
//! {"type":"button_press","button":"enter","parking_id":1}
//! {"type":"connection","status":"connected","mac":"28:cd:c1:00:00:01","parking_id":1}
//! ```
//!
//! # Outbound (supervisor to station)
//!
//! ```text
//! {"type":"display_update","value":"1","mode":"spaces","parking_id":1}
//! {"type":"barrier_control","state":"open","parking_id":1}
//! {"type":"led_control","space":2,"state":true,"parking_id":1}
//! {"type":"welcome","status":"connected","message":"...","parking_id":1}
//! ```

use parklink_core::constants::{
    OBJECT_END, OBJECT_START, PARKING_ID_FIELD, TYPE_FIELD, WELCOME_MESSAGE, WELCOME_STATUS,
};
use parklink_core::{BarrierState, DisplayMode, ProtocolError, SpaceNumber, StationId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Station buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    Enter,
    Exit,
}

/// Messages sent by a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Occupancy reported by the space sensors.
    SensorUpdate {
        #[serde(default)]
        space1_occupied: bool,
        #[serde(default)]
        space2_occupied: bool,
    },

    /// A button was pressed.
    ButtonPress { button: Button },

    /// Sent by network stations right after they connect.
    #[serde(rename = "connection")]
    ConnectionAnnounce {
        #[serde(default)]
        mac: Option<String>,
        #[serde(default)]
        status: Option<String>,
    },
}

impl Message {
    /// Wire names of every inbound variant.
    pub const KNOWN_TYPES: [&'static str; 3] = ["sensor_update", "button_press", "connection"];

    /// Wire name of this message's `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SensorUpdate { .. } => "sensor_update",
            Message::ButtonPress { .. } => "button_press",
            Message::ConnectionAnnounce { .. } => "connection",
        }
    }
}

/// Commands sent to a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Show a value on the station display.
    DisplayUpdate { value: String, mode: DisplayMode },

    /// Move the barrier.
    BarrierControl { state: BarrierState },

    /// Switch a space LED.
    LedControl {
        space: SpaceNumber,
        #[serde(rename = "state")]
        on: bool,
    },

    /// Identification frame sent by the supervisor when a TCP station connects.
    Welcome {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Command {
    /// Display command for a numeric value.
    pub fn display(value: impl ToString, mode: DisplayMode) -> Self {
        Command::DisplayUpdate {
            value: value.to_string(),
            mode,
        }
    }

    /// Barrier command.
    pub fn barrier(state: BarrierState) -> Self {
        Command::BarrierControl { state }
    }

    /// Greeting sent right after a TCP station is accepted.
    pub fn welcome() -> Self {
        Command::Welcome {
            status: WELCOME_STATUS.to_string(),
            message: Some(WELCOME_MESSAGE.to_string()),
        }
    }

    /// Wire name of this command's `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::DisplayUpdate { .. } => "display_update",
            Command::BarrierControl { .. } => "barrier_control",
            Command::LedControl { .. } => "led_control",
            Command::Welcome { .. } => "welcome",
        }
    }
}

/// A command stamped with the destination station.
///
/// Serializes as a single flat object with `type` first and `parking_id`
/// last.
///
/// # Example
///
/// ```
/// use parklink_core::{BarrierState, StationId};
/// use parklink_protocol::{Command, OutboundFrame};
///
/// let station = StationId::new(1).unwrap();
/// let frame = OutboundFrame::new(station, Command::barrier(BarrierState::Open));
/// assert_eq!(
///     frame.to_json().unwrap(),
///     r#"{"type":"barrier_control","state":"open","parking_id":1}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundFrame {
    #[serde(flatten)]
    pub command: Command,
    pub parking_id: u8,
}

impl OutboundFrame {
    pub fn new(station: StationId, command: Command) -> Self {
        Self {
            command,
            parking_id: station.as_u8(),
        }
    }

    /// Serialize to a JSON object without the trailing newline.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Station the frame claims to come from, if it says.
    pub parking_id: Option<u8>,
    pub message: Message,
}

impl Inbound {
    /// Whether this frame belongs to `station`.
    ///
    /// Frames without a `parking_id` belong to whichever link delivered them.
    pub fn is_for(&self, station: StationId) -> bool {
        self.parking_id.is_none_or(|id| id == station.as_u8())
    }
}

/// Parse one line into an inbound message.
///
/// The JSON object is taken from the first `{` to the last `}`, so prefix
/// and suffix noise is tolerated.
///
/// # Errors
///
/// - [`ProtocolError::NoJsonObject`] when the line has no `{...}` span
/// - [`ProtocolError::Malformed`] when the span is not a valid message object
/// - [`ProtocolError::MissingField`] / [`ProtocolError::InvalidField`] for a bad `type` or `parking_id`
/// - [`ProtocolError::UnknownType`] for a `type` that is not an inbound variant
///
/// # Example
///
/// ```
/// use parklink_protocol::{parse_message, Button, Message};
///
/// let inbound = parse_message(r#"xx{"type":"button_press","button":"exit","parking_id":2}yy"#).unwrap();
/// assert_eq!(inbound.parking_id, Some(2));
/// assert_eq!(inbound.message, Message::ButtonPress { button: Button::Exit });
/// ```
pub fn parse_message(line: &str) -> Result<Inbound, ProtocolError> {
    let start = line.find(OBJECT_START).ok_or(ProtocolError::NoJsonObject)?;
    let end = line.rfind(OBJECT_END).ok_or(ProtocolError::NoJsonObject)?;
    if end < start {
        return Err(ProtocolError::NoJsonObject);
    }

    let value: Value = serde_json::from_str(&line[start..=end])
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let Value::Object(fields) = &value else {
        return Err(ProtocolError::Malformed("not a JSON object".to_string()));
    };

    let kind = match fields.get(TYPE_FIELD) {
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => {
            return Err(ProtocolError::InvalidField {
                field: TYPE_FIELD,
                reason: format!("expected a string, got {other}"),
            });
        }
        None => return Err(ProtocolError::MissingField(TYPE_FIELD)),
    };

    let parking_id = match fields.get(PARKING_ID_FIELD) {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            raw.as_u64()
                .and_then(|id| u8::try_from(id).ok())
                .ok_or_else(|| ProtocolError::InvalidField {
                    field: PARKING_ID_FIELD,
                    reason: format!("expected a station number, got {raw}"),
                })?,
        ),
    };

    if !Message::KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    let message =
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    Ok(Inbound {
        parking_id,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn station(id: u8) -> StationId {
        StationId::new(id).unwrap()
    }

    #[test]
    fn test_parse_sensor_update() {
        let inbound = parse_message(
            r#"{"type":"sensor_update","space1_occupied":true,"space2_occupied":false,"parking_id":1}"#,
        )
        .unwrap();

        assert_eq!(inbound.parking_id, Some(1));
        assert_eq!(
            inbound.message,
            Message::SensorUpdate {
                space1_occupied: true,
                space2_occupied: false
            }
        );
    }

    #[test]
    fn test_parse_connection_announce_with_mac() {
        let inbound = parse_message(
            r#"{"type":"connection","parking_id":2,"status":"connected","mac":"28:cd:c1:0a:0b:0c"}"#,
        )
        .unwrap();

        assert_eq!(
            inbound.message,
            Message::ConnectionAnnounce {
                mac: Some("28:cd:c1:0a:0b:0c".to_string()),
                status: Some("connected".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_without_parking_id() {
        let inbound = parse_message(r#"{"type":"button_press","button":"enter"}"#).unwrap();
        assert_eq!(inbound.parking_id, None);
        assert!(inbound.is_for(station(1)));
        assert!(inbound.is_for(station(7)));
    }

    #[test]
    fn test_is_for_rejects_other_station() {
        let inbound =
            parse_message(r#"{"type":"button_press","button":"enter","parking_id":2}"#).unwrap();
        assert!(!inbound.is_for(station(1)));
        assert!(inbound.is_for(station(2)));
    }

    #[rstest]
    #[case::no_braces("hello world", ProtocolError::NoJsonObject)]
    #[case::reversed("}{", ProtocolError::NoJsonObject)]
    #[case::missing_type(r#"{"parking_id":1}"#, ProtocolError::MissingField("type"))]
    #[case::unknown_type(
        r#"{"type":"reboot","parking_id":1}"#,
        ProtocolError::UnknownType("reboot".to_string())
    )]
    fn test_parse_rejections(#[case] line: &str, #[case] expected: ProtocolError) {
        assert_eq!(parse_message(line).unwrap_err(), expected);
    }

    #[rstest]
    #[case::truncated(r#"{"type":"button_press","button":"#)]
    #[case::bad_json(r#"{"type":"button_press",,}"#)]
    #[case::bad_button(r#"{"type":"button_press","button":"reverse"}"#)]
    #[case::missing_button(r#"{"type":"button_press"}"#)]
    #[case::array("{[1,2]}")]
    fn test_parse_malformed(#[case] line: &str) {
        assert!(matches!(
            parse_message(line),
            Err(ProtocolError::Malformed(_)) | Err(ProtocolError::NoJsonObject)
        ));
    }

    #[rstest]
    #[case::negative(r#"{"type":"button_press","button":"enter","parking_id":-1}"#)]
    #[case::too_large(r#"{"type":"button_press","button":"enter","parking_id":300}"#)]
    #[case::string(r#"{"type":"button_press","button":"enter","parking_id":"1"}"#)]
    fn test_parse_invalid_parking_id(#[case] line: &str) {
        assert!(matches!(
            parse_message(line),
            Err(ProtocolError::InvalidField {
                field: "parking_id",
                ..
            })
        ));
    }

    #[test]
    fn test_outbound_wire_format() {
        let frame = OutboundFrame::new(
            station(3),
            Command::LedControl {
                space: SpaceNumber::new(2, 2).unwrap(),
                on: true,
            },
        );
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"led_control","space":2,"state":true,"parking_id":3}"#
        );
    }

    #[test]
    fn test_display_update_wire_format() {
        let frame = OutboundFrame::new(station(1), Command::display(3, DisplayMode::Fee));
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"display_update","value":"3","mode":"fee","parking_id":1}"#
        );
    }

    #[test]
    fn test_welcome_omits_missing_message() {
        let frame = OutboundFrame::new(
            station(4),
            Command::Welcome {
                status: "connected".to_string(),
                message: None,
            },
        );
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"welcome","status":"connected","parking_id":4}"#
        );
    }

    #[test]
    fn test_kind_matches_wire_name() {
        assert_eq!(Message::ButtonPress { button: Button::Enter }.kind(), "button_press");
        assert_eq!(Command::barrier(BarrierState::Closed).kind(), "barrier_control");
        for kind in Message::KNOWN_TYPES {
            assert!(!kind.is_empty());
        }
    }
}
