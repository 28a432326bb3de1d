//! Wire envelope and outbound command encoding.
//!
//! Every frame in either direction is a JSON text object:
//!
//! ```text
//! { "action": "<name>", "value": <string | JSON | absent> }
//! ```
//!
//! Structured payloads travel as JSON text inside `value`. Commands addressed to
//! the device logger service add `"channel": "logger"`.

use crate::error::{AppResult, SessionError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Inbound frame as it arrives from the device.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    /// Action name; frames without one are rejected.
    #[serde(default)]
    pub action: Option<String>,
    /// Payload, often JSON encoded as text.
    #[serde(default)]
    pub value: Option<Value>,
    /// Fault code sent alongside `update_error_list`.
    #[serde(default, rename = "type")]
    pub code: Option<Value>,
}

impl Envelope {
    /// Parse a raw text frame.
    pub fn parse(raw: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Device service a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    /// Acquisition control unit.
    #[default]
    Control,
    /// File logger (runs, notes, calibration and background storage).
    Logger,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Control => write!(f, "control"),
            Channel::Logger => write!(f, "logger"),
        }
    }
}

/// An outbound request, built per send.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Action name on the wire
    pub name: String,
    /// Optional value
    pub payload: Option<Value>,
    /// Control or logger
    pub channel: Channel,
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'static str>,
}

impl Command {
    /// Control-channel command without payload.
    pub fn control(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
            channel: Channel::Control,
        }
    }

    /// Logger-channel command without payload.
    pub fn logger(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
            channel: Channel::Logger,
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Payload as it goes on the wire: strings verbatim, anything else as JSON text.
    pub fn wire_value(&self) -> Option<String> {
        self.payload.as_ref().map(|payload| match payload {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> AppResult<String> {
        let frame = OutboundFrame {
            action: &self.name,
            value: self.wire_value(),
            channel: match self.channel {
                Channel::Control => None,
                Channel::Logger => Some("logger"),
            },
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.channel)
    }
}

/// Payload helpers shared by the inbound decoders.
pub(crate) mod payload {
    use super::*;

    /// Textual `value`. Numbers are rendered as text.
    pub fn text(action: &str, value: Option<&Value>) -> AppResult<String> {
        match value {
            Some(Value::String(text)) => Ok(text.clone()),
            Some(Value::Number(number)) => Ok(number.to_string()),
            Some(other) => Err(SessionError::malformed(
                action,
                format!("expected text, got {other}"),
            )),
            None => Err(SessionError::malformed(action, "missing value")),
        }
    }

    /// JSON `value`. A string holding JSON text is parsed.
    pub fn json(action: &str, value: Option<&Value>) -> AppResult<Value> {
        match value {
            Some(Value::String(text)) => serde_json::from_str(text)
                .map_err(|err| SessionError::malformed(action, err)),
            Some(other) => Ok(other.clone()),
            None => Err(SessionError::malformed(action, "missing value")),
        }
    }

    /// JSON `value` when present, raw text otherwise. Plot and status series
    /// arrive both ways depending on firmware.
    pub fn lenient(value: Option<&Value>) -> Value {
        match value {
            Some(Value::String(text)) => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
            }
            Some(other) => other.clone(),
            None => Value::Null,
        }
    }

    /// Typed JSON `value`.
    pub fn typed<T: serde::de::DeserializeOwned>(action: &str, value: Option<&Value>) -> AppResult<T> {
        let json = json(action, value)?;
        serde_json::from_value(json).map_err(|err| SessionError::malformed(action, err))
    }

    /// Integer status code carried as a number or as numeric text.
    pub fn code(action: &str, value: Option<&Value>) -> AppResult<i64> {
        match value {
            Some(Value::Number(number)) => number
                .as_i64()
                .ok_or_else(|| SessionError::malformed(action, format!("non-integer code {number}"))),
            Some(Value::String(text)) => text
                .trim()
                .parse()
                .map_err(|_| SessionError::malformed(action, format!("non-numeric code '{text}'"))),
            Some(other) => Err(SessionError::malformed(
                action,
                format!("expected code, got {other}"),
            )),
            None => Err(SessionError::malformed(action, "missing code")),
        }
    }

    /// Code from the `type` field of a JSON object `value`.
    pub fn type_code(action: &str, value: Option<&Value>) -> AppResult<i64> {
        let object = json(action, value)?;
        code(action, object.get("type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_command_omits_channel_and_empty_value() {
        let frame = Command::control("measure_stop").encode().unwrap();
        assert_eq!(frame, r#"{"action":"measure_stop"}"#);
    }

    #[test]
    fn logger_command_carries_channel_and_json_text() {
        let frame = Command::logger("log_save_notes")
            .with_payload(json!({"notes": "n"}))
            .encode()
            .unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["action"], "log_save_notes");
        assert_eq!(parsed["channel"], "logger");
        assert_eq!(parsed["value"], r#"{"notes":"n"}"#);
    }

    #[test]
    fn text_payload_is_sent_verbatim() {
        let command = Command::control("updateConfig").with_payload("init");
        assert_eq!(command.wire_value().as_deref(), Some("init"));
    }

    #[test]
    fn envelope_accepts_missing_fields() {
        let envelope = Envelope::parse(r#"{"value": 3}"#).unwrap();
        assert!(envelope.action.is_none());
        assert!(Envelope::parse("not json").is_err());
    }

    #[test]
    fn codes_parse_from_numbers_and_text() {
        assert_eq!(payload::code("fpga_hv", Some(&json!(2))).unwrap(), 2);
        assert_eq!(payload::code("fpga_hv", Some(&json!(" 99"))).unwrap(), 99);
        assert!(payload::code("fpga_hv", Some(&json!("high"))).is_err());
        assert_eq!(
            payload::type_code("connected", Some(&json!(r#"{"type":0}"#))).unwrap(),
            0
        );
    }
}
