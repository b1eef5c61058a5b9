//! Commands & Client Requests
//!
//! Observers steer the upstream backend by sending command requests. A
//! request is validated at the boundary into an immutable [`Command`]
//! before it may be queued or forwarded; invalid shapes never enter the
//! queue.
//!
//! # Wire Formats
//!
//! ```text
//! client → relay   {"type":"getStatus"}
//! client → relay   {"type":"websdr_command","command":"setFrequency","value":101.1}
//! relay  → client  {"type":"websdr_command_response","command":"setFrequency","success":false,"timestamp":...}
//! relay  → source  {"type":"command","command":"setFrequency","value":101.1}
//! ```

use std::collections::VecDeque;
use std::fmt;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use super::frame::Frame;

// =============================================================================
// Command Name
// =============================================================================

/// Command understood by the upstream backend, keyed by its wire name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandName {
    /// Tune to a frequency.
    SetFrequency,
    /// Change demodulation mode.
    SetMode,
    /// Select a band.
    SetBand,
    /// Any other non-empty name, passed through verbatim.
    Other(String),
}

impl CommandName {
    /// Parse a wire name.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::EmptyName` for an empty name. Whitespace is a
    /// valid name and is passed through unchanged.
    pub fn parse(name: &str) -> Result<Self, CommandError> {
        if name.is_empty() {
            return Err(CommandError::EmptyName);
        }
        Ok(match name {
            "setFrequency" => Self::SetFrequency,
            "setMode" => Self::SetMode,
            "setBand" => Self::SetBand,
            other => Self::Other(other.to_string()),
        })
    }

    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SetFrequency => "setFrequency",
            Self::SetMode => "setMode",
            Self::SetBand => "setBand",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Command
// =============================================================================

/// Invalid command shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// `command` is missing or empty.
    #[error("command name must be a non-empty string")]
    EmptyName,
    /// `command` is present but not a string.
    #[error("command name must be a string, got {0}")]
    NotAString(&'static str),
}

/// A validated command addressed upstream. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: CommandName,
    value: Value,
}

#[derive(Serialize)]
struct UpstreamCommandFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    command: &'a str,
    value: &'a Value,
}

impl Command {
    /// Validate a command.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::EmptyName` if `name` is empty.
    pub fn new(name: &str, value: Value) -> Result<Self, CommandError> {
        Ok(Self {
            name: CommandName::parse(name)?,
            value,
        })
    }

    /// Command name.
    #[must_use]
    pub const fn name(&self) -> &CommandName {
        &self.name
    }

    /// Command argument.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Encode as the frame sent to the upstream source.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the value cannot be encoded.
    pub fn to_upstream_frame(&self) -> Result<Frame, serde_json::Error> {
        Frame::json(&UpstreamCommandFrame {
            kind: "command",
            command: self.name.as_str(),
            value: &self.value,
        })
    }
}

// =============================================================================
// Client Requests
// =============================================================================

/// A request a client sent that is not `getStatus`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Request `type`, echoed back as `<type>_response`.
    pub request_type: String,
    /// Raw `command` field, if any.
    pub command: Option<Value>,
    /// Raw `value` field (`null` when absent).
    pub value: Value,
}

impl CommandRequest {
    /// Command name as the client sent it, or empty if it sent none.
    #[must_use]
    pub fn command_label(&self) -> &str {
        self.command.as_ref().and_then(Value::as_str).unwrap_or("")
    }

    /// Validate into a [`Command`].
    ///
    /// # Errors
    ///
    /// Returns `CommandError` if `command` is missing, not a string, or empty.
    pub fn to_command(&self) -> Result<Command, CommandError> {
        match &self.command {
            None | Some(Value::Null) => Err(CommandError::EmptyName),
            Some(Value::String(name)) => Command::new(name, self.value.clone()),
            Some(other) => Err(CommandError::NotAString(json_type_name(other))),
        }
    }
}

/// Message accepted from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    /// Ask for a status snapshot.
    GetStatus,
    /// Route a command upstream.
    Command(CommandRequest),
}

/// Client input that cannot be interpreted at all. Dropped without reply.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Not JSON, or not UTF-8.
    #[error("malformed client message: {0}")]
    Malformed(String),
    /// JSON without a string `type` field.
    #[error("client message has no string `type` field")]
    MissingType,
}

impl ClientRequest {
    /// Parse a client frame.
    ///
    /// # Errors
    ///
    /// Returns `RequestError` when the frame is not a JSON object with a
    /// string `type`.
    pub fn parse(frame: &Frame) -> Result<Self, RequestError> {
        let payload: Value = serde_json::from_slice(frame.as_bytes())
            .map_err(|e| RequestError::Malformed(e.to_string()))?;
        let mut fields = match payload {
            Value::Object(fields) => fields,
            other => {
                return Err(RequestError::Malformed(format!(
                    "expected an object, got {}",
                    json_type_name(&other)
                )));
            }
        };

        let Some(Value::String(kind)) = fields.remove("type") else {
            return Err(RequestError::MissingType);
        };

        if kind == "getStatus" {
            return Ok(Self::GetStatus);
        }

        Ok(Self::Command(CommandRequest {
            request_type: kind,
            command: fields.remove("command"),
            value: fields.remove("value").unwrap_or(Value::Null),
        }))
    }
}

/// Acknowledgment sent to the client that submitted a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResponse {
    #[serde(rename = "type")]
    kind: String,
    /// Command name as submitted.
    pub command: String,
    /// Whether the command reached the upstream socket.
    pub success: bool,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl CommandResponse {
    /// Response for `request`, stamped now.
    #[must_use]
    pub fn new(request: &CommandRequest, success: bool) -> Self {
        Self {
            kind: format!("{}_response", request.request_type),
            command: request.command_label().to_string(),
            success,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Command Queue
// =============================================================================

/// FIFO buffer of commands waiting for the upstream link to open.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<Command>,
}

impl CommandQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail.
    pub fn push(&mut self, command: Command) {
        self.pending.push_back(command);
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&mut self) -> Vec<Command> {
        self.pending.drain(..).collect()
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Discard everything, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn parse(text: &str) -> Result<ClientRequest, RequestError> {
        ClientRequest::parse(&Frame::text(text))
    }

    #[test_case("setFrequency", CommandName::SetFrequency)]
    #[test_case("setMode", CommandName::SetMode)]
    #[test_case("setBand", CommandName::SetBand)]
    #[test_case("startScan", CommandName::Other("startScan".into()))]
    fn command_names(wire: &str, expected: CommandName) {
        let name = CommandName::parse(wire).unwrap();
        assert_eq!(name, expected);
        assert_eq!(name.as_str(), wire);
    }

    #[test]
    fn empty_name_rejected() {
        assert_eq!(CommandName::parse(""), Err(CommandError::EmptyName));
    }

    #[test]
    fn whitespace_name_is_passed_through() {
        let name = CommandName::parse("   ").unwrap();
        assert_eq!(name, CommandName::Other("   ".into()));
        assert_eq!(name.as_str(), "   ");
    }

    #[test]
    fn upstream_frame_format() {
        let command = Command::new("setFrequency", json!(101.1)).unwrap();
        let frame = command.to_upstream_frame().unwrap();
        let json: Value = serde_json::from_slice(frame.as_bytes()).unwrap();
        assert_eq!(
            json,
            json!({"type": "command", "command": "setFrequency", "value": 101.1})
        );
    }

    #[test]
    fn get_status_request() {
        assert_eq!(parse(r#"{"type":"getStatus"}"#).unwrap(), ClientRequest::GetStatus);
    }

    #[test]
    fn command_request() {
        let request =
            parse(r#"{"type":"websdr_command","command":"setFrequency","value":101.1}"#).unwrap();
        let ClientRequest::Command(request) = request else {
            panic!("expected command request");
        };
        assert_eq!(request.request_type, "websdr_command");
        assert_eq!(request.command_label(), "setFrequency");

        let command = request.to_command().unwrap();
        assert_eq!(command.name(), &CommandName::SetFrequency);
        assert_eq!(command.value(), &json!(101.1));
    }

    #[test]
    fn value_defaults_to_null() {
        let ClientRequest::Command(request) = parse(r#"{"type":"sdr_command","command":"stop"}"#)
            .unwrap()
        else {
            panic!("expected command request");
        };
        assert_eq!(request.to_command().unwrap().value(), &Value::Null);
    }

    #[test_case(r#"{"type":"x_command"}"#, CommandError::EmptyName ; "missing")]
    #[test_case(r#"{"type":"x_command","command":null}"#, CommandError::EmptyName ; "null")]
    #[test_case(r#"{"type":"x_command","command":""}"#, CommandError::EmptyName ; "empty")]
    #[test_case(r#"{"type":"x_command","command":42}"#, CommandError::NotAString("number") ; "number")]
    fn invalid_command_shapes(text: &str, expected: CommandError) {
        let ClientRequest::Command(request) = parse(text).unwrap() else {
            panic!("expected command request");
        };
        assert_eq!(request.to_command(), Err(expected));
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case("" ; "empty")]
    fn malformed_messages(text: &str) {
        assert!(matches!(parse(text), Err(RequestError::Malformed(_))));
    }

    #[test_case(r#"{"command":"setMode"}"# ; "no type")]
    #[test_case(r#"{"type":7}"# ; "numeric type")]
    fn messages_without_type(text: &str) {
        assert!(matches!(parse(text), Err(RequestError::MissingType)));
    }

    #[test]
    fn response_type_echoes_request() {
        let ClientRequest::Command(request) =
            parse(r#"{"type":"websdr_command","command":"setFrequency","value":101.1}"#).unwrap()
        else {
            panic!("expected command request");
        };
        let response = CommandResponse::new(&request, false);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "websdr_command_response");
        assert_eq!(json["command"], "setFrequency");
        assert_eq!(json["success"], false);
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn queue_is_fifo() {
        let mut queue = CommandQueue::new();
        for name in ["a", "b", "c"] {
            queue.push(Command::new(name, Value::Null).unwrap());
        }
        assert_eq!(queue.len(), 3);

        let drained: Vec<_> = queue.drain().into_iter().map(|c| c.name().to_string()).collect();
        assert_eq!(drained, ["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn queue_clear_reports_dropped() {
        let mut queue = CommandQueue::new();
        queue.push(Command::new("a", Value::Null).unwrap());
        queue.push(Command::new("b", Value::Null).unwrap());
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn drain_preserves_submission_order(names in proptest::collection::vec("[a-zA-Z]{1,12}", 0..32)) {
            let mut queue = CommandQueue::new();
            for (submitted, name) in names.iter().enumerate() {
                queue.push(Command::new(name, Value::Null).unwrap());
                prop_assert_eq!(queue.len(), submitted + 1);
            }
            let drained: Vec<String> = queue.drain().iter().map(|c| c.name().to_string()).collect();
            prop_assert_eq!(drained, names);
        }

        #[test]
        fn parse_never_panics(text in ".*") {
            let _ = parse(&text);
        }
    }
}
