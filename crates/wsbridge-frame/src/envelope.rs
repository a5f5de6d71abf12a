use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FrameError, Result};

/// Protocol version stamped on every outgoing envelope.
pub const PROTOCOL_VERSION: u32 = 26;

/// Maximum size of one wrapped envelope, in bytes.
pub const MAX_ENVELOPE_BYTES: usize = 661;

/// What an envelope is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessagePurpose {
    CommandRequest,
    CommandResponse,
    Subscribe,
    Unsubscribe,
    Event,
    Error,
    #[serde(other)]
    Other,
}

/// Envelope header shared by both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    #[serde(default)]
    pub request_id: String,
    pub message_purpose: MessagePurpose,
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
}

impl Header {
    fn outgoing(request_id: &str, message_purpose: MessagePurpose) -> Self {
        Self {
            request_id: request_id.to_string(),
            message_purpose,
            version: PROTOCOL_VERSION,
            event_name: None,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, B> {
    header: Header,
    body: &'a B,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequestBody<'a> {
    command_line: &'a str,
    version: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionBody<'a> {
    event_name: &'a str,
}

/// Encode a `commandRequest` envelope.
///
/// ```text
/// {"header":{"requestId":..,"messagePurpose":"commandRequest","version":26},
///  "body":{"commandLine":..,"version":26}}
/// ```
pub fn encode_command_request(request_id: &str, command: &str) -> Result<String> {
    let envelope = Envelope {
        header: Header::outgoing(request_id, MessagePurpose::CommandRequest),
        body: &CommandRequestBody {
            command_line: command,
            version: PROTOCOL_VERSION,
        },
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Exact wire size of the `commandRequest` envelope for `command`.
pub fn command_wire_size(request_id: &str, command: &str) -> usize {
    encode_command_request(request_id, command)
        .map(|text| text.len())
        .unwrap_or(usize::MAX)
}

/// Encode a `subscribe` or `unsubscribe` envelope for a game event.
pub fn encode_subscription(
    request_id: &str,
    event_name: &str,
    purpose: MessagePurpose,
) -> Result<String> {
    let envelope = Envelope {
        header: Header::outgoing(request_id, purpose),
        body: &SubscriptionBody { event_name },
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// A decoded inbound envelope. The body stays untyped until routed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    pub header: Header,
    #[serde(default)]
    pub body: Value,
}

impl InboundMessage {
    /// True if this envelope answers one of our command requests.
    pub fn is_command_response(&self) -> bool {
        matches!(
            self.header.message_purpose,
            MessagePurpose::CommandResponse | MessagePurpose::Error
        ) && !self.header.request_id.is_empty()
    }

    /// Event name from the header, falling back to the body.
    pub fn event_name(&self) -> Option<&str> {
        self.header
            .event_name
            .as_deref()
            .or_else(|| self.body.get("eventName").and_then(Value::as_str))
    }

    /// Status carried by a command response body.
    pub fn command_output(&self) -> CommandOutput {
        let status_code = self
            .body
            .get("statusCode")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let status_message = self
            .body
            .get("statusMessage")
            .and_then(Value::as_str)
            .unwrap_or("success")
            .to_string();
        CommandOutput {
            status_code,
            status_message,
        }
    }
}

/// Decode an inbound envelope from its JSON text.
pub fn decode_inbound(text: &str) -> Result<InboundMessage> {
    serde_json::from_str(text).map_err(FrameError::Json)
}

/// Result of one executed command as reported by the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub status_code: i64,
    pub status_message: String,
}

impl CommandOutput {
    /// Negative status codes are command failures (including throttling).
    pub fn is_success(&self) -> bool {
        self.status_code >= 0
    }
}
