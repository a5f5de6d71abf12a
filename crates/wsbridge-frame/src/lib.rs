//! Command envelopes, control messages and byte-budget packetizing.
//!
//! This is the wire layer of wsbridge. Every command we issue is wrapped in a
//! JSON envelope that must stay under a fixed byte budget, so anything larger
//! than one command is cut into fragments and addressed with a small
//! control-message grammar:
//! - `BEGIN:<total>:<transfer id>`
//! - `FRAGMENT:<index>:<transfer id>:<data>`
//! - `END:<transfer id>`
//!
//! Payloads are JSON with every non-ASCII character escaped, so fragment
//! boundaries never land inside a multi-byte sequence.

pub mod control;
pub mod envelope;
pub mod error;
pub mod packetizer;
pub mod payload;

pub use control::{
    channel_address, parse_channel_address, script_event_command, validate_channel_name,
    ControlMessage, DEFAULT_NAMESPACE, MAX_CHANNEL_NAME_LEN,
};
pub use envelope::{
    command_wire_size, decode_inbound, encode_command_request, encode_subscription,
    CommandOutput, Header, InboundMessage, MessagePurpose, MAX_ENVELOPE_BYTES, PROTOCOL_VERSION,
};
pub use error::{FrameError, Result};
pub use packetizer::packetize;
pub use payload::{decode_payload, encode_payload, escape_non_ascii, unescape_unicode, Payload};
