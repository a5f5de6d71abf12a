//! Chunked data transfer and command batching over the game WebSocket
//! channel.
//!
//! A game client opens a WebSocket to us with `/wsserver`. Every message we
//! send is a command capped at a few hundred bytes, and the only way back is
//! through game events and command responses. wsbridge turns that into a
//! usable message channel.
//!
//! # Crate Structure
//!
//! - [`transport`]: WebSocket listener and in-memory text transports
//! - [`frame`]: envelope codec, packetizer, control grammar, payload codec
//! - [`peer`]: sessions, batching, transfer reassembly, polling, server

/// Re-export transport types.
pub mod transport {
    pub use wsbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use wsbridge_frame::*;
}

/// Re-export session types.
pub mod peer {
    pub use wsbridge_peer::*;
}
