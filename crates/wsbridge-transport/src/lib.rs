//! Text-message transport abstraction.
//!
//! Provides a unified interface over the ways a game client can reach us:
//! - WebSocket (the `/wsserver` connection opened by the game)
//! - In-memory pairs (tests and embedding)
//!
//! This is the lowest layer of wsbridge. Everything else builds on top of
//! the [`MessageSink`] and [`MessageSource`] halves provided here.

pub mod error;
pub mod memory;
pub mod traits;
pub mod ws;

pub use error::{Result, TransportError};
pub use traits::{
    MessageSink, MessageSource, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_TRY_AGAIN_LATER,
};
pub use ws::{WsConnection, WsListener, WsSink, WsSource};
