use std::future::Future;

use crate::error::Result;

/// Close code for an orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code used when the server hit an unexpected condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Close code used to turn away a client while another one is connected.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Writing half of a connection: sends whole text messages.
///
/// Implementations never split or merge messages; one `send` is one message
/// on the wire.
pub trait MessageSink: Send + 'static {
    /// Send one text message.
    fn send(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Close the connection with a close code and a human-readable reason.
    fn close(&mut self, code: u16, reason: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Reading half of a connection: yields whole text messages.
pub trait MessageSource: Send + 'static {
    /// Receive the next text message.
    ///
    /// Returns `None` once the connection is closed. Non-text control traffic
    /// (ping, pong) is consumed internally.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String>>> + Send;
}
