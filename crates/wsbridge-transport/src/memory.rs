//! In-memory transport pair.
//!
//! Two connected endpoints backed by unbounded channels. Whatever one side
//! sends, the other side receives, message for message. Closing a sink ends
//! the opposite source.

use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::traits::{MessageSink, MessageSource};

/// One end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryEnd {
    pub sink: MemorySink,
    pub source: MemorySource,
}

impl MemoryEnd {
    /// Split into writing and reading halves.
    pub fn into_split(self) -> (MemorySink, MemorySource) {
        (self.sink, self.source)
    }
}

/// Create two connected endpoints.
pub fn pair() -> (MemoryEnd, MemoryEnd) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();

    let left = MemoryEnd {
        sink: MemorySink { tx: Some(left_tx) },
        source: MemorySource { rx: left_rx },
    };
    let right = MemoryEnd {
        sink: MemorySink { tx: Some(right_tx) },
        source: MemorySource { rx: right_rx },
    };
    (left, right)
}

/// Writing half of an in-memory connection.
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl MessageSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Reading half of an in-memory connection.
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

impl MessageSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_cross_in_both_directions() {
        let (left, right) = pair();
        let (mut left_sink, mut left_source) = left.into_split();
        let (mut right_sink, mut right_source) = right.into_split();

        left_sink.send("ping".to_string()).await.unwrap();
        right_sink.send("pong".to_string()).await.unwrap();

        assert_eq!(right_source.recv().await.unwrap().unwrap(), "ping");
        assert_eq!(left_source.recv().await.unwrap().unwrap(), "pong");
    }

    #[tokio::test]
    async fn close_ends_opposite_source() {
        let (left, right) = pair();
        let (mut left_sink, _left_source) = left.into_split();
        let (_right_sink, mut right_source) = right.into_split();

        left_sink.close(crate::CLOSE_NORMAL, "done").await.unwrap();
        assert!(right_source.recv().await.is_none());
        assert!(matches!(
            left_sink.send("late".to_string()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn send_fails_after_peer_dropped() {
        let (left, right) = pair();
        let (mut left_sink, _left_source) = left.into_split();
        drop(right);

        assert!(matches!(
            left_sink.send("lost".to_string()).await,
            Err(TransportError::Closed)
        ));
    }
}
