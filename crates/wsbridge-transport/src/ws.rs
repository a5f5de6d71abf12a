use std::net::SocketAddr;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{MessageSink, MessageSource};

/// WebSocket listener accepting game clients.
///
/// The game opens the connection (`/wsserver <host>:<port>`); we only ever
/// act as the server side of the upgrade.
pub struct WsListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl WsListener {
    /// Bind a TCP listener on `addr` (e.g. `127.0.0.1:5218`).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        info!(%local_addr, "listening for websocket clients");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next TCP connection and complete the WebSocket upgrade.
    pub async fn accept(&self) -> Result<WsConnection> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(TransportError::Handshake)?;
        debug!(%peer_addr, "accepted websocket client");
        Ok(WsConnection { ws, peer_addr })
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// An upgraded WebSocket connection, not yet split.
pub struct WsConnection {
    ws: WebSocketStream<TcpStream>,
    peer_addr: SocketAddr,
}

impl WsConnection {
    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Split into independently owned writing and reading halves.
    pub fn into_split(self) -> (WsSink, WsSource) {
        let (sink, source) = self.ws.split();
        (WsSink { inner: sink }, WsSource { inner: source })
    }

    /// Close the connection without splitting it.
    pub async fn reject(self, code: u16, reason: &str) -> Result<()> {
        let (mut sink, _source) = self.into_split();
        sink.close(code, reason).await
    }
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

/// Writing half of a WebSocket connection.
pub struct WsSink {
    inner: SplitSink<WebSocketStream<TcpStream>, Message>,
}

impl MessageSink for WsSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        match self.inner.send(Message::Close(Some(frame))).await {
            Ok(()) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
        match self.inner.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Reading half of a WebSocket connection.
pub struct WsSource {
    inner: SplitStream<WebSocketStream<TcpStream>>,
}

impl MessageSource for WsSource {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        warn!("dropping non-utf8 binary websocket message");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket closed by client");
                    return None;
                }
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::connect_async;

    use super::*;

    #[tokio::test]
    async fn accepts_client_and_exchanges_text() {
        let listener = WsListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr());

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            ws.send(Message::Text("from-client".to_string()))
                .await
                .unwrap();
            let reply = ws.next().await.unwrap().unwrap();
            assert_eq!(reply, Message::Text("from-server".to_string()));
        });

        let conn = listener.accept().await.unwrap();
        let (mut sink, mut source) = conn.into_split();

        let received = source.recv().await.unwrap().unwrap();
        assert_eq!(received, "from-client");
        sink.send("from-server".to_string()).await.unwrap();

        client.await.unwrap();
    }

    #[tokio::test]
    async fn source_ends_when_client_closes() {
        let listener = WsListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr());

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let conn = listener.accept().await.unwrap();
        let (_sink, mut source) = conn.into_split();
        assert!(source.recv().await.is_none());

        client.await.unwrap();
    }

    #[tokio::test]
    async fn reject_sends_close_code() {
        let listener = WsListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr());

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            match ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    assert_eq!(u16::from(frame.code), crate::CLOSE_TRY_AGAIN_LATER);
                    assert_eq!(frame.reason, "busy");
                }
                other => panic!("expected close frame, got {other:?}"),
            }
        });

        let conn = listener.accept().await.unwrap();
        conn.reject(crate::CLOSE_TRY_AGAIN_LATER, "busy")
            .await
            .unwrap();

        client.await.unwrap();
    }

    #[tokio::test]
    async fn bind_failure_reports_address() {
        let err = match WsListener::bind("256.0.0.1:1").await {
            Ok(_) => panic!("bind should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, TransportError::Bind { ref addr, .. } if addr == "256.0.0.1:1"));
    }
}
