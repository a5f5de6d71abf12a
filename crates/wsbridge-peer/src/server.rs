use std::net::SocketAddr;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use wsbridge_transport::{TransportError, WsListener, CLOSE_TRY_AGAIN_LATER};

use crate::error::{PeerError, Result};
use crate::session::{Session, SessionConfig, SessionHandle};

/// Default bind address for the game's `/wsserver` command.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5218";

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub session: SessionConfig,
    /// Chat message shown to players once a client connects.
    pub greeting: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            session: SessionConfig::default(),
            greeting: Some("§l§b- wsbridge connected".to_string()),
        }
    }
}

/// Accepts one game client at a time.
///
/// While a session is live, further clients are closed with 1013 (try again
/// later). The next [`accept`](Self::accept) waits for the live session to
/// end first.
pub struct BridgeServer {
    listener: Option<WsListener>,
    gatekeeper: Option<JoinHandle<WsListener>>,
    local_addr: SocketAddr,
    config: ServerConfig,
    next_session_id: u64,
}

impl BridgeServer {
    /// Bind the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = WsListener::bind(&config.bind_addr).await?;
        Ok(Self {
            local_addr: listener.local_addr(),
            listener: Some(listener),
            gatekeeper: None,
            config,
            next_session_id: 1,
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Wait for the next client and start its session.
    pub async fn accept(&mut self) -> Result<SessionHandle> {
        let listener = match (self.listener.take(), self.gatekeeper.take()) {
            (Some(listener), _) => listener,
            (None, Some(gatekeeper)) => match gatekeeper.await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(error = %err, "listener task failed");
                    return Err(PeerError::Transport(TransportError::Closed));
                }
            },
            (None, None) => return Err(PeerError::Transport(TransportError::Closed)),
        };

        let connection = match listener.accept().await {
            Ok(connection) => connection,
            Err(err) => {
                self.listener = Some(listener);
                return Err(err.into());
            }
        };

        let session_id = self.next_session_id;
        self.next_session_id += 1;
        let peer_addr = connection.peer_addr();
        info!(session_id, %peer_addr, "game client connected");

        let (sink, source) = connection.into_split();
        let (handle, _task) = Session::spawn(sink, source, self.config.session.clone());

        if let Some(greeting) = self.config.greeting.clone() {
            let greeter = handle.clone();
            tokio::spawn(async move {
                if let Err(err) = greeter.say(&greeting).await {
                    warn!(error = %err, "failed to send greeting");
                }
            });
        }

        self.gatekeeper = Some(tokio::spawn(turn_away_while_live(listener, handle.clone())));
        Ok(handle)
    }
}

/// Reject every client that shows up while `live` is connected, then give the
/// listener back.
async fn turn_away_while_live(listener: WsListener, live: SessionHandle) -> WsListener {
    loop {
        tokio::select! {
            biased;
            () = live.closed() => return listener,
            accepted = listener.accept() => match accepted {
                Ok(extra) => {
                    warn!(peer_addr = %extra.peer_addr(), "rejecting extra client");
                    let rejected = extra
                        .reject(CLOSE_TRY_AGAIN_LATER, "server already has a client")
                        .await;
                    if let Err(err) = rejected {
                        warn!(error = %err, "failed to reject extra client");
                    }
                }
                Err(err) => warn!(error = %err, "failed to accept extra client"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            greeting: None,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn accepts_client_and_runs_commands() {
        let mut server = BridgeServer::bind(test_config())
            .await
            .expect("server should bind");
        let url = format!("ws://{}", server.local_addr());

        let game = tokio::spawn(async move {
            let (mut ws, _) = connect_async(url).await.expect("client should connect");
            let Some(Ok(Message::Text(text))) = ws.next().await else {
                panic!("expected a command request");
            };
            let request: Value = serde_json::from_str(&text).expect("request is json");
            assert_eq!(request["body"]["commandLine"], "list");
            let response = json!({
                "header": {"requestId": request["header"]["requestId"], "messagePurpose": "commandResponse"},
                "body": {"statusCode": 0, "statusMessage": "There are 1/10 players online"}
            });
            ws.send(Message::Text(response.to_string()))
                .await
                .expect("response should send");
            ws
        });

        let session = server.accept().await.expect("server should accept");
        let output = session.run_command("list").await.expect("command should succeed");
        assert_eq!(output.status_message, "There are 1/10 players online");

        drop(game.await.expect("game task should finish"));
        session.closed().await;
    }

    #[tokio::test]
    async fn extra_client_is_turned_away() {
        let mut server = BridgeServer::bind(test_config())
            .await
            .expect("server should bind");
        let url = format!("ws://{}", server.local_addr());

        let (first, live) = tokio::join!(connect_async(url.clone()), server.accept());
        let (mut first, _) = first.expect("first client should connect");
        let live = live.expect("server should accept");

        let (mut second, _) = connect_async(url.clone())
            .await
            .expect("second client completes the upgrade");
        match second.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(frame.code, CloseCode::from(CLOSE_TRY_AGAIN_LATER));
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        // Once the first client leaves, a new one is accepted.
        first.close(None).await.expect("first client should close");
        live.closed().await;
        let (third, session) = tokio::join!(connect_async(url), server.accept());
        third.expect("third client should connect");
        assert!(session.expect("server should accept again").is_connected());
    }
}
