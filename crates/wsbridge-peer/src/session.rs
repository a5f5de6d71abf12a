//! The session actor.
//!
//! One task owns a connection and every piece of state attached to it:
//! pending batches, open transfers and listeners. Callers talk to it through
//! a cloneable [`SessionHandle`]; replies come back on oneshot channels.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wsbridge_frame::{
    decode_inbound, encode_command_request, encode_subscription, parse_channel_address,
    validate_channel_name, CommandOutput, Header, InboundMessage, MessagePurpose, Payload,
    DEFAULT_NAMESPACE, MAX_ENVELOPE_BYTES,
};
use wsbridge_transport::{MessageSink, MessageSource, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL};

use crate::batch::{BatchTable, ResponseOutcome};
use crate::error::{OutputExt, PeerError, Result};
use crate::outbound::{plan_say, plan_transfer};
use crate::registry::{DispatchOutcome, EventListener, ListenerRegistry, TransferListener};
use crate::transfer::{TransferManager, TransferStats, DEFAULT_TRANSFER_TIMEOUT};

/// Event carrying inbound transfer control messages.
pub const DEFAULT_TRANSFER_EVENT: &str = "ScriptEventReceived";

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a batch may wait for all of its responses.
    pub request_timeout: Duration,
    /// Largest wrapped envelope we send, in bytes.
    pub max_envelope_bytes: usize,
    /// How long an inbound transfer may stay open.
    pub transfer_timeout: Duration,
    /// Addressing namespace for transfer commands.
    pub namespace: String,
    /// Game event whose body carries inbound control messages.
    pub transfer_event: String,
    pub request_id_len: usize,
    pub transfer_id_len: usize,
    /// Capacity of the handle → session request queue.
    pub request_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_envelope_bytes: MAX_ENVELOPE_BYTES,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            namespace: DEFAULT_NAMESPACE.to_string(),
            transfer_event: DEFAULT_TRANSFER_EVENT.to_string(),
            request_id_len: 6,
            transfer_id_len: 4,
            request_buffer: 64,
        }
    }
}

/// Lifetime counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub commands_sent: u64,
    pub responses_matched: u64,
    pub batches_completed: u64,
    pub batches_timed_out: u64,
    pub deliveries: u64,
    pub transfers: TransferStats,
}

/// Summary of a sent transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub channel: String,
    pub transfer_id: String,
    pub fragments: usize,
    pub commands: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S>(elapsed: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

type BatchReply = oneshot::Sender<Result<Vec<CommandOutput>>>;

enum SessionRequest {
    Run {
        commands: Vec<String>,
        reply: BatchReply,
    },
    Subscribe {
        channel: String,
        listener: TransferListener,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe {
        channel: String,
        reply: oneshot::Sender<bool>,
    },
    SubscribeEvent {
        event: String,
        listener: EventListener,
        reply: oneshot::Sender<Result<()>>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
    Close {
        reason: String,
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
    config: Arc<SessionConfig>,
    ended: CancellationToken,
}

impl SessionHandle {
    /// True while the session task is alive.
    pub fn is_connected(&self) -> bool {
        !self.ended.is_cancelled() && !self.tx.is_closed()
    }

    /// Resolves once the session has ended.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + '_ {
        self.ended.cancelled()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one command and wait for its response.
    ///
    /// A failed command is still `Ok`; use [`OutputExt::into_result`] for a
    /// strict result.
    pub async fn run_command(&self, command: impl Into<String>) -> Result<CommandOutput> {
        let mut outputs = self.run_commands(vec![command.into()]).await?;
        outputs
            .pop()
            .ok_or_else(|| PeerError::Disconnected("empty batch result".to_string()))
    }

    /// Run a batch. Outputs are returned in the order the commands were given.
    pub async fn run_commands(&self, commands: Vec<String>) -> Result<Vec<CommandOutput>> {
        if commands.is_empty() {
            self.ensure_connected()?;
            return Ok(Vec::new());
        }
        self.request(|reply| SessionRequest::Run { commands, reply })
            .await?
    }

    /// Send `payload` to `channel` as a chunked transfer.
    ///
    /// Commands are sent one at a time, each waiting for its response. The
    /// first failure aborts the transfer.
    pub async fn send_data(
        &self,
        channel: &str,
        payload: impl Into<Payload>,
    ) -> Result<TransferReceipt> {
        self.ensure_connected()?;
        let payload = payload.into();
        let transfer_id = random_id(self.config.transfer_id_len);
        let sample_request_id = random_id(self.config.request_id_len);
        let plan = plan_transfer(
            &self.config.namespace,
            channel,
            &payload,
            &transfer_id,
            &sample_request_id,
            self.config.max_envelope_bytes,
        )?;

        info!(
            channel,
            transfer_id = %transfer_id,
            fragments = plan.fragment_count(),
            "sending transfer"
        );

        let started = Instant::now();
        for command in &plan.commands {
            let result = self
                .run_command(command.clone())
                .await
                .and_then(OutputExt::into_result);
            if let Err(source) = result {
                warn!(channel, transfer_id = %transfer_id, error = %source, "transfer aborted");
                return Err(PeerError::TransferAborted {
                    transfer_id,
                    source: Box::new(source),
                });
            }
        }

        Ok(TransferReceipt {
            channel: channel.to_string(),
            fragments: plan.fragment_count(),
            commands: plan.commands.len(),
            transfer_id,
            elapsed: started.elapsed(),
        })
    }

    /// Show `message` in chat to every player.
    pub async fn say(&self, message: &str) -> Result<()> {
        self.ensure_connected()?;
        let sample_request_id = random_id(self.config.request_id_len);
        for command in plan_say(message, &sample_request_id, self.config.max_envelope_bytes)? {
            self.run_command(command).await?.into_result()?;
        }
        Ok(())
    }

    /// Register the listener for `channel`, replacing any earlier one.
    pub async fn subscribe<F>(&self, channel: &str, listener: F) -> Result<()>
    where
        F: FnMut(crate::registry::Delivery) + Send + 'static,
    {
        validate_channel_name(channel)?;
        let replaced = self
            .request(|reply| SessionRequest::Subscribe {
                channel: channel.to_string(),
                listener: Box::new(listener),
                reply,
            })
            .await?;
        if replaced {
            debug!(channel, "replaced channel listener");
        }
        Ok(())
    }

    /// Remove the listener for `channel`. Returns whether one was registered.
    pub async fn unsubscribe(&self, channel: &str) -> Result<bool> {
        self.request(|reply| SessionRequest::Unsubscribe {
            channel: channel.to_string(),
            reply,
        })
        .await
    }

    /// Register the listener for a game event, subscribing on first use.
    pub async fn subscribe_event<F>(&self, event: &str, listener: F) -> Result<()>
    where
        F: FnMut(&Header, &Value) + Send + 'static,
    {
        self.request(|reply| SessionRequest::SubscribeEvent {
            event: event.to_string(),
            listener: Box::new(listener),
            reply,
        })
        .await?
    }

    pub async fn stats(&self) -> Result<SessionStats> {
        self.request(|reply| SessionRequest::Stats { reply }).await
    }

    /// Close the connection. Pending batches fail with `Disconnected`.
    pub async fn close(&self, reason: &str) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        match self
            .request(|reply| SessionRequest::Close {
                reason: reason.to_string(),
                reply,
            })
            .await
        {
            Ok(()) | Err(PeerError::ConnectionUnavailable | PeerError::Disconnected(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(PeerError::ConnectionUnavailable)
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionRequest,
    ) -> Result<T> {
        self.ensure_connected()?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| PeerError::ConnectionUnavailable)?;
        rx.await
            .map_err(|_| PeerError::Disconnected("session ended".to_string()))
    }
}

/// Owns one connection and all state attached to it.
pub struct Session<K, S> {
    sink: K,
    source: S,
    requests: mpsc::Receiver<SessionRequest>,
    config: Arc<SessionConfig>,
    batches: BatchTable<BatchReply>,
    transfers: TransferManager,
    listeners: ListenerRegistry<TransferListener>,
    events: ListenerRegistry<EventListener>,
    stats: SessionStats,
    ended: CancellationToken,
    close_ack: Option<oneshot::Sender<()>>,
}

impl<K, S> Session<K, S>
where
    K: MessageSink,
    S: MessageSource,
{
    /// Create a session over an already-connected transport.
    pub fn new(sink: K, source: S, config: SessionConfig) -> (Self, SessionHandle) {
        let (tx, requests) = mpsc::channel(config.request_buffer.max(1));
        let config = Arc::new(config);
        let ended = CancellationToken::new();

        let session = Self {
            sink,
            source,
            requests,
            transfers: TransferManager::new(config.transfer_timeout),
            config: Arc::clone(&config),
            batches: BatchTable::new(),
            listeners: ListenerRegistry::new(),
            events: ListenerRegistry::new(),
            stats: SessionStats::default(),
            ended: ended.clone(),
            close_ack: None,
        };
        let handle = SessionHandle { tx, config, ended };
        (session, handle)
    }

    /// Create a session and run it on a new task.
    pub fn spawn(sink: K, source: S, config: SessionConfig) -> (SessionHandle, JoinHandle<()>) {
        let (session, handle) = Self::new(sink, source, config);
        (handle, tokio::spawn(session.run()))
    }

    /// Serve until the connection closes or the session is closed.
    pub async fn run(mut self) {
        info!("session started");
        let mut requests_open = true;

        let ending = loop {
            let deadline = self.next_deadline();
            tokio::select! {
                inbound = self.source.recv() => match inbound {
                    Some(Ok(text)) => self.handle_inbound(&text),
                    Some(Err(err)) => {
                        warn!(error = %err, "transport error");
                        break Ending::transport(&err);
                    }
                    None => break Ending::normal("connection closed"),
                },
                request = self.requests.recv(), if requests_open => match request {
                    Some(request) => {
                        if let Some(ending) = self.handle_request(request).await {
                            break ending;
                        }
                    }
                    None => requests_open = false,
                },
                () = sleep_until_deadline(deadline) => self.sweep(Instant::now()),
            }
        };

        self.shutdown(ending).await;
    }

    async fn handle_request(&mut self, request: SessionRequest) -> Option<Ending> {
        match request {
            SessionRequest::Run { commands, reply } => {
                return self.start_batch(commands, reply).await;
            }
            SessionRequest::Subscribe {
                channel,
                listener,
                reply,
            } => {
                let replaced = self.listeners.subscribe(channel, listener).is_some();
                let _ = reply.send(replaced);
            }
            SessionRequest::Unsubscribe { channel, reply } => {
                let _ = reply.send(self.listeners.unsubscribe(&channel).is_some());
            }
            SessionRequest::SubscribeEvent {
                event,
                listener,
                reply,
            } => {
                let first = !self.events.contains(&event);
                self.events.subscribe(event.clone(), listener);
                if first {
                    let request_id = self.fresh_request_id(&[]);
                    let envelope =
                        match encode_subscription(&request_id, &event, MessagePurpose::Subscribe) {
                            Ok(envelope) => envelope,
                            Err(err) => {
                                let _ = reply.send(Err(err.into()));
                                return None;
                            }
                        };
                    if let Err(err) = self.sink.send(envelope).await {
                        let ending = Ending::transport(&err);
                        let _ = reply.send(Err(err.into()));
                        return Some(ending);
                    }
                    info!(event = %event, "subscribed to game event");
                }
                let _ = reply.send(Ok(()));
            }
            SessionRequest::Stats { reply } => {
                let mut stats = self.stats;
                stats.transfers = self.transfers.stats();
                let _ = reply.send(stats);
            }
            SessionRequest::Close { reason, reply } => {
                self.close_ack = Some(reply);
                return Some(Ending::normal(reason));
            }
        }
        None
    }

    async fn start_batch(&mut self, commands: Vec<String>, reply: BatchReply) -> Option<Ending> {
        if commands.is_empty() {
            let _ = reply.send(Ok(Vec::new()));
            return None;
        }

        let mut request_ids = Vec::with_capacity(commands.len());
        let mut envelopes = Vec::with_capacity(commands.len());
        for command in &commands {
            let request_id = self.fresh_request_id(&request_ids);
            let envelope = match encode_command_request(&request_id, command) {
                Ok(envelope) => envelope,
                Err(err) => {
                    let _ = reply.send(Err(err.into()));
                    return None;
                }
            };
            if envelope.len() > self.config.max_envelope_bytes {
                warn!(
                    size = envelope.len(),
                    max = self.config.max_envelope_bytes,
                    "command too large, batch rejected"
                );
                let _ = reply.send(Err(PeerError::PayloadTooLarge {
                    size: envelope.len(),
                    max: self.config.max_envelope_bytes,
                }));
                return None;
            }
            request_ids.push(request_id);
            envelopes.push(envelope);
        }

        let deadline = Instant::now() + self.config.request_timeout;
        let batch_id = self.batches.open(request_ids.clone(), deadline, reply);

        let outgoing = request_ids.iter().zip(envelopes).zip(&commands);
        for ((request_id, envelope), command) in outgoing {
            debug!(request_id = %request_id, batch_id, command = %command, "sending command");
            if let Err(err) = self.sink.send(envelope).await {
                warn!(error = %err, "failed to send command");
                let ending = Ending::transport(&err);
                if let Some(reply) = self.batches.cancel(batch_id) {
                    let _ = reply.send(Err(err.into()));
                }
                return Some(ending);
            }
            self.stats.commands_sent += 1;
        }
        None
    }

    fn handle_inbound(&mut self, text: &str) {
        let message = match decode_inbound(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping undecodable message");
                return;
            }
        };

        if message.is_command_response() {
            self.on_command_response(&message);
            return;
        }

        match message.event_name() {
            Some(name) if name == self.config.transfer_event => self.on_transfer_event(&message),
            Some(name) => {
                self.events
                    .dispatch_event(name, &message.header, &message.body);
            }
            None => debug!(purpose = ?message.header.message_purpose, "unhandled message"),
        }
    }

    fn on_command_response(&mut self, message: &InboundMessage) {
        let request_id = message.header.request_id.as_str();
        match self.batches.on_response(request_id, message.command_output()) {
            ResponseOutcome::Completed {
                batch_id,
                handle,
                results,
            } => {
                self.stats.responses_matched += 1;
                self.stats.batches_completed += 1;
                debug!(batch_id, commands = results.len(), "batch completed");
                let _ = handle.send(Ok(results));
            }
            ResponseOutcome::Pending => self.stats.responses_matched += 1,
            ResponseOutcome::Unknown => {
                debug!(request_id, "response for unknown or expired request");
            }
        }
    }

    fn on_transfer_event(&mut self, message: &InboundMessage) {
        let body = &message.body;
        let (Some(address), Some(text)) = (
            body.get("id").and_then(Value::as_str),
            body.get("message").and_then(Value::as_str),
        ) else {
            warn!("transfer event without id or message");
            return;
        };

        let Some(channel) = parse_channel_address(&self.config.namespace, address) else {
            debug!(address, "script event outside our namespace");
            return;
        };

        if let Some(completed) = self.transfers.handle(channel, text, Instant::now()) {
            if self.listeners.dispatch(completed) == DispatchOutcome::Delivered {
                self.stats.deliveries += 1;
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        for expired in self.batches.expire(now) {
            warn!(
                batch_id = expired.batch_id,
                answered = expired.answered,
                expected = expired.expected,
                "command batch timed out"
            );
            self.stats.batches_timed_out += 1;
            let _ = expired
                .handle
                .send(Err(PeerError::BatchTimeout(self.config.request_timeout)));
        }
        self.transfers.expire(now);
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.batches.next_deadline(), self.transfers.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn fresh_request_id(&self, reserved: &[String]) -> String {
        loop {
            let id = random_id(self.config.request_id_len);
            if !self.batches.contains_request(&id) && !reserved.contains(&id) {
                return id;
            }
        }
    }

    async fn shutdown(&mut self, ending: Ending) {
        let Ending { code, reason } = ending;
        let pending = self.batches.drain();
        if !pending.is_empty() {
            warn!(batches = pending.len(), reason = %reason, "failing pending batches");
        }
        for reply in pending {
            let _ = reply.send(Err(PeerError::Disconnected(reason.clone())));
        }

        self.ended.cancel();
        self.requests.close();

        if let Err(err) = self.sink.close(code, &reason).await {
            debug!(error = %err, "close after disconnect");
        }
        info!(code, reason = %reason, open_transfers = self.transfers.len(), "session ended");

        if let Some(ack) = self.close_ack.take() {
            let _ = ack.send(());
        }
    }
}

/// Why the session loop stopped, and the close code to send for it.
struct Ending {
    code: u16,
    reason: String,
}

impl Ending {
    fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_NORMAL,
            reason: reason.into(),
        }
    }

    fn transport(err: &wsbridge_transport::TransportError) -> Self {
        Self {
            code: CLOSE_INTERNAL_ERROR,
            reason: format!("transport error: {err}"),
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Random alphanumeric id.
pub(crate) fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len.max(1))
        .map(char::from)
        .collect()
}
