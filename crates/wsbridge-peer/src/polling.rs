//! Polling of shared scoreboard state.
//!
//! The game cannot push to us on this path. A producer writes a value as a
//! scoreboard entry instead; we list the scoreboard, hand every new entry to
//! a callback, and remove the entry's objective so it is not seen again.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::registry::invoke_guarded;
use crate::session::SessionHandle;

/// Query issued on every poll.
pub const DEFAULT_QUERY_COMMAND: &str = "scoreboard players list *";

/// Removal command; `{key}` is replaced with the entry key.
pub const DEFAULT_REMOVAL_COMMAND: &str = "scoreboard objectives remove \"{key}\"";

/// Matches `- <value>: <score> (<key>)` lines of the query response.
pub const DEFAULT_ENTRY_PATTERN: &str =
    r"(?m)^\s*-\s*(?P<value>.+?):\s*(?P<score>-?\d+)\s*\((?P<key>[^()\s]+)\)\s*$";

/// Polling settings.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub query_command: String,
    pub removal_command: String,
    /// Regex with `value`, `score` and `key` named groups.
    pub entry_pattern: String,
    pub interval: Duration,
    /// How long a consumed key is ignored.
    pub dedup_window: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            query_command: DEFAULT_QUERY_COMMAND.to_string(),
            removal_command: DEFAULT_REMOVAL_COMMAND.to_string(),
            entry_pattern: DEFAULT_ENTRY_PATTERN.to_string(),
            interval: Duration::from_millis(50),
            dedup_window: Duration::from_millis(3000),
        }
    }
}

/// One parsed scoreboard entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollEntry {
    pub value: String,
    pub score: i64,
    pub key: String,
}

/// Parses query responses into entries.
#[derive(Debug, Clone)]
pub struct EntryParser {
    pattern: Regex,
}

impl EntryParser {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Entries in response order. Lines that do not match are skipped.
    pub fn parse(&self, text: &str) -> Vec<PollEntry> {
        let text = strip_formatting(text);
        self.pattern
            .captures_iter(&text)
            .filter_map(|caps| {
                Some(PollEntry {
                    value: caps.name("value")?.as_str().trim().to_string(),
                    score: caps.name("score")?.as_str().parse().ok()?,
                    key: caps.name("key")?.as_str().to_string(),
                })
            })
            .collect()
    }
}

/// Remove `§x` formatting codes.
pub fn strip_formatting(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '§' {
            chars.next();
        } else {
            out.push(ch);
        }
    }
    out
}

/// Keys recently consumed, each suppressed until its own deadline.
#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    suppressed: HashMap<String, Instant>,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            suppressed: HashMap::new(),
        }
    }

    /// Admit `key` unless it is suppressed. An admitted key is suppressed
    /// for the next window.
    pub fn admit(&mut self, key: &str, now: Instant) -> bool {
        if let Some(until) = self.suppressed.get(key) {
            if now < *until {
                return false;
            }
        }
        self.suppressed.insert(key.to_string(), now + self.window);
        true
    }

    /// Forget keys whose window has passed.
    pub fn prune(&mut self, now: Instant) {
        self.suppressed.retain(|_, until| now < *until);
    }

    pub fn len(&self) -> usize {
        self.suppressed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suppressed.is_empty()
    }
}

/// Reader side of the polling path for one session.
pub struct PollingChannel {
    session: SessionHandle,
    config: PollingConfig,
    parser: EntryParser,
    dedup: DedupWindow,
}

impl PollingChannel {
    pub fn new(session: SessionHandle, config: PollingConfig) -> Result<Self> {
        let parser = EntryParser::new(&config.entry_pattern)?;
        let dedup = DedupWindow::new(config.dedup_window);
        Ok(Self {
            session,
            config,
            parser,
            dedup,
        })
    }

    /// Query once and dispatch every new entry. Returns how many were
    /// dispatched.
    pub async fn poll_once<F>(&mut self, on_entry: &mut F) -> Result<usize>
    where
        F: FnMut(PollEntry),
    {
        let output = self
            .session
            .run_command(self.config.query_command.clone())
            .await?;
        let now = Instant::now();
        self.dedup.prune(now);

        if !output.is_success() {
            // An empty scoreboard is reported as a failed query.
            debug!(
                status = output.status_code,
                message = %output.status_message,
                "poll query returned no entries"
            );
            return Ok(0);
        }

        let mut dispatched = 0;
        for entry in self.parser.parse(&output.status_message) {
            if !self.dedup.admit(&entry.key, now) {
                continue;
            }
            let key = entry.key.clone();
            debug!(key = %key, score = entry.score, "poll entry");
            invoke_guarded("poll", &key, || on_entry(entry));
            self.spawn_removal(&key);
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Poll every interval until the session ends or `cancel` fires.
    /// Returns the number of entries dispatched.
    pub async fn run<F>(mut self, cancel: CancellationToken, mut on_entry: F) -> u64
    where
        F: FnMut(PollEntry),
    {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut total = 0u64;

        info!(interval_ms = self.config.interval.as_millis() as u64, "polling started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.session.closed() => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once(&mut on_entry).await {
                Ok(n) => total += n as u64,
                Err(PeerError::ConnectionUnavailable | PeerError::Disconnected(_)) => break,
                Err(err) => warn!(error = %err, "poll failed"),
            }
        }
        info!(entries = total, "polling stopped");
        total
    }

    fn spawn_removal(&self, key: &str) {
        let command = self.config.removal_command.replace("{key}", key);
        let session = self.session.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            match session.run_command(command).await {
                Ok(output) if output.is_success() => debug!(key = %key, "entry removed"),
                Ok(output) => warn!(
                    key = %key,
                    status = output.status_code,
                    message = %output.status_message,
                    "entry removal failed"
                ),
                Err(err) => warn!(key = %key, error = %err, "entry removal failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use wsbridge_transport::{memory, MessageSink, MessageSource};

    use super::*;
    use crate::session::{Session, SessionConfig};

    const LISTING: &str = "Showing 2 tracked objective(s) for *:\n- alpha: 1 (k1)\n- beta: 2 (k2)";

    /// Start a session whose game side answers every query with `LISTING`,
    /// answers removals with `removal_status` and reports them on the
    /// returned channel.
    fn polled_session(removal_status: i64) -> (SessionHandle, mpsc::UnboundedReceiver<String>) {
        let (ours, theirs) = memory::pair();
        let (sink, source) = ours.into_split();
        let (handle, _task) = Session::spawn(sink, source, SessionConfig::default());

        let (removed_tx, removed_rx) = mpsc::unbounded_channel();
        let (mut game_sink, mut game_source) = theirs.into_split();
        tokio::spawn(async move {
            while let Some(Ok(text)) = game_source.recv().await {
                let request: Value = serde_json::from_str(&text).unwrap();
                let command = request["body"]["commandLine"].as_str().unwrap().to_string();
                let (status, message) = if command == DEFAULT_QUERY_COMMAND {
                    (0, LISTING.to_string())
                } else {
                    let _ = removed_tx.send(command);
                    (removal_status, "removed".to_string())
                };
                let response = json!({
                    "header": {"requestId": request["header"]["requestId"], "messagePurpose": "commandResponse"},
                    "body": {"statusCode": status, "statusMessage": message}
                });
                if game_sink.send(response.to_string()).await.is_err() {
                    break;
                }
            }
        });
        (handle, removed_rx)
    }

    #[test]
    fn parses_listing() {
        let text = "§aShowing 2 tracked objective(s) for *:\n\
                    - §ehello world§r: 3 (k1)\n\
                    - other: -12 (k2)\n\
                    not an entry";
        let entries = EntryParser::new(DEFAULT_ENTRY_PATTERN).unwrap().parse(text);
        assert_eq!(
            entries,
            vec![
                PollEntry {
                    value: "hello world".to_string(),
                    score: 3,
                    key: "k1".to_string()
                },
                PollEntry {
                    value: "other".to_string(),
                    score: -12,
                    key: "k2".to_string()
                },
            ]
        );
    }

    #[test]
    fn custom_pattern() {
        let parser = EntryParser::new(r"(?P<key>\w+)=(?P<value>\w+)@(?P<score>\d+)").unwrap();
        let entries = parser.parse("a=x@1 b=y@2");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].key, "b");
        assert_eq!(entries[1].score, 2);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(matches!(
            EntryParser::new("(unclosed"),
            Err(PeerError::InvalidPattern(_))
        ));
    }

    #[test]
    fn strips_formatting_codes() {
        assert_eq!(strip_formatting("§l§bbold§r plain"), "bold plain");
        assert_eq!(strip_formatting("trailing§"), "trailing");
    }

    #[test]
    fn dedup_suppresses_within_window() {
        let mut dedup = DedupWindow::new(Duration::from_millis(3000));
        let start = Instant::now();

        assert!(dedup.admit("k", start));
        assert!(!dedup.admit("k", start + Duration::from_millis(2999)));
        assert!(dedup.admit("other", start));

        dedup.prune(start + Duration::from_millis(3000));
        assert!(dedup.is_empty());
        assert!(dedup.admit("k", start + Duration::from_millis(3000)));
        assert_eq!(dedup.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_dispatches_new_entries_once() {
        let (session, mut removed) = polled_session(0);
        let mut channel = PollingChannel::new(session, PollingConfig::default()).unwrap();
        let mut seen = Vec::new();

        let n = channel.poll_once(&mut |entry| seen.push(entry)).await.unwrap();
        assert_eq!(n, 2);
        let keys: Vec<&str> = seen.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k2"]);
        assert_eq!(seen[1].value, "beta");

        let mut removals = vec![removed.recv().await.unwrap(), removed.recv().await.unwrap()];
        removals.sort();
        assert_eq!(
            removals,
            vec![
                "scoreboard objectives remove \"k1\"".to_string(),
                "scoreboard objectives remove \"k2\"".to_string(),
            ]
        );

        // Same listing inside the window: nothing new.
        let n = channel.poll_once(&mut |entry| seen.push(entry)).await.unwrap();
        assert_eq!(n, 0);

        // After the window the keys are admitted again.
        tokio::time::sleep(Duration::from_millis(3001)).await;
        let n = channel.poll_once(&mut |entry| seen.push(entry)).await.unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_removal_keeps_polling() {
        let (session, mut removed) = polled_session(-2147483648);
        let observer = session.clone();
        let mut channel = PollingChannel::new(session, PollingConfig::default()).unwrap();
        let mut seen = Vec::new();

        assert_eq!(channel.poll_once(&mut |entry| seen.push(entry)).await.unwrap(), 2);
        removed.recv().await.unwrap();
        removed.recv().await.unwrap();

        // The rejected removals leave the session and the window intact.
        assert_eq!(channel.poll_once(&mut |entry| seen.push(entry)).await.unwrap(), 0);
        assert!(observer.is_connected());
        assert_eq!(observer.stats().await.unwrap().responses_matched, 4);

        // The entries are still on the scoreboard and return after the window.
        tokio::time::sleep(Duration::from_millis(3001)).await;
        assert_eq!(channel.poll_once(&mut |entry| seen.push(entry)).await.unwrap(), 2);
        let keys: Vec<&str> = seen.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k2", "k1", "k2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel_and_survives_panics() {
        let (session, _removed) = polled_session(0);
        let channel = PollingChannel::new(session, PollingConfig::default()).unwrap();
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            stopper.cancel();
        });

        let mut calls = 0;
        let total = channel
            .run(cancel, |entry| {
                calls += 1;
                if entry.key == "k1" {
                    panic!("consumer bug");
                }
            })
            .await;
        assert_eq!(total, 2);
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_session_ends() {
        let (session, _removed) = polled_session(0);
        let closer = session.clone();
        let channel = PollingChannel::new(session, PollingConfig::default()).unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            closer.close("done").await.unwrap();
        });

        channel.run(CancellationToken::new(), |_| {}).await;
    }
}
