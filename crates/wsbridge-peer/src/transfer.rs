//! Inbound transfer reassembly.
//!
//! A transfer is OPEN from its `BEGIN` until it is reassembled by a
//! consistent `END`, discarded by an inconsistent one, or expired. Fragments
//! may arrive in any order; a repeated index overwrites the earlier data.
//! `FRAGMENT` and `END` only apply on the channel that sent the `BEGIN`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use wsbridge_frame::ControlMessage;

use crate::error::TransferError;

/// Default lifetime of an open transfer (600 game ticks).
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);

struct Transfer {
    channel: String,
    total: usize,
    fragments: HashMap<usize, String>,
    started: Instant,
    deadline: Instant,
}

/// A reassembled transfer, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub channel: String,
    pub transfer_id: String,
    pub data: String,
    /// Time between `BEGIN` and `END`.
    pub latency: Duration,
}

/// Lifetime counters for transfers seen by one manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TransferStats {
    pub opened: u64,
    pub completed: u64,
    pub discarded: u64,
    pub expired: u64,
}

/// Open transfers keyed by transfer id.
pub struct TransferManager {
    transfers: HashMap<String, Transfer>,
    timeout: Duration,
    stats: TransferStats,
}

impl Default for TransferManager {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSFER_TIMEOUT)
    }
}

impl TransferManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            transfers: HashMap::new(),
            timeout,
            stats: TransferStats::default(),
        }
    }

    /// Number of open transfers.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// True if `transfer_id` is open.
    pub fn is_open(&self, transfer_id: &str) -> bool {
        self.transfers.contains_key(transfer_id)
    }

    /// Fragments received so far for an open transfer.
    pub fn received(&self, transfer_id: &str) -> Option<usize> {
        self.transfers.get(transfer_id).map(|t| t.fragments.len())
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Earliest expiry deadline among open transfers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.transfers.values().map(|t| t.deadline).min()
    }

    /// Open a transfer. Returns `true` if an open transfer with the same id
    /// was replaced; its fragments are dropped and the deadline re-armed.
    pub fn begin(
        &mut self,
        channel: &str,
        transfer_id: &str,
        total: usize,
        now: Instant,
    ) -> Result<bool, TransferError> {
        if total == 0 {
            return Err(TransferError::InvalidTotal {
                transfer_id: transfer_id.to_string(),
                total,
            });
        }

        let replaced = self
            .transfers
            .insert(
                transfer_id.to_string(),
                Transfer {
                    channel: channel.to_string(),
                    total,
                    fragments: HashMap::with_capacity(total.min(1024)),
                    started: now,
                    deadline: now + self.timeout,
                },
            )
            .is_some();
        self.stats.opened += 1;
        Ok(replaced)
    }

    fn open_on(
        &mut self,
        channel: &str,
        transfer_id: &str,
    ) -> Result<&mut Transfer, TransferError> {
        let transfer =
            self.transfers
                .get_mut(transfer_id)
                .ok_or_else(|| TransferError::UnknownTransfer {
                    transfer_id: transfer_id.to_string(),
                })?;
        if transfer.channel != channel {
            return Err(TransferError::ChannelMismatch {
                transfer_id: transfer_id.to_string(),
                opened_on: transfer.channel.clone(),
                received_on: channel.to_string(),
            });
        }
        Ok(transfer)
    }

    /// Store one fragment. The last write for an index wins.
    pub fn fragment(
        &mut self,
        channel: &str,
        transfer_id: &str,
        index: usize,
        data: &str,
    ) -> Result<(), TransferError> {
        let transfer = self.open_on(channel, transfer_id)?;

        if index >= transfer.total {
            return Err(TransferError::FragmentOutOfRange {
                transfer_id: transfer_id.to_string(),
                index,
                total: transfer.total,
            });
        }

        transfer.fragments.insert(index, data.to_string());
        Ok(())
    }

    /// Close a transfer. Once the channel matches, the record is removed
    /// whatever the outcome.
    pub fn end(
        &mut self,
        channel: &str,
        transfer_id: &str,
        now: Instant,
    ) -> Result<CompletedTransfer, TransferError> {
        self.open_on(channel, transfer_id)?;
        let transfer =
            self.transfers
                .remove(transfer_id)
                .ok_or_else(|| TransferError::UnknownTransfer {
                    transfer_id: transfer_id.to_string(),
                })?;

        let received = transfer.fragments.len();
        if received != transfer.total {
            self.stats.discarded += 1;
            return Err(TransferError::Incomplete {
                transfer_id: transfer_id.to_string(),
                received,
                total: transfer.total,
            });
        }

        let data = match reassemble(transfer_id, &transfer.fragments, transfer.total) {
            Ok(data) => data,
            Err(err) => {
                self.stats.discarded += 1;
                return Err(err);
            }
        };

        self.stats.completed += 1;
        Ok(CompletedTransfer {
            channel: transfer.channel,
            transfer_id: transfer_id.to_string(),
            data,
            latency: now.saturating_duration_since(transfer.started),
        })
    }

    /// Remove every transfer whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<TransferError> {
        let expired: Vec<String> = self
            .transfers
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for transfer_id in expired {
            if let Some(transfer) = self.transfers.remove(&transfer_id) {
                self.stats.expired += 1;
                warn!(
                    transfer_id = %transfer_id,
                    channel = %transfer.channel,
                    received = transfer.fragments.len(),
                    total = transfer.total,
                    "transfer expired"
                );
                out.push(TransferError::Expired {
                    transfer_id,
                    received: transfer.fragments.len(),
                    total: transfer.total,
                });
            }
        }
        out
    }

    /// Apply one raw control message received on `channel`.
    ///
    /// Problems are logged and swallowed; a completed transfer is returned
    /// for dispatch.
    pub fn handle(
        &mut self,
        channel: &str,
        message: &str,
        now: Instant,
    ) -> Option<CompletedTransfer> {
        let control = match parse_control(message) {
            Ok(control) => control,
            Err(err) => {
                warn!(channel, error = %err, "ignoring malformed control message");
                return None;
            }
        };

        match control {
            ControlMessage::Begin { total, transfer_id } => {
                match self.begin(channel, &transfer_id, total, now) {
                    Ok(true) => warn!(
                        channel,
                        transfer_id = %transfer_id,
                        total,
                        "transfer restarted, earlier fragments dropped"
                    ),
                    Ok(false) => info!(channel, transfer_id = %transfer_id, total, "transfer started"),
                    Err(err) => warn!(channel, error = %err, "rejecting transfer"),
                }
                None
            }
            ControlMessage::Fragment {
                index,
                transfer_id,
                data,
            } => {
                match self.fragment(channel, &transfer_id, index, &data) {
                    Ok(()) => debug!(
                        transfer_id = %transfer_id,
                        index,
                        len = data.len(),
                        "fragment stored"
                    ),
                    Err(err) => warn!(channel, error = %err, "ignoring fragment"),
                }
                None
            }
            ControlMessage::End { transfer_id } => match self.end(channel, &transfer_id, now) {
                Ok(completed) => {
                    info!(
                        channel = %completed.channel,
                        transfer_id = %transfer_id,
                        bytes = completed.data.len(),
                        latency_ms = completed.latency.as_millis() as u64,
                        "transfer reassembled"
                    );
                    Some(completed)
                }
                Err(err @ TransferError::MissingFragment { .. }) => {
                    error!(channel, error = %err, "aborting transfer");
                    None
                }
                Err(err) => {
                    warn!(channel, error = %err, "discarding transfer");
                    None
                }
            },
        }
    }
}

/// Parse one inbound control message.
pub fn parse_control(message: &str) -> Result<ControlMessage, TransferError> {
    Ok(ControlMessage::parse(message)?)
}

/// Concatenate fragments `0..total` in index order.
pub fn reassemble(
    transfer_id: &str,
    fragments: &HashMap<usize, String>,
    total: usize,
) -> Result<String, TransferError> {
    let mut data = String::with_capacity(fragments.values().map(String::len).sum());
    for index in 0..total {
        let fragment = fragments
            .get(&index)
            .ok_or_else(|| TransferError::MissingFragment {
                transfer_id: transfer_id.to_string(),
                index,
            })?;
        data.push_str(fragment);
    }
    Ok(data)
}
