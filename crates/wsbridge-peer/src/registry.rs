//! Single-consumer listener registries and guarded dispatch.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};
use wsbridge_frame::{decode_payload, Header, Payload};

use crate::error::TransferError;
use crate::transfer::CompletedTransfer;

/// A decoded transfer as handed to its listener.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivery {
    pub channel: String,
    pub transfer_id: String,
    pub payload: Payload,
    /// Time between `BEGIN` and `END` on the receiving side.
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
}

impl Delivery {
    /// Decode the reassembled text of a completed transfer.
    pub fn decode(completed: CompletedTransfer) -> Result<Self, TransferError> {
        let payload = decode_payload(&completed.data).map_err(|source| TransferError::Decode {
            transfer_id: completed.transfer_id.clone(),
            source,
        })?;
        Ok(Self {
            channel: completed.channel,
            transfer_id: completed.transfer_id,
            payload,
            latency: completed.latency,
        })
    }
}

fn as_millis<S>(latency: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(latency.as_millis() as u64)
}

/// Callback for completed transfers on one channel.
pub type TransferListener = Box<dyn FnMut(Delivery) + Send>;

/// Callback for one game event name.
pub type EventListener = Box<dyn FnMut(&Header, &Value) + Send>;

/// What happened to a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    NoListener,
    DecodeFailed,
    ListenerPanicked,
}

/// Name → listener. Subscribing again under the same name replaces the
/// previous listener.
pub struct ListenerRegistry<L> {
    listeners: HashMap<String, L>,
}

impl<L> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
        }
    }

    /// Register `listener`, returning the one it replaced.
    pub fn subscribe(&mut self, name: impl Into<String>, listener: L) -> Option<L> {
        self.listeners.insert(name.into(), listener)
    }

    pub fn unsubscribe(&mut self, name: &str) -> Option<L> {
        self.listeners.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.listeners.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.listeners.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ListenerRegistry<TransferListener> {
    /// Decode a completed transfer and hand it to its channel's listener.
    pub fn dispatch(&mut self, completed: CompletedTransfer) -> DispatchOutcome {
        let channel = completed.channel.clone();
        let delivery = match Delivery::decode(completed) {
            Ok(delivery) => delivery,
            Err(err) => {
                error!(channel = %channel, error = %err, "failed to decode transfer");
                return DispatchOutcome::DecodeFailed;
            }
        };

        let Some(listener) = self.listeners.get_mut(&channel) else {
            warn!(
                channel = %channel,
                transfer_id = %delivery.transfer_id,
                "no listener for channel, dropping transfer"
            );
            return DispatchOutcome::NoListener;
        };

        if invoke_guarded("transfer", &channel, || listener(delivery)) {
            DispatchOutcome::Delivered
        } else {
            DispatchOutcome::ListenerPanicked
        }
    }
}

impl ListenerRegistry<EventListener> {
    /// Hand a game event to the listener registered for `name`.
    pub fn dispatch_event(&mut self, name: &str, header: &Header, body: &Value) -> bool {
        let Some(listener) = self.listeners.get_mut(name) else {
            debug!(event = name, "no listener for event");
            return false;
        };
        invoke_guarded("event", name, || listener(header, body))
    }
}

/// Run a user callback, containing any panic. Returns `false` if it panicked.
pub(crate) fn invoke_guarded<F: FnOnce()>(kind: &str, name: &str, callback: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(cause) => {
            let reason = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(kind, name, reason = %reason, "listener panicked");
            false
        }
    }
}
