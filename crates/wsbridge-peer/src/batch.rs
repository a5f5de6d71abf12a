//! Correlation of command responses to batches.
//!
//! Every command in a batch carries its own request id. Responses fill slots
//! in issue order; a batch completes when the last slot is filled, or fails
//! as a whole when its deadline passes first.

use std::collections::HashMap;

use tokio::time::Instant;
use wsbridge_frame::CommandOutput;

/// Opaque batch identifier.
pub type BatchId = u64;

struct Batch<H> {
    request_ids: Vec<String>,
    slots: Vec<Option<CommandOutput>>,
    received: usize,
    deadline: Instant,
    handle: H,
}

/// What a response did to its batch.
#[derive(Debug)]
pub enum ResponseOutcome<H> {
    /// The last slot was filled. Results are in issue order.
    Completed {
        batch_id: BatchId,
        handle: H,
        results: Vec<CommandOutput>,
    },
    /// Stored; other responses are still outstanding.
    Pending,
    /// No pending request has this id (already answered, expired or foreign).
    Unknown,
}

/// A batch whose deadline passed before every response arrived.
#[derive(Debug)]
pub struct ExpiredBatch<H> {
    pub batch_id: BatchId,
    pub handle: H,
    pub answered: usize,
    pub expected: usize,
}

/// Pending batches keyed by id, plus the request-id index into them.
///
/// `H` is the completion handle returned to the owner when a batch settles.
pub struct BatchTable<H> {
    batches: HashMap<BatchId, Batch<H>>,
    requests: HashMap<String, (BatchId, usize)>,
    next_id: BatchId,
}

impl<H> Default for BatchTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> BatchTable<H> {
    pub fn new() -> Self {
        Self {
            batches: HashMap::new(),
            requests: HashMap::new(),
            next_id: 0,
        }
    }

    /// True if `request_id` is awaiting a response.
    pub fn contains_request(&self, request_id: &str) -> bool {
        self.requests.contains_key(request_id)
    }

    /// Number of pending batches.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of request ids still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Register a batch of already-unique request ids.
    ///
    /// An empty batch would never complete; callers resolve those directly.
    pub fn open(&mut self, request_ids: Vec<String>, deadline: Instant, handle: H) -> BatchId {
        debug_assert!(!request_ids.is_empty(), "empty batches are never opened");

        let batch_id = self.next_id;
        self.next_id += 1;

        for (slot, request_id) in request_ids.iter().enumerate() {
            let previous = self.requests.insert(request_id.clone(), (batch_id, slot));
            debug_assert!(previous.is_none(), "request id {request_id} reused");
        }

        self.batches.insert(
            batch_id,
            Batch {
                slots: vec![None; request_ids.len()],
                request_ids,
                received: 0,
                deadline,
                handle,
            },
        );
        batch_id
    }

    /// Consume the response for `request_id`.
    pub fn on_response(&mut self, request_id: &str, output: CommandOutput) -> ResponseOutcome<H> {
        let Some((batch_id, slot)) = self.requests.remove(request_id) else {
            return ResponseOutcome::Unknown;
        };
        let Some(batch) = self.batches.get_mut(&batch_id) else {
            return ResponseOutcome::Unknown;
        };

        if batch.slots[slot].replace(output).is_none() {
            batch.received += 1;
        }
        if batch.received < batch.slots.len() {
            return ResponseOutcome::Pending;
        }

        match self.batches.remove(&batch_id) {
            Some(batch) => ResponseOutcome::Completed {
                batch_id,
                handle: batch.handle,
                results: batch.slots.into_iter().flatten().collect(),
            },
            None => ResponseOutcome::Unknown,
        }
    }

    /// Remove a batch without completing it, purging its request ids.
    pub fn cancel(&mut self, batch_id: BatchId) -> Option<H> {
        let batch = self.batches.remove(&batch_id)?;
        self.purge(&batch.request_ids);
        Some(batch.handle)
    }

    /// Remove every batch whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<ExpiredBatch<H>> {
        let expired: Vec<BatchId> = self
            .batches
            .iter()
            .filter(|(_, batch)| batch.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for batch_id in expired {
            if let Some(batch) = self.batches.remove(&batch_id) {
                self.purge(&batch.request_ids);
                out.push(ExpiredBatch {
                    batch_id,
                    handle: batch.handle,
                    answered: batch.received,
                    expected: batch.slots.len(),
                });
            }
        }
        out.sort_by_key(|batch| batch.batch_id);
        out
    }

    /// Remove every batch, returning their handles.
    pub fn drain(&mut self) -> Vec<H> {
        self.requests.clear();
        let mut batches: Vec<(BatchId, Batch<H>)> = self.batches.drain().collect();
        batches.sort_by_key(|(id, _)| *id);
        batches.into_iter().map(|(_, batch)| batch.handle).collect()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.batches.values().map(|batch| batch.deadline).min()
    }

    fn purge(&mut self, request_ids: &[String]) {
        for request_id in request_ids {
            self.requests.remove(request_id);
        }
    }
}
