//! Session management over a constrained game command channel.
//!
//! This is the "just works" layer. Run commands and batches with correlated
//! responses, push large payloads as chunked transfers, reassemble transfers
//! coming the other way, and poll shared game state for values that cannot be
//! pushed at all.

pub mod batch;
pub mod error;
pub mod outbound;
pub mod polling;
pub mod registry;
pub mod server;
pub mod session;
pub mod transfer;

pub use batch::{BatchId, BatchTable, ExpiredBatch, ResponseOutcome};
pub use error::{OutputExt, PeerError, Result, TransferError};
pub use outbound::{plan_say, plan_transfer, TransferPlan};
pub use polling::{DedupWindow, EntryParser, PollEntry, PollingChannel, PollingConfig};
pub use registry::{Delivery, DispatchOutcome, EventListener, ListenerRegistry, TransferListener};
pub use server::{BridgeServer, ServerConfig, DEFAULT_BIND_ADDR};
pub use session::{
    Session, SessionConfig, SessionHandle, SessionStats, TransferReceipt, DEFAULT_TRANSFER_EVENT,
};
pub use transfer::{
    parse_control, reassemble, CompletedTransfer, TransferManager, TransferStats,
    DEFAULT_TRANSFER_TIMEOUT,
};
