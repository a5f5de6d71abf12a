use std::time::Duration;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] wsbridge_transport::TransportError),

    /// Envelope, control message or payload error.
    #[error("frame error: {0}")]
    Frame(#[from] wsbridge_frame::FrameError),

    /// No live connection to send on.
    #[error("no live connection")]
    ConnectionUnavailable,

    /// The connection went away while a request was pending.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// A wrapped command exceeds the envelope budget; nothing was sent.
    #[error("command too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Not every command of a batch was answered in time.
    #[error("command batch timed out after {0:?}")]
    BatchTimeout(Duration),

    /// The game reported a failed command.
    #[error("command failed with status {code}: {message}")]
    CommandFailed { code: i64, message: String },

    /// An outbound transfer stopped at its first failed command.
    #[error("transfer {transfer_id} aborted: {source}")]
    TransferAborted {
        transfer_id: String,
        source: Box<PeerError>,
    },

    /// The polling entry pattern does not compile.
    #[error("invalid entry pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, PeerError>;

/// Why an inbound control message did not advance a transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The control message could not be parsed.
    #[error("{0}")]
    Malformed(#[from] wsbridge_frame::FrameError),

    /// BEGIN announced zero fragments.
    #[error("transfer {transfer_id}: invalid fragment total {total}")]
    InvalidTotal { transfer_id: String, total: usize },

    /// FRAGMENT or END for an id that is not open.
    #[error("unknown transfer {transfer_id}")]
    UnknownTransfer { transfer_id: String },

    /// FRAGMENT or END sent on a different channel than the BEGIN.
    #[error("transfer {transfer_id} is open on channel {opened_on}, not {received_on}")]
    ChannelMismatch {
        transfer_id: String,
        opened_on: String,
        received_on: String,
    },

    /// FRAGMENT index outside `[0, total)`.
    #[error("transfer {transfer_id}: fragment {index} out of range (total {total})")]
    FragmentOutOfRange {
        transfer_id: String,
        index: usize,
        total: usize,
    },

    /// END arrived before every fragment.
    #[error("transfer {transfer_id} incomplete: {received}/{total} fragments")]
    Incomplete {
        transfer_id: String,
        received: usize,
        total: usize,
    },

    /// A position inside `[0, total)` was never filled.
    #[error("transfer {transfer_id}: missing fragment {index}")]
    MissingFragment { transfer_id: String, index: usize },

    /// Reassembled text could not be decoded.
    #[error("transfer {transfer_id}: {source}")]
    Decode {
        transfer_id: String,
        source: wsbridge_frame::FrameError,
    },

    /// No END before the deadline.
    #[error("transfer {transfer_id} expired with {received}/{total} fragments")]
    Expired {
        transfer_id: String,
        received: usize,
        total: usize,
    },
}

/// Strict view of a command result.
pub trait OutputExt: Sized {
    /// `Ok` for a successful command, [`PeerError::CommandFailed`] otherwise.
    fn into_result(self) -> Result<Self>;
}

impl OutputExt for wsbridge_frame::CommandOutput {
    fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PeerError::CommandFailed {
                code: self.status_code,
                message: self.status_message,
            })
        }
    }
}
