/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A BEGIN/FRAGMENT/END message could not be parsed.
    #[error("malformed control message: {0}")]
    MalformedControl(String),

    /// The channel name violates the naming rules.
    #[error("invalid channel name '{name}': {reason}")]
    InvalidChannelName { name: String, reason: &'static str },

    /// A wrapped command exceeds the envelope byte budget.
    #[error("envelope too large ({size} bytes, max {max})")]
    EnvelopeTooLarge { size: usize, max: usize },

    /// Not even a single character fits next to the command overhead.
    #[error("command overhead too large ({overhead} bytes, budget {budget})")]
    OverheadTooLarge { overhead: usize, budget: usize },

    /// Reassembled payload text could not be decoded.
    #[error("payload decode failed: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
