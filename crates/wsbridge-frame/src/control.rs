//! Transfer control messages and channel addressing.
//!
//! A transfer is addressed to `<namespace>:<channel>` and consists of one
//! `BEGIN`, any number of `FRAGMENT`s and one `END`, each carried by a
//! separate command.

use std::fmt;

use crate::error::{FrameError, Result};

/// Default addressing namespace for transfer commands.
pub const DEFAULT_NAMESPACE: &str = "yb";

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LEN: usize = 64;

/// One BEGIN/FRAGMENT/END message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Opens a transfer of `total` fragments.
    Begin { total: usize, transfer_id: String },
    /// Carries the fragment at `index`.
    Fragment {
        index: usize,
        transfer_id: String,
        data: String,
    },
    /// Closes a transfer.
    End { transfer_id: String },
}

impl ControlMessage {
    /// Parse a control message.
    ///
    /// `START` and `DATA` are accepted as aliases of `BEGIN` and `FRAGMENT`.
    /// Fragment data is everything after the third colon and may itself
    /// contain colons.
    pub fn parse(text: &str) -> Result<Self> {
        let (kind, rest) = text
            .split_once(':')
            .ok_or_else(|| malformed(text, "missing ':' after message kind"))?;

        match kind {
            "BEGIN" | "START" => {
                let (total, transfer_id) = rest
                    .split_once(':')
                    .ok_or_else(|| malformed(text, "expected BEGIN:<total>:<id>"))?;
                let total: usize = total
                    .parse()
                    .map_err(|_| malformed(text, "total is not an unsigned integer"))?;
                if total == 0 {
                    return Err(malformed(text, "total must be positive"));
                }
                Ok(Self::Begin {
                    total,
                    transfer_id: transfer_id_of(text, transfer_id)?,
                })
            }
            "FRAGMENT" | "DATA" => {
                let mut parts = rest.splitn(3, ':');
                let index = parts.next().unwrap_or_default();
                let (Some(transfer_id), Some(data)) = (parts.next(), parts.next()) else {
                    return Err(malformed(text, "expected FRAGMENT:<index>:<id>:<data>"));
                };
                let index: usize = index
                    .parse()
                    .map_err(|_| malformed(text, "index is not an unsigned integer"))?;
                Ok(Self::Fragment {
                    index,
                    transfer_id: transfer_id_of(text, transfer_id)?,
                    data: data.to_string(),
                })
            }
            "END" => Ok(Self::End {
                transfer_id: transfer_id_of(text, rest)?,
            }),
            _ => Err(malformed(text, "unknown message kind")),
        }
    }

    /// Transfer this message belongs to.
    pub fn transfer_id(&self) -> &str {
        match self {
            Self::Begin { transfer_id, .. }
            | Self::Fragment { transfer_id, .. }
            | Self::End { transfer_id } => transfer_id,
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin { total, transfer_id } => write!(f, "BEGIN:{total}:{transfer_id}"),
            Self::Fragment {
                index,
                transfer_id,
                data,
            } => write!(f, "FRAGMENT:{index}:{transfer_id}:{data}"),
            Self::End { transfer_id } => write!(f, "END:{transfer_id}"),
        }
    }
}

fn transfer_id_of(text: &str, id: &str) -> Result<String> {
    if id.is_empty() || id.contains(':') {
        return Err(malformed(text, "invalid transfer id"));
    }
    Ok(id.to_string())
}

fn malformed(text: &str, reason: &str) -> FrameError {
    let preview: String = text.chars().take(48).collect();
    FrameError::MalformedControl(format!("{reason} in '{preview}'"))
}

/// Check a channel name: `[A-Za-z0-9_-]`, 1 to 64 characters.
pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FrameError::InvalidChannelName {
            name: name.to_string(),
            reason: "must not be empty",
        });
    }
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(FrameError::InvalidChannelName {
            name: name.to_string(),
            reason: "longer than 64 characters",
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(FrameError::InvalidChannelName {
            name: name.to_string(),
            reason: "only letters, digits, '_' and '-' are allowed",
        });
    }
    Ok(())
}

/// Address of a channel: `<namespace>:<channel>`.
pub fn channel_address(namespace: &str, channel: &str) -> String {
    format!("{namespace}:{channel}")
}

/// Extract the channel from an address in `namespace`.
pub fn parse_channel_address<'a>(namespace: &str, address: &'a str) -> Option<&'a str> {
    let (ns, channel) = address.split_once(':')?;
    (ns == namespace && validate_channel_name(channel).is_ok()).then_some(channel)
}

/// Command that delivers `message` to `channel`.
pub fn script_event_command(namespace: &str, channel: &str, message: &str) -> String {
    format!("scriptevent {} {message}", channel_address(namespace, channel))
}
