use std::fmt::{self, Write as _};

use serde::Serialize;
use serde_json::Value;

use crate::error::{FrameError, Result};

/// A transferred payload.
///
/// Reassembled text that parses as JSON is `Structured`, except JSON strings,
/// which are always `Text`. Text that does not parse is delivered as `Text`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Structured(Value),
    Text(String),
}

impl Payload {
    /// Borrow the text of a `Text` payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Structured(_) => None,
        }
    }

    /// Borrow the value of a `Structured` payload.
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            other => Self::Structured(other),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Structured(value) => write!(f, "{value}"),
        }
    }
}

/// Serialize a payload for transfer: JSON, pure ASCII.
pub fn encode_payload(payload: &Payload) -> Result<String> {
    let json = match payload {
        Payload::Structured(value) => serde_json::to_string(value)?,
        Payload::Text(text) => serde_json::to_string(text)?,
    };
    Ok(escape_non_ascii(&json))
}

/// Replace every non-ASCII character with `\uXXXX` (UTF-16 code units).
///
/// Applied to JSON text this keeps it valid JSON, since non-ASCII characters
/// can only occur inside string literals.
pub fn escape_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut units = [0u16; 2];
    for ch in text.chars() {
        if ch.is_ascii() {
            out.push(ch);
            continue;
        }
        for unit in ch.encode_utf16(&mut units) {
            let _ = write!(out, "\\u{unit:04x}");
        }
    }
    out
}

/// Decode reassembled payload text.
pub fn decode_payload(raw: &str) -> Result<Payload> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Ok(Payload::from(value)),
        Err(_) => unescape_unicode(raw).map(Payload::Text),
    }
}

/// Reverse `\uXXXX` escapes, combining surrogate pairs.
///
/// Other backslashes are kept as they are. A lone surrogate is an error.
pub fn unescape_unicode(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find("\\u") {
        let Some(unit) = rest.get(pos + 2..pos + 6).and_then(parse_hex_unit) else {
            out.push_str(&rest[..pos + 2]);
            rest = &rest[pos + 2..];
            continue;
        };
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 6..];

        let ch = if (0xD800..0xDC00).contains(&unit) {
            let low = rest
                .strip_prefix("\\u")
                .and_then(|tail| tail.get(..4))
                .and_then(parse_hex_unit)
                .filter(|low| (0xDC00..0xE000).contains(low))
                .ok_or_else(|| {
                    FrameError::Decode(format!("unpaired high surrogate \\u{unit:04x}"))
                })?;
            rest = &rest[6..];
            let code = 0x10000 + ((u32::from(unit) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
            char::from_u32(code)
        } else {
            char::from_u32(u32::from(unit))
        };

        let ch = ch.ok_or_else(|| FrameError::Decode(format!("invalid escape \\u{unit:04x}")))?;
        out.push(ch);
    }

    out.push_str(rest);
    Ok(out)
}

fn parse_hex_unit(hex: &str) -> Option<u16> {
    if hex.len() != 4 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn text_round_trip() {
        let payload = Payload::from("héllo 世界 🎉");
        let encoded = encode_payload(&payload).unwrap();
        assert!(encoded.is_ascii());
        assert_eq!(decode_payload(&encoded).unwrap(), payload);
    }

    #[test]
    fn structured_round_trip() {
        let payload = Payload::from(json!({
            "message": "大物件",
            "items": [1, 2, 3],
            "nested": { "ok": true }
        }));
        let encoded = encode_payload(&payload).unwrap();
        assert!(encoded.is_ascii());
        assert_eq!(decode_payload(&encoded).unwrap(), payload);
    }

    #[test]
    fn json_string_value_is_text() {
        assert_eq!(Payload::from(json!("x")), Payload::Text("x".to_string()));
    }

    #[test]
    fn non_json_is_delivered_as_text() {
        assert_eq!(
            decode_payload("hello!!").unwrap(),
            Payload::Text("hello!!".to_string())
        );
    }

    #[test]
    fn non_json_text_is_unescaped() {
        assert_eq!(
            decode_payload(r"caf\u00e9 \ud83c\udf89 a\b").unwrap(),
            Payload::Text("café 🎉 a\\b".to_string())
        );
    }

    #[test]
    fn lone_surrogate_fails_decode() {
        assert!(matches!(
            decode_payload(r"broken \ud83c here"),
            Err(FrameError::Decode(_))
        ));
        assert!(matches!(
            unescape_unicode(r"\udf89"),
            Err(FrameError::Decode(_))
        ));
    }

    #[test]
    fn short_escape_is_kept_verbatim() {
        assert_eq!(unescape_unicode(r"\u12").unwrap(), r"\u12");
        assert_eq!(unescape_unicode(r"\uzzzz!").unwrap(), r"\uzzzz!");
    }

    #[test]
    fn escape_uses_utf16_units() {
        assert_eq!(escape_non_ascii("a🎉"), r"a\ud83c\udf89");
    }
}
