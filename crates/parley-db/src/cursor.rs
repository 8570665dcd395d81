use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE as B64;
use chrono::{DateTime, Utc};

use parley_types::ChatError;

use crate::models::from_nanos;

/// Continuation token for newest-first pagination.
///
/// On the wire it is URL-safe base64 of the decimal unix-nanosecond creation
/// time of the last message on the previous page. The next page holds
/// messages created strictly before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    created_at_nanos: i64,
}

impl Cursor {
    pub fn from_nanos(created_at_nanos: i64) -> Self {
        Self { created_at_nanos }
    }

    pub fn nanos(&self) -> i64 {
        self.created_at_nanos
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        from_nanos(self.created_at_nanos)
    }

    pub fn encode(&self) -> String {
        B64.encode(self.created_at_nanos.to_string())
    }

    pub fn decode(token: &str) -> Result<Self, ChatError> {
        let bytes = B64
            .decode(token)
            .map_err(|e| ChatError::invalid(format!("invalid cursor encoding: {}", e)))?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| ChatError::invalid("invalid cursor encoding: not utf-8"))?;
        let nanos = text
            .parse::<i64>()
            .map_err(|e| ChatError::invalid(format!("invalid cursor timestamp: {}", e)))?;
        Ok(Self::from_nanos(nanos))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cursor {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_decimal_nanos() {
        let cursor = Cursor::from_nanos(1_700_000_000_000_000_000);
        assert_eq!(cursor.encode(), "MTcwMDAwMDAwMDAwMDAwMDAwMA==");
        assert_eq!(
            Cursor::decode("MTcwMDAwMDAwMDAwMDAwMDAwMA==").unwrap(),
            cursor
        );
    }

    #[test]
    fn exposes_creation_time() {
        let cursor = Cursor::from_nanos(1_700_000_000_000_000_001);
        assert_eq!(cursor.created_at().timestamp_subsec_nanos(), 1);
    }

    #[test]
    fn rejects_bad_base64() {
        let err = Cursor::decode("not base64!").unwrap_err();
        assert!(matches!(err, ChatError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_non_numeric_payload() {
        let token = B64.encode("yesterday");
        let err = token.parse::<Cursor>().unwrap_err();
        assert!(matches!(err, ChatError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_empty_token() {
        assert!(Cursor::decode("").is_err());
    }
}
