//! Self-describing record references.
//!
//! A reference is `<token>$$<object name>`: a 12-character base-36 token
//! followed by the lowercase definition name. The embedded name lets a
//! bare string be routed to the right table without consulting storage.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Separator between the token and the embedded object name.
pub const REF_SPLITTER: &str = "$$";

/// Length of the generated token portion.
pub const REF_TOKEN_LEN: usize = 12;

/// Column width reserved for reference values across all dialects.
pub const REF_COLUMN_LEN: usize = 107;

/// Join a token and object name into a reference string.
#[must_use]
pub fn compose_ref(token: &str, object_name: &str) -> String {
    let mut s = String::with_capacity(token.len() + REF_SPLITTER.len() + object_name.len());
    s.push_str(token);
    s.push_str(REF_SPLITTER);
    s.push_str(&object_name.to_lowercase());
    s
}

/// Split a reference into its token and object-name parts, validating shape.
pub fn parse_ref(reference: &str) -> Result<(&str, &str)> {
    let Some((token, object_name)) = reference.split_once(REF_SPLITTER) else {
        return Err(Error::InvalidReference {
            reference: reference.to_string(),
            detail: format!("missing '{REF_SPLITTER}' separator"),
        });
    };
    if token.len() != REF_TOKEN_LEN
        || !token.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Err(Error::InvalidReference {
            reference: reference.to_string(),
            detail: format!("token must be {REF_TOKEN_LEN} base-36 characters"),
        });
    }
    if object_name.is_empty() {
        return Err(Error::InvalidReference {
            reference: reference.to_string(),
            detail: "empty object name".to_string(),
        });
    }
    if reference.len() > REF_COLUMN_LEN {
        return Err(Error::InvalidReference {
            reference: reference.to_string(),
            detail: format!("longer than {REF_COLUMN_LEN} characters"),
        });
    }
    Ok((token, object_name))
}

/// Producer of unique reference tokens.
///
/// Injectable so tests can pin token values deterministically.
pub trait TokenSource: Send + Sync {
    /// Produce the next token, exactly [`REF_TOKEN_LEN`] base-36 characters.
    fn next_token(&self) -> String;
}

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn base36_token(mut n: u128) -> String {
    let mut buf = [b'0'; REF_TOKEN_LEN];
    let mut i = REF_TOKEN_LEN;
    while n > 0 && i > 0 {
        i -= 1;
        buf[i] = BASE36[(n % 36) as usize];
        n /= 36;
    }
    // Tokens wider than 12 digits are centuries away; keep the low digits.
    String::from_utf8_lossy(&buf).into_owned()
}

/// Wall-clock token source: nanoseconds since the Unix epoch, base-36,
/// zero-padded, forced strictly increasing under a mutex.
#[derive(Debug, Default)]
pub struct SystemTokenSource {
    last: Mutex<u128>,
}

impl SystemTokenSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenSource for SystemTokenSource {
    fn next_token(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let mut last = self.last.lock();
        let candidate = if now > *last { now } else { *last + 1 };
        *last = candidate;
        base36_token(candidate)
    }
}

/// Deterministic counter source for tests.
#[derive(Debug, Default)]
pub struct SequenceTokenSource {
    next: Mutex<u128>,
}

impl SequenceTokenSource {
    /// Start counting from `first`.
    #[must_use]
    pub fn starting_at(first: u128) -> Self {
        Self {
            next: Mutex::new(first),
        }
    }
}

impl TokenSource for SequenceTokenSource {
    fn next_token(&self) -> String {
        let mut next = self.next.lock();
        let token = base36_token(*next);
        *next += 1;
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_compose_and_parse_round_trip() {
        let r = compose_ref("0000000000ab", "SalesOrder");
        assert_eq!(r, "0000000000ab$$salesorder");
        let (token, name) = parse_ref(&r).unwrap();
        assert_eq!(token, "0000000000ab");
        assert_eq!(name, "salesorder");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_ref("no-separator").is_err());
        assert!(parse_ref("short$$order").is_err());
        assert!(parse_ref("0000000000ab$$").is_err());
        assert!(parse_ref("UPPERCASE0AB$$order").is_err());
    }

    #[test]
    fn test_parse_rejects_overlong() {
        let long_name = "x".repeat(REF_COLUMN_LEN);
        let r = compose_ref("000000000001", &long_name);
        assert!(parse_ref(&r).is_err());
    }

    // ---------------------------------------------------------------
    // token sources
    // ---------------------------------------------------------------

    #[test]
    fn test_system_tokens_are_monotonic() {
        let src = SystemTokenSource::new();
        let a = src.next_token();
        let b = src.next_token();
        assert_eq!(a.len(), REF_TOKEN_LEN);
        assert!(b > a);
    }

    #[test]
    fn test_sequence_tokens() {
        let src = SequenceTokenSource::starting_at(35);
        assert_eq!(src.next_token(), "00000000000z");
        assert_eq!(src.next_token(), "000000000010");
    }
}
