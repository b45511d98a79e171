//! Opaque rendezvous identifiers exchanged in the handshake line.
//!
//! A `Token` is 64 lowercase-hex characters (32 bytes); a `Side` is 16
//! lowercase-hex characters (8 bytes). Neither is interpreted by the
//! relay beyond validating shape and using it as a map key / match key.

use std::fmt;

const TOKEN_HEX_LEN: usize = 64;
const SIDE_HEX_LEN: usize = 16;

fn is_lower_hex(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}

/// A validated, opaque 64-hex-character rendezvous token.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Token(Box<[u8]>);

impl Token {
    /// Parses a `Token` out of an ASCII slice, enforcing exact length and
    /// lowercase-hex alphabet. Returns `None` on any deviation.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == TOKEN_HEX_LEN && is_lower_hex(bytes) {
            Some(Token(bytes.to_vec().into_boxed_slice()))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the first 16 characters are shown, matching the debug label
        // convention used by the original relay's connection tracing.
        write!(f, "Token({}…)", String::from_utf8_lossy(&self.0[..16]))
    }
}

/// A validated, optional 16-hex-character endpoint discriminator.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Side(Box<[u8]>);

impl Side {
    /// Parses a `Side` out of an ASCII slice, enforcing exact length and
    /// lowercase-hex alphabet. Returns `None` on any deviation.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == SIDE_HEX_LEN && is_lower_hex(bytes) {
            Some(Side(bytes.to_vec().into_boxed_slice()))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Side({})", String::from_utf8_lossy(&self.0))
    }
}

/// Returns whether two (optional) sides are considered a *match* under
/// the relay's pairing rule: either side is absent, or both are present
/// and differ. Same-side, both-present pairs never match.
pub fn sides_match(a: Option<&Side>, b: Option<&Side>) -> bool {
    match (a, b) {
        (None, _) | (_, None) => true,
        (Some(a), Some(b)) => a != b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_requires_exact_length_and_alphabet() {
        let good = "a".repeat(64);
        assert!(Token::parse(good.as_bytes()).is_some());
        assert!(Token::parse("a".repeat(63).as_bytes()).is_none());
        assert!(Token::parse("A".repeat(64).as_bytes()).is_none());
        assert!(Token::parse("g".repeat(64).as_bytes()).is_none());
    }

    #[test]
    fn side_requires_exact_length_and_alphabet() {
        let good = "0".repeat(16);
        assert!(Side::parse(good.as_bytes()).is_some());
        assert!(Side::parse("0".repeat(17).as_bytes()).is_none());
        assert!(Side::parse("Z".repeat(16).as_bytes()).is_none());
    }

    #[test]
    fn sides_match_rule() {
        let a = Side::parse(b"0101010101010101").unwrap();
        let b = Side::parse(b"0202020202020202").unwrap();
        assert!(sides_match(None, None));
        assert!(sides_match(Some(&a), None));
        assert!(sides_match(None, Some(&b)));
        assert!(sides_match(Some(&a), Some(&b)));
        assert!(!sides_match(Some(&a), Some(&a.clone())));
    }
}
