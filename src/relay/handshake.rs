//! Parsing of the `please relay ...` handshake line/message.
//!
//! Two forms are accepted:
//!   `please relay <64-hex-token>\n`
//!   `please relay <64-hex-token> for side <16-hex-side>\n`
//! The trailing `\n` is stripped by the transport framing before the bytes
//! reach this module; WebSocket messages carry no newline at all.

use crate::relay::token::{Side, Token};

const PREFIX: &[u8] = b"please relay ";
const FOR_SIDE: &[u8] = b" for side ";

/// A successfully parsed handshake line.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub token: Token,
    pub side: Option<Side>,
}

/// Parses one handshake line with its trailing newline already stripped.
///
/// Returns `None` for anything that doesn't match either accepted form,
/// including a structurally valid line with a malformed token or side.
pub fn parse(line: &[u8]) -> Option<Handshake> {
    let rest = line.strip_prefix(PREFIX)?;

    if let Some(side_at) = find(rest, FOR_SIDE) {
        let (token_bytes, after) = rest.split_at(side_at);
        let side_bytes = &after[FOR_SIDE.len()..];
        let token = Token::parse(token_bytes)?;
        let side = Side::parse(side_bytes)?;
        Some(Handshake {
            token,
            side: Some(side),
        })
    } else {
        let token = Token::parse(rest)?;
        Some(Handshake { token, side: None })
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v1_sideless_form() {
        let token = "a".repeat(64);
        let line = format!("please relay {}", token);
        let hs = parse(line.as_bytes()).expect("should parse");
        assert_eq!(hs.token.as_bytes(), token.as_bytes());
        assert!(hs.side.is_none());
    }

    #[test]
    fn parses_v2_sided_form() {
        let token = "b".repeat(64);
        let side = "0".repeat(16);
        let line = format!("please relay {} for side {}", token, side);
        let hs = parse(line.as_bytes()).expect("should parse");
        assert_eq!(hs.token.as_bytes(), token.as_bytes());
        assert_eq!(hs.side.unwrap().as_bytes(), side.as_bytes());
    }

    #[test]
    fn rejects_bad_handshakes() {
        assert!(parse(b"please relay").is_none());
        assert!(parse(b"please relay not-hex").is_none());
        assert!(parse(&[b"please relay ", "a".repeat(64).as_bytes(), b" for side bogus"].concat())
            .is_none());
        assert!(parse(b"").is_none());
    }
}
