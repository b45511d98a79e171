//! `PendingRequests`: the matchmaker pairing two `please relay` arrivals
//! that share a token.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::relay::fsm::ConnId;
use crate::relay::token::{sides_match, Side, Token};

type Slot = (Option<Side>, ConnId);

/// What happened as a result of a `register` call.
pub struct RegisterOutcome {
    /// The connection paired with this arrival, if any.
    pub matched: Option<ConnId>,
    /// Spares left pending for the same token once a match is found,
    /// evicted as redundant now that the token is spoken for.
    pub evicted: Vec<ConnId>,
}

/// Connections that have presented a valid token but have no partner yet,
/// keyed by token. Most tokens have at most a handful of waiters, hence
/// the inline `SmallVec` buffer.
#[derive(Default)]
pub struct PendingRequests {
    requests: HashMap<Token, SmallVec<[Slot; 4]>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        PendingRequests::default()
    }

    /// Registers `conn` waiting on `token` (optionally pinned to `side`).
    ///
    /// Scans the existing waiters for one matching (different, or absent)
    /// side. If one is found, it becomes `conn`'s partner and every *other*
    /// waiter still pending for this token (same-side spares included) is
    /// evicted as redundant. Otherwise `conn` itself joins the pending set
    /// as a new waiter, alongside whatever was already there.
    pub fn register(&mut self, token: Token, side: Option<Side>, conn: ConnId) -> RegisterOutcome {
        let slots = self.requests.entry(token.clone()).or_default();

        let match_at = slots
            .iter()
            .position(|(old_side, _)| sides_match(old_side.as_ref(), side.as_ref()));

        let (matched, evicted) = match match_at {
            Some(idx) => {
                let matched = slots.remove(idx).1;
                let evicted = slots.drain(..).map(|(_, old_conn)| old_conn).collect();
                (Some(matched), evicted)
            }
            None => {
                slots.push((side, conn));
                (None, Vec::new())
            }
        };

        if slots.is_empty() {
            self.requests.remove(&token);
        }

        RegisterOutcome { matched, evicted }
    }

    /// Removes `conn` from `token`'s waiter set, if present. A no-op if it
    /// already matched or was never registered (e.g. a stray `GotBytes`
    /// arriving on an already-torn-down pending entry).
    pub fn unregister(&mut self, token: &Token, side: Option<&Side>, conn: ConnId) {
        if let Some(slots) = self.requests.get_mut(token) {
            slots.retain(|(old_side, old_conn)| {
                !(old_side.as_ref() == side && *old_conn == conn)
            });
            if slots.is_empty() {
                self.requests.remove(token);
            }
        }
    }

    #[cfg(test)]
    pub fn waiting_count(&self, token: &Token) -> usize {
        self.requests.get(token).map_or(0, |s| s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok() -> Token {
        Token::parse("a".repeat(64).as_bytes()).unwrap()
    }

    #[test]
    fn first_arrival_waits() {
        let mut p = PendingRequests::new();
        let outcome = p.register(tok(), None, ConnId(1));
        assert!(outcome.matched.is_none());
        assert!(outcome.evicted.is_empty());
        assert_eq!(p.waiting_count(&tok()), 1);
    }

    #[test]
    fn second_sideless_arrival_matches_first() {
        let mut p = PendingRequests::new();
        p.register(tok(), None, ConnId(1));
        let outcome = p.register(tok(), None, ConnId(2));
        assert_eq!(outcome.matched, Some(ConnId(1)));
        assert_eq!(p.waiting_count(&tok()), 0);
    }

    #[test]
    fn same_side_retry_waits_alongside_the_old_waiter() {
        let mut p = PendingRequests::new();
        let side = Side::parse("0".repeat(16).as_bytes()).unwrap();
        p.register(tok(), Some(side.clone()), ConnId(1));
        let outcome = p.register(tok(), Some(side), ConnId(2));
        assert!(outcome.matched.is_none());
        assert!(outcome.evicted.is_empty());
        assert_eq!(p.waiting_count(&tok()), 2);
    }

    #[test]
    fn differing_sides_match() {
        let mut p = PendingRequests::new();
        let a = Side::parse("0".repeat(16).as_bytes()).unwrap();
        let b = Side::parse("1".repeat(16).as_bytes()).unwrap();
        p.register(tok(), Some(a), ConnId(1));
        let outcome = p.register(tok(), Some(b), ConnId(2));
        assert_eq!(outcome.matched, Some(ConnId(1)));
    }

    #[test]
    fn match_evicts_remaining_same_side_spares() {
        let mut p = PendingRequests::new();
        let a = Side::parse("0".repeat(16).as_bytes()).unwrap();
        let b = Side::parse("1".repeat(16).as_bytes()).unwrap();
        p.register(tok(), Some(a.clone()), ConnId(1));
        p.register(tok(), Some(a), ConnId(2));
        let outcome = p.register(tok(), Some(b), ConnId(3));
        assert_eq!(outcome.matched, Some(ConnId(1)));
        assert_eq!(outcome.evicted, vec![ConnId(2)]);
        assert_eq!(p.waiting_count(&tok()), 0);
    }
}
