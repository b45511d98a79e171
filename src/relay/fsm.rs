//! The per-connection state machine: `LISTENING -> WAIT_RELAY ->
//! WAIT_PARTNER -> RELAYING -> DONE`.
//!
//! This module owns the transition table only. It has no visibility into
//! the pending/active registries or into other connections; `TransitCore`
//! drives it, resolves registry operations, and dispatches effects that
//! need a partner's channel.

use std::sync::Arc;

use crate::relay::channel::ClientChannel;
use crate::relay::mood::Mood;
use crate::relay::token::{Side, Token};

/// Opaque identifier for a connection inside `TransitCore`'s registries.
/// A non-owning handle: it's a lookup key, never a strong reference, so
/// paired connections never form a reference cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConnId(pub(crate) u64);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FsmState {
    Listening,
    WaitRelay,
    WaitPartner,
    Relaying,
    Done,
}

/// Inputs delivered to a connection's state machine.
pub enum Input {
    ConnectionMade,
    PleaseRelay(Token),
    PleaseRelayForSide(Token, Side),
    BadToken,
    GotPartner(ConnId),
    GotBytes(Vec<u8>),
    ConnectionLost,
    PartnerConnectionLost,
}

/// A side-effect `TransitCore` must carry out once the connection's
/// registry lock has been released (channel I/O never runs while held).
pub enum Effect {
    Send(Vec<u8>),
    Disconnect,
    ConnectPartner(ConnId),
    DisconnectPartner,
    ForwardToPartner(Vec<u8>),
}

/// What the registries must do as part of this transition. Resolved by
/// `TransitCore`, since `ConnectionStateInner` has no registry access.
pub enum RegistryOp {
    RegisterPending,
    UnregisterPending,
    UnregisterActive,
}

pub struct Transition {
    pub next_state: FsmState,
    pub registry_op: Option<RegistryOp>,
    pub effects: Vec<Effect>,
    pub record_usage: bool,
}

impl Transition {
    fn done(effects: Vec<Effect>, record_usage: bool) -> Self {
        Transition {
            next_state: FsmState::Done,
            registry_op: None,
            effects,
            record_usage,
        }
    }
}

/// All the state a single connection's FSM instance carries. Lives inside
/// `TransitCore`'s connection map; `partner`, when set, is a lookup key
/// into that same map rather than a reference to the partner's state.
pub struct ConnectionStateInner {
    pub state: FsmState,
    pub channel: Arc<dyn ClientChannel>,
    pub token: Option<Token>,
    pub side: Option<Side>,
    pub first_arrival: bool,
    pub mood: Mood,
    pub bytes_relayed: u64,
    pub started_at: u64,
    pub partner: Option<ConnId>,
}

impl ConnectionStateInner {
    pub fn new(channel: Arc<dyn ClientChannel>) -> Self {
        let started_at = channel.started_at();
        ConnectionStateInner {
            state: FsmState::Listening,
            channel,
            token: None,
            side: None,
            first_arrival: false,
            mood: Mood::Empty,
            bytes_relayed: 0,
            started_at,
            partner: None,
        }
    }

    /// Runs one transition. Registry bookkeeping (`register_pending`,
    /// `unregister_pending`/`unregister_active`) and anything requiring a
    /// partner's channel is left for the caller to resolve from the
    /// returned `Transition`.
    pub fn apply(&mut self, input: Input) -> Transition {
        match (self.state, input) {
            (FsmState::Listening, Input::ConnectionMade) => Transition {
                next_state: FsmState::WaitRelay,
                registry_op: None,
                effects: Vec::new(),
                record_usage: false,
            },

            (FsmState::WaitRelay, Input::PleaseRelay(token)) => {
                self.token = Some(token);
                self.side = None;
                Transition {
                    next_state: FsmState::WaitPartner,
                    registry_op: Some(RegistryOp::RegisterPending),
                    effects: Vec::new(),
                    record_usage: false,
                }
            }

            (FsmState::WaitRelay, Input::PleaseRelayForSide(token, side)) => {
                self.token = Some(token);
                self.side = Some(side);
                Transition {
                    next_state: FsmState::WaitPartner,
                    registry_op: Some(RegistryOp::RegisterPending),
                    effects: Vec::new(),
                    record_usage: false,
                }
            }

            (FsmState::WaitRelay, Input::BadToken) => {
                self.mood = Mood::Errory;
                Transition::done(
                    vec![Effect::Send(b"bad handshake\n".to_vec()), Effect::Disconnect],
                    true,
                )
            }

            (FsmState::WaitRelay, Input::GotBytes(data)) => {
                self.bytes_relayed += data.len() as u64;
                self.mood = Mood::Errory;
                Transition::done(vec![Effect::Disconnect], true)
            }

            (FsmState::WaitRelay, Input::ConnectionLost) => {
                Transition::done(Vec::new(), true)
            }

            (FsmState::WaitPartner, Input::GotBytes(_)) => {
                self.mood = Mood::Impatient;
                let mut t = Transition::done(
                    vec![Effect::Send(b"impatient\n".to_vec()), Effect::Disconnect],
                    true,
                );
                t.registry_op = Some(RegistryOp::UnregisterPending);
                t
            }

            (FsmState::WaitPartner, Input::GotPartner(partner)) => {
                self.partner = Some(partner);
                Transition {
                    next_state: FsmState::Relaying,
                    registry_op: None,
                    effects: vec![
                        Effect::Send(b"ok\n".to_vec()),
                        Effect::ConnectPartner(partner),
                    ],
                    record_usage: false,
                }
            }

            (FsmState::WaitPartner, Input::PartnerConnectionLost) => {
                self.mood = Mood::Redundant;
                Transition::done(vec![Effect::Disconnect], true)
            }

            (FsmState::WaitPartner, Input::ConnectionLost) => {
                self.mood = Mood::Lonely;
                let mut t = Transition::done(Vec::new(), true);
                t.registry_op = Some(RegistryOp::UnregisterPending);
                t
            }

            (FsmState::Relaying, Input::GotBytes(data)) => {
                self.bytes_relayed += data.len() as u64;
                Transition {
                    next_state: FsmState::Relaying,
                    registry_op: None,
                    effects: vec![Effect::ForwardToPartner(data)],
                    record_usage: false,
                }
            }

            (FsmState::Relaying, Input::ConnectionLost) => {
                self.mood = if self.first_arrival {
                    Mood::Happy
                } else {
                    Mood::Jilted
                };
                let mut t = Transition::done(vec![Effect::DisconnectPartner], true);
                t.registry_op = Some(RegistryOp::UnregisterActive);
                t
            }

            // DONE swallows straggling teardown inputs; anything else
            // reaching a terminal connection is a caller bug.
            (FsmState::Done, Input::ConnectionLost)
            | (FsmState::Done, Input::PartnerConnectionLost) => Transition {
                next_state: FsmState::Done,
                registry_op: None,
                effects: Vec::new(),
                record_usage: false,
            },

            (state, _) => unreachable!("input not valid in state {:?}", state),
        }
    }
}
