//! `TransitCore`: the composition root. Owns the connection registry,
//! drives the FSM, and fans out usage records.
//!
//! All registry state lives behind one `parking_lot::Mutex`. One external
//! input (a handshake line, a chunk of relayed bytes, a socket close) may
//! cascade into several FSM transitions — e.g. a `please relay` that
//! completes a pairing immediately delivers `GotPartner` to both sides —
//! and all of that cascade runs under a single lock acquisition, via a
//! small trampoline queue, so the whole cascade is serialized atomically
//! with respect to any other connection's input. Channel I/O (`send`,
//! `disconnect`, ...) is deferred until after the lock is released.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::relay::active::ActiveConnections;
use crate::relay::channel::ClientChannel;
use crate::relay::fsm::{ConnId, ConnectionStateInner, Effect, FsmState, Input, RegistryOp};
use crate::relay::handshake::Handshake;
use crate::relay::mood::Mood;
use crate::relay::pending::PendingRequests;
use crate::relay::usage::{blur_size, blur_timestamp, UsageRecord, UsageTracker};

/// Aggregate counts, suitable for a periodic stats log line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ConnectedSnapshot {
    pub pending: usize,
    pub active: usize,
}

struct CoreInner {
    connections: HashMap<ConnId, ConnectionStateInner>,
    pending: PendingRequests,
    active: ActiveConnections,
    next_id: u64,
}

/// A side effect resolved to concrete channels, ready to run once the
/// registry lock has been released.
enum ResolvedEffect {
    Send(Arc<dyn ClientChannel>, Vec<u8>),
    Disconnect(Arc<dyn ClientChannel>),
    ConnectPartner(Arc<dyn ClientChannel>, Arc<dyn ClientChannel>),
    DisconnectPartner(Arc<dyn ClientChannel>),
    Forward(Arc<dyn ClientChannel>, Vec<u8>),
}

pub struct TransitCore {
    inner: Mutex<CoreInner>,
    usage: Arc<UsageTracker>,
    now_fn: Box<dyn Fn() -> u64 + Send + Sync>,
    blur_usage_seconds: u64,
}

impl TransitCore {
    pub fn new(
        usage: Arc<UsageTracker>,
        blur_usage_seconds: u64,
        now_fn: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(TransitCore {
            inner: Mutex::new(CoreInner {
                connections: HashMap::new(),
                pending: PendingRequests::new(),
                active: ActiveConnections::new(),
                next_id: 0,
            }),
            usage,
            now_fn: Box::new(now_fn),
            blur_usage_seconds,
        })
    }

    /// Registers a freshly accepted channel and runs it through
    /// `connection_made`. Returns the id net adapters use for every
    /// subsequent input.
    pub fn accept(&self, channel: Arc<dyn ClientChannel>) -> ConnId {
        let id = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = ConnId(inner.next_id);
            inner.connections.insert(id, ConnectionStateInner::new(channel));
            id
        };
        self.apply(id, Input::ConnectionMade);
        id
    }

    pub fn handshake(&self, id: ConnId, hs: Handshake) {
        let input = match hs.side {
            Some(side) => Input::PleaseRelayForSide(hs.token, side),
            None => Input::PleaseRelay(hs.token),
        };
        self.apply(id, input);
    }

    pub fn bad_token(&self, id: ConnId) {
        self.apply(id, Input::BadToken);
    }

    pub fn got_bytes(&self, id: ConnId, data: Vec<u8>) {
        self.apply(id, Input::GotBytes(data));
    }

    pub fn connection_lost(&self, id: ConnId) {
        self.apply(id, Input::ConnectionLost);
    }

    pub fn snapshot_stats(&self) -> ConnectedSnapshot {
        let inner = self.inner.lock();
        ConnectedSnapshot {
            pending: inner.connections.len() - inner.active.len(),
            active: inner.active.len(),
        }
    }

    fn apply(&self, id: ConnId, input: Input) {
        let mut resolved = Vec::new();
        {
            let mut inner = self.inner.lock();
            let mut queue: VecDeque<(ConnId, Input)> = VecDeque::new();
            queue.push_back((id, input));

            while let Some((cur_id, cur_input)) = queue.pop_front() {
                if !inner.connections.contains_key(&cur_id) {
                    // Terminal connection already cleaned up; every input
                    // that can legitimately still arrive for it is a
                    // teardown echo, so this is a silent no-op.
                    continue;
                }

                let transition = inner
                    .connections
                    .get_mut(&cur_id)
                    .expect("checked above")
                    .apply(cur_input);

                match transition.registry_op {
                    Some(RegistryOp::RegisterPending) => {
                        let (token, side) = {
                            let conn = &inner.connections[&cur_id];
                            (conn.token.clone().expect("token set by PleaseRelay*"), conn.side.clone())
                        };
                        let outcome = inner.pending.register(token, side, cur_id);

                        for evicted in outcome.evicted {
                            queue.push_back((evicted, Input::PartnerConnectionLost));
                        }
                        if let Some(partner) = outcome.matched {
                            if let Some(p) = inner.connections.get_mut(&partner) {
                                p.first_arrival = true;
                            }
                            inner.active.insert(cur_id);
                            inner.active.insert(partner);
                            queue.push_back((cur_id, Input::GotPartner(partner)));
                            queue.push_back((partner, Input::GotPartner(cur_id)));
                        }
                    }
                    Some(RegistryOp::UnregisterPending) => {
                        let (token, side) = {
                            let conn = &inner.connections[&cur_id];
                            (conn.token.clone(), conn.side.clone())
                        };
                        if let Some(token) = token {
                            inner.pending.unregister(&token, side.as_ref(), cur_id);
                        }
                        inner.active.remove(cur_id);
                    }
                    Some(RegistryOp::UnregisterActive) => {
                        inner.active.remove(cur_id);
                    }
                    None => {}
                }

                for effect in transition.effects {
                    match effect {
                        Effect::Send(data) => {
                            let channel = inner.connections[&cur_id].channel.clone();
                            resolved.push(ResolvedEffect::Send(channel, data));
                        }
                        Effect::Disconnect => {
                            let channel = inner.connections[&cur_id].channel.clone();
                            resolved.push(ResolvedEffect::Disconnect(channel));
                        }
                        Effect::ConnectPartner(partner) => {
                            let channel = inner.connections[&cur_id].channel.clone();
                            if let Some(p) = inner.connections.get(&partner) {
                                resolved.push(ResolvedEffect::ConnectPartner(channel, p.channel.clone()));
                            }
                        }
                        Effect::DisconnectPartner => {
                            let channel = inner.connections[&cur_id].channel.clone();
                            resolved.push(ResolvedEffect::DisconnectPartner(channel));
                        }
                        Effect::ForwardToPartner(data) => {
                            if let Some(partner) = inner.connections[&cur_id].partner {
                                if let Some(p) = inner.connections.get(&partner) {
                                    resolved.push(ResolvedEffect::Forward(p.channel.clone(), data));
                                }
                            }
                        }
                    }
                }

                if transition.record_usage {
                    let mood = inner.connections[&cur_id].mood;
                    let partner_id = inner.connections[&cur_id].partner;
                    match (mood, partner_id) {
                        (Mood::Jilted, Some(_)) => {
                            // Suppressed: the partner was first to arrive,
                            // so its own close records this pair's usage.
                            // This entry is left in the registry so that
                            // close can still read its accounting.
                        }
                        (Mood::Happy, Some(pid)) => {
                            let buddy = inner
                                .connections
                                .get(&pid)
                                .map(|p| (p.started_at, p.bytes_relayed));
                            let conn = &inner.connections[&cur_id];
                            self.enqueue_usage(conn.mood, conn.started_at, conn.bytes_relayed, buddy);
                        }
                        _ => {
                            let conn = &inner.connections[&cur_id];
                            self.enqueue_usage(conn.mood, conn.started_at, conn.bytes_relayed, None);
                        }
                    }
                }

                inner
                    .connections
                    .get_mut(&cur_id)
                    .expect("checked above")
                    .state = transition.next_state;

                if transition.next_state == FsmState::Done {
                    let mood = inner.connections[&cur_id].mood;
                    let partner_id = inner.connections[&cur_id].partner;
                    let partner_still_open = partner_id
                        .and_then(|pid| inner.connections.get(&pid))
                        .map_or(false, |p| p.state != FsmState::Done);

                    if mood == Mood::Jilted && partner_still_open {
                        // Leave this entry in place: the partner hasn't
                        // closed yet, and its own close will read this
                        // connection's accounting before removing both.
                    } else {
                        inner.connections.remove(&cur_id);
                        if mood == Mood::Happy {
                            if let Some(pid) = partner_id {
                                let partner_dormant = inner
                                    .connections
                                    .get(&pid)
                                    .map_or(false, |p| p.state == FsmState::Done);
                                if partner_dormant {
                                    inner.connections.remove(&pid);
                                }
                            }
                        }
                    }
                }
            }
        }

        for effect in resolved {
            match effect {
                ResolvedEffect::Send(channel, data) => channel.send(&data),
                ResolvedEffect::Disconnect(channel) => channel.disconnect(),
                ResolvedEffect::ConnectPartner(channel, partner) => channel.connect_partner(partner),
                ResolvedEffect::DisconnectPartner(channel) => channel.disconnect_partner(),
                ResolvedEffect::Forward(partner, data) => partner.send(&data),
            }
        }
    }

    /// Builds and records one usage row. `buddy`, when present, is the
    /// partner's `(started_at, bytes_relayed)` snapshot, read out of the
    /// registry before either side is removed. A suppressed `Jilted`
    /// close leaves its entry in place for exactly this reason, so its
    /// `Happy` partner can still read it here.
    fn enqueue_usage(&self, mood: Mood, started_at: u64, bytes_relayed: u64, buddy: Option<(u64, u64)>) {
        let finished = (self.now_fn)();
        let (started_at, total_time, waiting_time, total_bytes) = match buddy {
            Some((buddy_started, buddy_bytes)) => {
                let earliest = started_at.min(buddy_started);
                let waiting = started_at.max(buddy_started) - earliest;
                (
                    earliest,
                    finished.saturating_sub(earliest),
                    Some(waiting),
                    bytes_relayed + buddy_bytes,
                )
            }
            None => (started_at, finished.saturating_sub(started_at), None, bytes_relayed),
        };
        let started = blur_timestamp(started_at, self.blur_usage_seconds);
        let total_bytes = if self.blur_usage_seconds > 0 {
            blur_size(total_bytes)
        } else {
            total_bytes
        };
        let record = UsageRecord {
            kind: "transit",
            started,
            total_time,
            waiting_time,
            total_bytes,
            mood,
        };
        self.usage.record(record);
    }
}
