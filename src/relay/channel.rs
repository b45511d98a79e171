//! The `ClientChannel` contract driven by `ConnectionState`, and the
//! shared backpressure primitive used by both concrete transport adapters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A gate a channel's own read loop waits on before pulling more bytes
/// off its transport. A paired partner toggles it to throttle a producer
/// whenever its own outbound buffer backs up (see §5 backpressure).
pub struct BackpressureGate {
    paused: AtomicBool,
    notify: Notify,
}

impl BackpressureGate {
    pub fn new() -> Arc<Self> {
        Arc::new(BackpressureGate {
            paused: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Blocks until the gate is open. A no-op if it already is.
    pub async fn wait_until_open(&self) {
        while self.paused.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }
}

/// The capability set the `ConnectionState` FSM drives, implemented once
/// per transport (TCP line framing, WebSocket message framing). Every
/// method must be safe to call from the single-threaded transition
/// dispatch without blocking.
pub trait ClientChannel: Send + Sync {
    /// Enqueues `data` to be written to the peer. Fails silently if the
    /// channel is already closed.
    fn send(&self, data: &[u8]);

    /// Initiates a graceful close of the underlying transport. Idempotent.
    fn disconnect(&self);

    /// Registers `other` as this channel's relay partner: this channel
    /// becomes a producer for `other`'s consumer, i.e. this channel's own
    /// read loop will wait on `other`'s backpressure gate before pulling
    /// more bytes.
    fn connect_partner(&self, other: Arc<dyn ClientChannel>);

    /// Closes the registered partner channel. Idempotent; a no-op if no
    /// partner was ever registered, or it was already disconnected.
    fn disconnect_partner(&self);

    /// Monotonic timestamp (unix seconds) of channel creation.
    fn started_at(&self) -> u64;

    /// This channel's own backpressure gate, toggled by its write path
    /// and consulted by whichever channel has been wired to it via
    /// `connect_partner`.
    fn backpressure_gate(&self) -> Arc<BackpressureGate>;
}

/// Shared bookkeeping for the partner link, reused by both concrete
/// adapters so `connect_partner`/`disconnect_partner` aren't duplicated.
#[derive(Default)]
pub struct PartnerLink(Mutex<Option<Arc<dyn ClientChannel>>>);

impl PartnerLink {
    pub fn set(&self, other: Arc<dyn ClientChannel>) {
        *self.0.lock() = Some(other);
    }

    pub fn get(&self) -> Option<Arc<dyn ClientChannel>> {
        self.0.lock().clone()
    }

    pub fn disconnect(&self) {
        if let Some(partner) = self.0.lock().take() {
            partner.disconnect();
        }
    }
}
