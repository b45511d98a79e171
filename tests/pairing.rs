//! End-to-end scenarios driven entirely through the public `TransitCore`
//! API, using an in-memory `ClientChannel` double instead of real
//! sockets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use transit_relay::{
    BackpressureGate, ClientChannel, Handshake, Side, Token, TransitCore, UsageRecord, UsageSink,
    UsageTracker,
};

#[derive(Default)]
struct FakeChannelInner {
    sent: Vec<Vec<u8>>,
    disconnected: bool,
    partner: Option<Arc<dyn ClientChannel>>,
}

struct FakeChannel {
    inner: Mutex<FakeChannelInner>,
    gate: Arc<BackpressureGate>,
    started_at: u64,
}

impl FakeChannel {
    fn new(started_at: u64) -> Arc<Self> {
        Arc::new(FakeChannel {
            inner: Mutex::new(FakeChannelInner::default()),
            gate: BackpressureGate::new(),
            started_at,
        })
    }

    fn sent_lines(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().sent.clone()
    }

    fn is_disconnected(&self) -> bool {
        self.inner.lock().unwrap().disconnected
    }
}

impl ClientChannel for FakeChannel {
    fn send(&self, data: &[u8]) {
        self.inner.lock().unwrap().sent.push(data.to_vec());
    }

    fn disconnect(&self) {
        self.inner.lock().unwrap().disconnected = true;
    }

    fn connect_partner(&self, other: Arc<dyn ClientChannel>) {
        self.inner.lock().unwrap().partner = Some(other);
    }

    fn disconnect_partner(&self) {
        if let Some(partner) = self.inner.lock().unwrap().partner.take() {
            partner.disconnect();
        }
    }

    fn started_at(&self) -> u64 {
        self.started_at
    }

    fn backpressure_gate(&self) -> Arc<BackpressureGate> {
        self.gate.clone()
    }
}

struct RecordingSink {
    records: Arc<Mutex<Vec<UsageRecord>>>,
}

impl UsageSink for RecordingSink {
    fn record(&mut self, record: &UsageRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

fn token(byte: u8) -> Token {
    let hex = format!("{:02x}", byte).repeat(32);
    Token::parse(hex.as_bytes()).unwrap()
}

fn side(byte: u8) -> Side {
    let hex = format!("{:02x}", byte).repeat(8);
    Side::parse(hex.as_bytes()).unwrap()
}

fn fixed_clock(seconds: u64) -> impl Fn() -> u64 + Send + Sync + Clone {
    let counter = Arc::new(AtomicU64::new(seconds));
    move || counter.fetch_add(1, Ordering::Relaxed)
}

fn new_core(records: Arc<Mutex<Vec<UsageRecord>>>) -> Arc<TransitCore> {
    let usage = UsageTracker::spawn(vec![Box::new(RecordingSink { records })]);
    TransitCore::new(usage, 0, fixed_clock(1_000))
}

#[tokio::test]
async fn two_sideless_clients_pair_and_relay() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let core = new_core(records.clone());

    let a = FakeChannel::new(1_000);
    let b = FakeChannel::new(1_001);
    let id_a = core.accept(a.clone());
    let id_b = core.accept(b.clone());

    core.handshake(id_a, Handshake { token: token(0xaa), side: None });
    assert!(a.sent_lines().is_empty(), "no ok until partner arrives");

    core.handshake(id_b, Handshake { token: token(0xaa), side: None });
    assert_eq!(a.sent_lines(), vec![b"ok\n".to_vec()]);
    assert_eq!(b.sent_lines(), vec![b"ok\n".to_vec()]);

    core.got_bytes(id_a, b"hello".to_vec());
    assert_eq!(b.sent_lines(), vec![b"ok\n".to_vec(), b"hello".to_vec()]);

    core.connection_lost(id_a);
    core.connection_lost(id_b);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let recorded = records.lock().unwrap();
    assert_eq!(recorded.len(), 1, "the jilted side's record is suppressed");
    assert_eq!(recorded[0].mood.as_str(), "happy");
    assert_eq!(recorded[0].total_bytes, 5);
    assert!(recorded[0].waiting_time.is_some());
}

#[tokio::test]
async fn sided_clients_with_matching_sides_wait_as_spares() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let core = new_core(records.clone());

    let a = FakeChannel::new(1_000);
    let b = FakeChannel::new(1_000);
    let c = FakeChannel::new(1_000);
    let id_a = core.accept(a.clone());
    let id_b = core.accept(b.clone());
    let id_c = core.accept(c.clone());

    core.handshake(id_a, Handshake { token: token(0xbb), side: Some(side(1)) });
    core.handshake(id_b, Handshake { token: token(0xbb), side: Some(side(1)) });

    // Same side: both simply wait, neither pairs nor is evicted yet.
    assert!(!a.is_disconnected());
    assert!(!b.is_disconnected());
    assert!(a.sent_lines().is_empty());
    assert!(b.sent_lines().is_empty());

    core.handshake(id_c, Handshake { token: token(0xbb), side: Some(side(2)) });

    // A differing side arrives: `a` (the first same-side waiter) pairs
    // with it, and `b` is evicted as the now-redundant spare.
    assert_eq!(a.sent_lines(), vec![b"ok\n".to_vec()]);
    assert_eq!(c.sent_lines(), vec![b"ok\n".to_vec()]);
    assert!(b.is_disconnected());

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let recorded = records.lock().unwrap();
    assert_eq!(recorded.len(), 1, "the redundant spare records no usage");
    assert_eq!(recorded[0].mood.as_str(), "redundant");
}

#[tokio::test]
async fn differing_sides_pair() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let core = new_core(records);

    let a = FakeChannel::new(1_000);
    let b = FakeChannel::new(1_000);
    let id_a = core.accept(a.clone());
    let id_b = core.accept(b.clone());

    core.handshake(id_a, Handshake { token: token(0xcc), side: Some(side(1)) });
    core.handshake(id_b, Handshake { token: token(0xcc), side: Some(side(2)) });

    assert_eq!(a.sent_lines(), vec![b"ok\n".to_vec()]);
    assert_eq!(b.sent_lines(), vec![b"ok\n".to_vec()]);
}

#[tokio::test]
async fn bad_handshake_is_rejected() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let core = new_core(records);
    let a = FakeChannel::new(1_000);
    let id_a = core.accept(a.clone());

    core.bad_token(id_a);
    assert_eq!(a.sent_lines(), vec![b"bad handshake\n".to_vec()]);
    assert!(a.is_disconnected());
}

#[tokio::test]
async fn lone_waiter_that_hangs_up_is_lonely() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let core = new_core(records.clone());
    let a = FakeChannel::new(1_000);
    let id_a = core.accept(a.clone());

    core.handshake(id_a, Handshake { token: token(0xdd), side: None });
    core.connection_lost(id_a);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let recorded = records.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].mood.as_str(), "lonely");
    assert_eq!(recorded[0].waiting_time, None);
}

#[tokio::test]
async fn bytes_before_partner_are_impatient() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let core = new_core(records.clone());
    let a = FakeChannel::new(1_000);
    let id_a = core.accept(a.clone());

    core.handshake(id_a, Handshake { token: token(0xee), side: None });
    core.got_bytes(id_a, b"too early".to_vec());
    assert_eq!(a.sent_lines(), vec![b"impatient\n".to_vec()]);
    assert!(a.is_disconnected());

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let recorded = records.lock().unwrap();
    assert_eq!(recorded[0].mood.as_str(), "impatient");
}

