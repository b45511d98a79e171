//! Line-framed TCP transport: the original magic-wormhole wire protocol.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::relay::channel::{BackpressureGate, ClientChannel, PartnerLink};
use crate::relay::core::TransitCore;
use crate::relay::handshake;

const OUTBOUND_QUEUE_DEPTH: usize = 256;
const LOW_WATER: usize = 32;
const READ_CHUNK: usize = 64 * 1024;

enum OutboundMsg {
    Data(Vec<u8>),
    Close,
}

/// `ClientChannel` over a raw TCP socket, framing the handshake as a
/// single newline-terminated line and everything after as an opaque
/// byte stream.
pub struct LineChannel {
    outbound: mpsc::Sender<OutboundMsg>,
    partner: PartnerLink,
    gate: Arc<BackpressureGate>,
    started_at: u64,
}

impl ClientChannel for LineChannel {
    fn send(&self, data: &[u8]) {
        if self.outbound.try_send(OutboundMsg::Data(data.to_vec())).is_err() {
            warn!("tcp outbound queue full, dropping forwarded chunk");
            return;
        }
        if self.outbound.capacity() < LOW_WATER {
            self.gate.pause();
        }
    }

    fn disconnect(&self) {
        let _ = self.outbound.try_send(OutboundMsg::Close);
    }

    fn connect_partner(&self, other: Arc<dyn ClientChannel>) {
        self.partner.set(other);
    }

    fn disconnect_partner(&self) {
        self.partner.disconnect();
    }

    fn started_at(&self) -> u64 {
        self.started_at
    }

    fn backpressure_gate(&self) -> Arc<BackpressureGate> {
        self.gate.clone()
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn writer_task(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<OutboundMsg>,
    tx: mpsc::Sender<OutboundMsg>,
    gate: Arc<BackpressureGate>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            OutboundMsg::Data(data) => {
                if write_half.write_all(&data).await.is_err() {
                    break;
                }
            }
            OutboundMsg::Close => break,
        }
        if tx.capacity() < LOW_WATER {
            gate.pause();
        } else {
            gate.resume();
        }
    }
    let _ = write_half.shutdown().await;
}

async fn handle_connection(stream: TcpStream, core: Arc<TransitCore>) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    let gate = BackpressureGate::new();

    let concrete = Arc::new(LineChannel {
        outbound: tx.clone(),
        partner: PartnerLink::default(),
        gate: gate.clone(),
        started_at: now_unix(),
    });
    let channel: Arc<dyn ClientChannel> = concrete.clone();

    tokio::spawn(writer_task(write_half, rx, tx, gate));

    let id = core.accept(channel.clone());
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();

    match reader.read_until(b'\n', &mut line).await {
        Ok(0) => {
            core.connection_lost(id);
            return;
        }
        Err(_) => {
            core.connection_lost(id);
            return;
        }
        Ok(_) => {
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            match handshake::parse(&line) {
                Some(hs) => core.handshake(id, hs),
                None => {
                    core.bad_token(id);
                    return;
                }
            }
        }
    }

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        if let Some(partner) = concrete.partner.get() {
            partner.backpressure_gate().wait_until_open().await;
        }
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => {
                core.connection_lost(id);
                break;
            }
            Ok(n) => core.got_bytes(id, buf[..n].to_vec()),
        }
    }
}

/// Runs the TCP accept loop until the listener itself fails.
pub async fn serve(addr: &str, core: Arc<TransitCore>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "tcp transit listener bound");
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "tcp connection accepted");
        let core = core.clone();
        tokio::spawn(handle_connection(stream, core));
    }
}
