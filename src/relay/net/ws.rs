//! WebSocket transport (feature `websocket`): same handshake grammar as
//! the line-framed TCP transport, carried as the first text/binary
//! message instead of a newline-terminated line.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::relay::channel::{BackpressureGate, ClientChannel, PartnerLink};
use crate::relay::core::TransitCore;
use crate::relay::handshake;

const OUTBOUND_QUEUE_DEPTH: usize = 256;
const LOW_WATER: usize = 32;

enum OutboundMsg {
    Data(Vec<u8>),
    Close,
}

/// `ClientChannel` over a WebSocket connection.
pub struct MessageChannel {
    outbound: mpsc::Sender<OutboundMsg>,
    partner: PartnerLink,
    gate: Arc<BackpressureGate>,
    started_at: u64,
}

impl ClientChannel for MessageChannel {
    fn send(&self, data: &[u8]) {
        if self.outbound.try_send(OutboundMsg::Data(data.to_vec())).is_err() {
            warn!("websocket outbound queue full, dropping forwarded chunk");
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

async fn handle_connection(stream: TcpStream, core: Arc<TransitCore>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            debug!(error = %err, "websocket upgrade failed");
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    let (tx, mut rx) = mpsc::channel::<OutboundMsg>(OUTBOUND_QUEUE_DEPTH);
    let tx_for_writer = tx.clone();
    let gate = BackpressureGate::new();

    let concrete = Arc::new(MessageChannel {
        outbound: tx,
        partner: PartnerLink::default(),
        gate: gate.clone(),
        started_at: now_unix(),
    });
    let channel: Arc<dyn ClientChannel> = concrete.clone();

    let writer_gate = gate.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let outcome = match msg {
                OutboundMsg::Data(data) => sink.send(WsMessage::Binary(data)).await,
                OutboundMsg::Close => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            };
            if outcome.is_err() {
                break;
            }
            if tx_for_writer.capacity() < LOW_WATER {
                writer_gate.pause();
            } else {
                writer_gate.resume();
            }
        }
        let _ = sink.close().await;
    });

    let id = core.accept(channel.clone());

    let first = stream.next().await;
    let handshake_payload = match first {
        Some(Ok(WsMessage::Text(text))) => Some(text.into_bytes()),
        Some(Ok(WsMessage::Binary(data))) => Some(data),
        _ => {
            core.connection_lost(id);
            return;
        }
    };
    match handshake_payload.and_then(|data| handshake::parse(&data)) {
        Some(hs) => core.handshake(id, hs),
        None => {
            core.bad_token(id);
            return;
        }
    }

    while let Some(msg) = {
        if let Some(partner) = concrete.partner.get() {
            partner.backpressure_gate().wait_until_open().await;
        }
        stream.next().await
    } {
        match msg {
            Ok(WsMessage::Binary(data)) => core.got_bytes(id, data),
            Ok(WsMessage::Text(text)) => core.got_bytes(id, text.into_bytes()),
            Ok(WsMessage::Close(_)) | Err(_) => {
                core.connection_lost(id);
                return;
            }
            Ok(_) => {}
        }
    }
    core.connection_lost(id);
}

/// Runs the WebSocket accept loop until the listener itself fails.
pub async fn serve(addr: &str, core: Arc<TransitCore>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "websocket transit listener bound");
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "websocket connection accepted");
        let core = core.clone();
        tokio::spawn(handle_connection(stream, core));
    }
}
