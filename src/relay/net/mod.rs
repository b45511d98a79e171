//! Transport adapters implementing `ClientChannel` over concrete sockets.

pub mod tcp;

#[cfg(feature = "websocket")]
pub mod ws;
