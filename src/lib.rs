//! `transit-relay`: a rendezvous server for magic-wormhole-style transit.
//!
//! Two independent inbound connections that present the same token are
//! paired and spliced into a single bidirectional byte conduit. The relay
//! never inspects payload; it only parses the handshake line/message that
//! precedes it.
//!
//! By default, the implementation details are hidden, unless explicitly
//! enabled with the feature flag `expose_impl`.

#[cfg(not(feature = "expose_impl"))]
mod relay;

#[cfg(feature = "expose_impl")]
pub mod relay;

pub use relay::channel::{BackpressureGate, ClientChannel};
pub use relay::config::{RelayConfig, UsageSinkKind};
pub use relay::core::{ConnectedSnapshot, TransitCore};
pub use relay::error::{Error, ErrorKind, Result};
pub use relay::fsm::ConnId;
pub use relay::handshake::Handshake;
pub use relay::mood::Mood;
pub use relay::token::{Side, Token};
#[cfg(feature = "database")]
pub use relay::usage::database;
pub use relay::usage::{log_file, memory, UsageRecord, UsageSink, UsageTracker};
pub use relay::{init, net, InitGuard};
