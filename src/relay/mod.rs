//! This module contains the implementation details of `transit-relay`.
//!
//! By default, it is hidden to the user, unless explicitly enabled with
//! the feature flag `expose_impl`.

pub mod active;
pub mod channel;
pub mod config;
pub mod core;
pub mod error;
pub mod fsm;
pub mod handshake;
pub mod mood;
pub mod net;
pub mod pending;
pub mod rlimit;
pub mod token;
pub mod usage;

use std::ops::Drop;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::relay::config::RelayConfig;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Handle to process-wide setup performed by `init`. Dropping it does
/// not undo the rlimit bump — there's nothing to give back — but it
/// marks the slot that would hold real teardown if a future version of
/// this relay ever needs one.
pub struct InitGuard;

/// Performs process-wide setup: today, just a best-effort bump of the
/// open-file soft limit. Safe to call more than once; only the first
/// call does anything.
pub fn init(config: &RelayConfig) -> Option<InitGuard> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return None;
    }
    rlimit::raise_nofile_limit(config.desired_nofile);
    Some(InitGuard)
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        INITIALIZED.store(false, Ordering::SeqCst);
    }
}
