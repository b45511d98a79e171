//! Best-effort open-file soft-limit bump at startup.
//!
//! A relay holds two file descriptors per active pair plus one per
//! pending waiter, so the platform default (often 1024) caps concurrency
//! far below what the process can otherwise handle.

#[cfg(unix)]
pub fn raise_nofile_limit(desired: u64) {
    use tracing::{info, warn};

    // SAFETY: `getrlimit`/`setrlimit` only read/write a caller-owned
    // `libc::rlimit` and touch no other process state.
    unsafe {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) != 0 {
            warn!("getrlimit(RLIMIT_NOFILE) failed, leaving the limit untouched");
            return;
        }

        // Try, in order: the hard limit, the desired value, then a
        // descending ladder of conservative fallbacks. The first one the
        // kernel accepts wins.
        let mut candidates = vec![limit.rlim_max, desired, 10_000, 3_200, 1_024];
        candidates.retain(|&c| c <= limit.rlim_max || limit.rlim_max == libc::RLIM_INFINITY);
        candidates.sort_unstable_by(|a, b| b.cmp(a));
        candidates.dedup();

        for candidate in candidates {
            let mut attempt = limit;
            attempt.rlim_cur = candidate;
            if libc::setrlimit(libc::RLIMIT_NOFILE, &attempt) == 0 {
                info!(soft_limit = candidate, "raised RLIMIT_NOFILE");
                return;
            }
        }
        warn!("unable to raise RLIMIT_NOFILE to any candidate value");
    }
}

#[cfg(not(unix))]
pub fn raise_nofile_limit(_desired: u64) {
    tracing::debug!("RLIMIT_NOFILE is a unix-only concept, nothing to raise on this platform");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn does_not_panic() {
        raise_nofile_limit(10_000);
    }
}
