//! Process-wide shutdown hook.
//!
//! SIGINT, SIGTERM and SIGHUP cancel every registered lifecycle so that its
//! cleanup runs before the process exits. The signal handler itself only
//! records the signal; a watcher thread does the cancelling. When nothing is
//! registered the handler exits immediately with `128 + signal`.
//!
//! SIGKILL cannot be intercepted: a killed process leaves its containers,
//! images and rendered file behind.

use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::docker::CancelToken;

const WATCH_INTERVAL: Duration = Duration::from_millis(50);

static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);
static REGISTRY: Registry = Registry::new();

/// Set of cancel tokens to fire on shutdown.
#[derive(Debug)]
pub struct Registry {
    entries: Mutex<Vec<(u64, CancelToken)>>,
    next_id: AtomicU64,
    active: AtomicUsize,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            active: AtomicUsize::new(0),
        }
    }

    /// Track `token` until the returned guard is dropped.
    pub fn register(&self, token: CancelToken) -> Registration<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, token));
        self.active.fetch_add(1, Ordering::SeqCst);
        Registration { registry: self, id }
    }

    /// Cancel every registered token. Returns how many were registered.
    pub fn cancel_all(&self) -> usize {
        let entries = self.lock();
        for (_, token) in entries.iter() {
            token.cancel();
        }
        entries.len()
    }

    pub fn len(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, CancelToken)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a token registered. Dropping it unregisters.
#[derive(Debug)]
#[must_use = "the token is unregistered when the guard is dropped"]
pub struct Registration<'a> {
    registry: &'a Registry,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.lock().retain(|(id, _)| *id != self.id);
        self.registry.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Register `token` with the process-wide hook. If a shutdown signal already
/// arrived the token is cancelled right away.
pub fn register(token: CancelToken) -> Registration<'static> {
    if pending_signal().is_some() {
        token.cancel();
    }
    REGISTRY.register(token)
}

/// The signal that triggered shutdown, if any.
pub fn pending_signal() -> Option<i32> {
    match PENDING_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        sig => Some(sig),
    }
}

/// Install the SIGINT/SIGTERM/SIGHUP handlers and start the watcher thread.
/// Safe to call more than once.
#[cfg(unix)]
pub fn install_handlers() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: `on_signal` only touches atomics and calls `_exit`, both
        // async-signal-safe.
        unsafe {
            libc::signal(libc::SIGINT, handler);
            libc::signal(libc::SIGTERM, handler);
            libc::signal(libc::SIGHUP, handler);
        }
        let watcher = std::thread::Builder::new()
            .name("docktask-shutdown".into())
            .spawn(watch);
        match watcher {
            Ok(_) => debug!(target: "docktask::shutdown", "signal handlers installed"),
            Err(e) => warn!(target: "docktask::shutdown", error = %e, "failed to start shutdown watcher"),
        }
    });
}

#[cfg(not(unix))]
pub fn install_handlers() {}

#[cfg(unix)]
extern "C" fn on_signal(sig: libc::c_int) {
    if REGISTRY.is_empty() {
        // SAFETY: `_exit` is async-signal-safe.
        unsafe { libc::_exit(128 + sig) };
    }
    PENDING_SIGNAL.store(sig, Ordering::SeqCst);
}

#[cfg(unix)]
fn watch() {
    let mut announced = false;
    loop {
        std::thread::sleep(WATCH_INTERVAL);
        let Some(sig) = pending_signal() else {
            continue;
        };
        let cancelled = REGISTRY.cancel_all();
        if !announced {
            info!(target: "docktask::shutdown", signal = sig, lifecycles = cancelled, "shutdown requested, cancelling");
            announced = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_scoped() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        {
            let _a = registry.register(CancelToken::new());
            let _b = registry.register(CancelToken::new());
            assert_eq!(registry.len(), 2);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_all_reaches_live_registrations_only() {
        let registry = Registry::new();
        let kept = CancelToken::new();
        let dropped = CancelToken::new();

        let _keep = registry.register(kept.clone());
        drop(registry.register(dropped.clone()));

        assert_eq!(registry.cancel_all(), 1);
        assert!(kept.is_cancelled());
        assert!(!dropped.is_cancelled());
    }
}
