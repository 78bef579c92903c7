//! Cache lifecycle controller.
//!
//! Uses `ArcSwap` for lock-free state reads and a `watch` channel to signal
//! background workers when close begins.

use std::sync::Arc;

use arc_swap::ArcSwap;
use gridcache_core::{CacheError, CacheResult};
use tokio::sync::watch;

/// Cache lifecycle state.
///
/// State machine: Open -> Closing -> Closed. Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// The cache accepts all operations.
    Open,
    /// Close has begun: workers are draining, operations are rejected.
    Closing,
    /// All workers have stopped; the cache is unusable.
    Closed,
}

/// Coordinates the close sequence across the cache:
///
/// 1. Public operations check [`ensure_open`](LifecycleController::ensure_open)
/// 2. [`begin_close`](LifecycleController::begin_close) moves to Closing and
///    signals the evictor and dispatch workers
/// 3. After draining, [`set_closed`](LifecycleController::set_closed) makes
///    the terminal transition
#[derive(Debug)]
pub struct LifecycleController {
    state: ArcSwap<CacheState>,
    shutdown_signal: watch::Sender<bool>,
}

impl LifecycleController {
    /// Creates a controller in the `Open` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: ArcSwap::from_pointee(CacheState::Open),
            shutdown_signal: tx,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CacheState {
        **self.state.load()
    }

    /// Returns `true` once the cache is no longer `Open`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() != CacheState::Open
    }

    /// Fails with [`CacheError::Closed`] unless the cache is `Open`.
    pub fn ensure_open(&self) -> CacheResult<()> {
        if self.state() == CacheState::Open {
            Ok(())
        } else {
            Err(CacheError::Closed)
        }
    }

    /// Returns a receiver notified when close begins.
    ///
    /// Workers should select on this receiver alongside their main loop.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Transitions `Open -> Closing` and signals all shutdown receivers.
    ///
    /// Returns `true` only for the caller that performed the transition, so
    /// concurrent closers run the drain sequence exactly once.
    pub fn begin_close(&self) -> bool {
        let previous = self.state.rcu(|current| match **current {
            CacheState::Open => CacheState::Closing,
            other => other,
        });
        if *previous == CacheState::Open {
            // Ignore send errors -- receivers may have been dropped
            let _ = self.shutdown_signal.send(true);
            true
        } else {
            false
        }
    }

    /// Makes the terminal `Closed` transition.
    pub fn set_closed(&self) {
        self.state.store(Arc::new(CacheState::Closed));
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_open() {
        let lifecycle = LifecycleController::new();
        assert_eq!(lifecycle.state(), CacheState::Open);
        assert!(!lifecycle.is_closed());
        assert!(lifecycle.ensure_open().is_ok());
    }

    #[test]
    fn begin_close_transitions_once() {
        let lifecycle = LifecycleController::new();
        assert!(lifecycle.begin_close());
        assert_eq!(lifecycle.state(), CacheState::Closing);
        assert!(!lifecycle.begin_close(), "second closer observes Closing");

        lifecycle.set_closed();
        assert_eq!(lifecycle.state(), CacheState::Closed);
        assert!(!lifecycle.begin_close(), "Closed is terminal");
        assert_eq!(lifecycle.state(), CacheState::Closed);
    }

    #[test]
    fn ensure_open_fails_after_close_begins() {
        let lifecycle = LifecycleController::new();
        lifecycle.begin_close();
        assert!(matches!(
            lifecycle.ensure_open(),
            Err(CacheError::Closed)
        ));
        assert!(lifecycle.is_closed());
    }

    #[tokio::test]
    async fn shutdown_receiver_notified() {
        let lifecycle = LifecycleController::new();
        let mut rx = lifecycle.shutdown_receiver();

        assert!(!*rx.borrow());
        lifecycle.begin_close();
        rx.changed().await.expect("signal");
        assert!(*rx.borrow());
    }
}
