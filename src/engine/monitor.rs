//! Serialization monitor for engine access
//!
//! The engine is not safe for concurrent entry. A `Monitor` owns one engine
//! instance behind a `parking_lot::Mutex`; the only way to reach the engine
//! is through the guard returned by [`Monitor::lock`].
//!
//! ```text
//! ┌──────────────────────────── Monitor<E> ───────────────────────────┐
//! │  Session A ─┐                                                     │
//! │  Session B ─┼─► lock() ─► EngineGuard ─► &mut E ─► engine call(s) │
//! │  Session C ─┘      (one holder at a time, released on drop)       │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One acquisition per public entry point: internal helpers receive the
//! guard's `&mut E` instead of locking again.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use super::Engine;

/// Engine guard; holds the monitor until dropped
pub type EngineGuard<'a, E> = MutexGuard<'a, E>;

/// Single mutual-exclusion domain around one engine instance
pub struct Monitor<E: Engine> {
    engine: Mutex<E>,
    /// Completed acquisitions (for metrics)
    entries: AtomicU64,
}

impl<E: Engine> Monitor<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Mutex::new(engine),
            entries: AtomicU64::new(0),
        }
    }

    /// Acquire exclusive access to the engine
    pub fn lock(&self) -> EngineGuard<'_, E> {
        let guard = self.engine.lock();
        self.entries.fetch_add(1, Ordering::Relaxed);
        guard
    }

    /// Run a closure with exclusive access to the engine
    pub fn with_engine<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut E) -> R,
    {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Whether some caller currently holds the engine
    pub fn is_locked(&self) -> bool {
        self.engine.is_locked()
    }

    /// Number of acquisitions so far
    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    /// Take the engine back, e.g. to inspect it after all sessions closed
    pub fn into_inner(self) -> E {
        self.engine.into_inner()
    }
}
