//! Entry point owning the engine
//!
//! A [`PdfCore`] owns one engine instance behind its [`Monitor`] and the
//! settings shared by every session opened from it. Cloning a `PdfCore` is
//! cheap and shares the same monitor.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::CoreConfig;
use crate::engine::{Engine, Monitor};
use crate::error::Result;
use crate::outline::OutlineLimits;
use crate::session::{DocumentSource, Session, SessionId};

pub(crate) struct CoreInner<E: Engine> {
    pub(crate) monitor: Monitor<E>,
    dpi: AtomicU32,
    pub(crate) limits: OutlineLimits,
    next_session: AtomicU64,
}

impl<E: Engine> CoreInner<E> {
    pub(crate) fn dpi(&self) -> u32 {
        self.dpi.load(Ordering::Relaxed)
    }
}

/// Shared engine plus core settings
pub struct PdfCore<E: Engine> {
    inner: Arc<CoreInner<E>>,
}

impl<E: Engine> Clone for PdfCore<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Engine> PdfCore<E> {
    /// Wrap an engine with default settings
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, CoreConfig::default())
    }

    pub fn with_config(engine: E, config: CoreConfig) -> Self {
        tracing::debug!(
            dpi = config.dpi,
            max_outline_depth = config.max_outline_depth,
            max_outline_nodes = config.max_outline_nodes,
            "Creating PdfCore"
        );
        Self {
            inner: Arc::new(CoreInner {
                monitor: Monitor::new(engine),
                dpi: AtomicU32::new(config.dpi),
                limits: OutlineLimits::from(&config),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Open a document and start a session over it
    pub fn open(
        &self,
        source: impl Into<DocumentSource>,
        password: Option<&str>,
    ) -> Result<Session<E>> {
        let id = SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
        Session::open(id, Arc::clone(&self.inner), source.into(), password)
    }

    /// Density used for pixel sizes and rendering
    pub fn dpi(&self) -> u32 {
        self.inner.dpi()
    }

    /// Change the density; affects subsequent calls of every session
    pub fn set_dpi(&self, dpi: u32) {
        self.inner.dpi.store(dpi, Ordering::Relaxed);
    }

    pub fn outline_limits(&self) -> OutlineLimits {
        self.inner.limits
    }

    pub fn monitor(&self) -> &Monitor<E> {
        &self.inner.monitor
    }

    /// Run a closure with exclusive engine access, e.g. to inspect its state
    pub fn with_engine<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut E) -> R,
    {
        self.inner.monitor.with_engine(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FixtureDocument, FixtureEngine, FixturePage};

    #[test]
    fn test_dpi_is_shared_between_clones() {
        let core = PdfCore::new(FixtureEngine::new());
        assert_eq!(core.dpi(), 160);

        let other = core.clone();
        other.set_dpi(300);
        assert_eq!(core.dpi(), 300);
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        let core = PdfCore::new(FixtureEngine::new());
        let bytes = FixtureDocument::new()
            .with_page(FixturePage::letter())
            .to_bytes()
            .unwrap();

        let a = core.open(bytes.clone(), None).unwrap();
        let b = core.open(bytes, None).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(core.with_engine(|e| e.audit().documents), 2);
    }

    #[test]
    fn test_config_limits_are_applied() {
        let config = CoreConfig {
            max_outline_depth: 3,
            ..CoreConfig::default()
        };
        let core = PdfCore::with_config(FixtureEngine::new(), config);
        assert_eq!(core.outline_limits().max_depth, 3);
    }
}
