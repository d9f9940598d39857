//! Async facade over a session
//!
//! Engine calls are CPU-bound and block while the monitor is held, so every
//! operation here is offloaded to tokio's blocking pool.

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{CoreError, Result};
use crate::geometry::Rect;
use crate::outline::Bookmark;
use crate::search::SearchQuery;
use crate::session::Session;
use crate::types::{DocumentMeta, Link};

/// Cloneable async handle to one session
pub struct SessionService<E: Engine + 'static> {
    session: Arc<Session<E>>,
}

impl<E: Engine + 'static> Clone for SessionService<E> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<E: Engine + 'static> SessionService<E> {
    pub fn new(session: Session<E>) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    pub fn session(&self) -> &Session<E> {
        &self.session
    }

    /// Run a session operation on the blocking pool
    pub async fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Session<E>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || f(&session))
            .await
            .map_err(|e| CoreError::Task(e.to_string()))?
    }

    pub async fn page_count(&self) -> Result<usize> {
        self.run(|s| s.page_count()).await
    }

    pub async fn metadata(&self) -> Result<DocumentMeta> {
        self.run(|s| s.metadata()).await
    }

    pub async fn table_of_contents(&self) -> Result<Vec<Bookmark>> {
        self.run(|s| s.table_of_contents()).await
    }

    pub async fn page_text(&self, index: usize) -> Result<String> {
        self.run(move |s| s.extract_page_text(index)).await
    }

    pub async fn page_links(&self, index: usize) -> Result<Vec<Link>> {
        self.run(move |s| s.page_links(index)).await
    }

    /// Every match of `query` on a page, in forward order
    pub async fn search_page(&self, index: usize, query: SearchQuery) -> Result<Vec<Rect>> {
        self.run(move |s| {
            let mut cursor = s.search(index, query)?;
            cursor.collect_forward()
        })
        .await
    }

    pub async fn close(&self) -> Result<()> {
        self.run(|s| {
            s.close();
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PdfCore;
    use crate::engine::{FixtureBookmark, FixtureDocument, FixtureEngine, FixturePage};

    fn service() -> (PdfCore<FixtureEngine>, SessionService<FixtureEngine>) {
        let core = PdfCore::new(FixtureEngine::new());
        let bytes = FixtureDocument::new()
            .with_page(FixturePage::letter().with_text("async text, async search"))
            .with_bookmark(FixtureBookmark::new("Start", Some(0)))
            .to_bytes()
            .unwrap();
        let session = core.open(bytes, None).unwrap();
        (core, SessionService::new(session))
    }

    #[tokio::test]
    async fn test_service_round_trip() {
        let (core, service) = service();
        assert_eq!(service.page_count().await.unwrap(), 1);
        assert_eq!(service.page_text(0).await.unwrap(), "async text, async search");
        assert_eq!(service.table_of_contents().await.unwrap()[0].title, "Start");

        let hits = service.search_page(0, SearchQuery::new("async")).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(!service.session().has_search_handle(0));

        service.close().await.unwrap();
        assert!(core.with_engine(|e| e.audit().is_clean()));
    }

    #[tokio::test]
    async fn test_concurrent_tasks_share_cache() {
        let (core, service) = service();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.page_text(0).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "async text, async search");
        }
        let audit = core.with_engine(|e| e.audit());
        assert_eq!(audit.page_loads, 1);
        assert_eq!(audit.text_page_loads, 1);
        assert_eq!(audit.violations, 0);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let (_core, service) = service();
        let err = service.page_text(4).await.unwrap_err();
        assert!(matches!(err, CoreError::Index { index: 4, count: 1 }));
    }
}
