//! Per-page text search cursors
//!
//! A [`SearchCursor`] borrows its session, so it cannot outlive it. Its
//! engine handle stays in the session's `search_cursors` table under a
//! ticket; starting another search on the same page stops the old handle and
//! the old cursor's ticket no longer matches.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{Engine, Live};
use crate::error::{CoreError, Result};
use crate::geometry::Rect;
use crate::session::Session;

/// What to look for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub pattern: String,
    #[serde(default)]
    pub match_case: bool,
    #[serde(default)]
    pub match_whole_word: bool,
}

impl SearchQuery {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            match_case: false,
            match_whole_word: false,
        }
    }

    pub fn match_case(mut self, yes: bool) -> Self {
        self.match_case = yes;
        self
    }

    pub fn match_whole_word(mut self, yes: bool) -> Self {
        self.match_whole_word = yes;
        self
    }
}

impl From<&str> for SearchQuery {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CursorState {
    /// Built, engine search not started
    Created,
    Active,
    /// The last `next` found nothing
    ExhaustedForward,
    /// The last `prev` found nothing
    ExhaustedBackward,
    Stopped,
}

/// Cursor over the matches of one query on one page
pub struct SearchCursor<'s, E: Engine> {
    session: &'s Session<E>,
    index: usize,
    query: SearchQuery,
    ticket: Option<u64>,
    state: CursorState,
    has_next: bool,
    has_prev: bool,
}

impl<'s, E: Engine> std::fmt::Debug for SearchCursor<'s, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCursor")
            .field("index", &self.index)
            .field("query", &self.query)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Clone, Copy)]
enum Step {
    Next,
    Prev,
}

impl<'s, E: Engine> SearchCursor<'s, E> {
    pub fn page_index(&self) -> usize {
        self.index
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn has_prev(&self) -> bool {
        self.has_prev
    }

    /// Start the engine search, replacing any search running on the page
    pub fn start(&mut self) -> Result<()> {
        if self.state == CursorState::Stopped {
            return Err(CoreError::InvalidState("search was stopped".into()));
        }
        let index = self.index;
        let query = &self.query;
        let ticket = self.session.with_state(|ctx| -> Result<u64> {
            let text_page = ctx.ensure_text_page(index)?;
            ctx.stop_search(index);
            let raw = ctx.engine.search_start(
                text_page,
                &query.pattern,
                query.match_case,
                query.match_whole_word,
            );
            let search = Live::new(raw).ok_or_else(|| {
                CoreError::InvalidState(format!("engine refused to search page {}", index))
            })?;
            Ok(ctx.register_search(index, search))
        })?;

        debug!(index, pattern = %self.query.pattern, "Started search");
        self.ticket = Some(ticket);
        self.state = CursorState::Active;
        self.has_next = true;
        self.has_prev = true;
        Ok(())
    }

    fn step(&mut self, step: Step) -> Result<Option<Rect>> {
        let ticket = match (self.state, self.ticket) {
            (CursorState::Created, _) | (_, None) => {
                return Err(CoreError::InvalidState("search not started".into()))
            }
            (CursorState::Stopped, _) => {
                return Err(CoreError::InvalidState("search was stopped".into()))
            }
            (_, Some(ticket)) => ticket,
        };
        let index = self.index;

        let hit = self.session.with_state(|ctx| -> Result<Option<Rect>> {
            let search = ctx.search_for(index, ticket).ok_or_else(|| {
                CoreError::InvalidState("search was superseded or released".into())
            })?;
            let moved = match step {
                Step::Next => ctx.engine.search_next(search),
                Step::Prev => ctx.engine.search_prev(search),
            };
            if !moved {
                return Ok(None);
            }
            let char_index = ctx.engine.search_result_char_index(search);
            if char_index < 0 {
                return Ok(None);
            }
            let text_page = ctx.ensure_text_page(index)?;
            Ok(Some(Rect::from_char_box(
                ctx.engine.char_box(text_page, char_index),
            )))
        })?;

        match (step, hit.is_some()) {
            (Step::Next, found) => {
                self.has_next = found;
                self.state = if found {
                    CursorState::Active
                } else {
                    CursorState::ExhaustedForward
                };
            }
            (Step::Prev, found) => {
                self.has_prev = found;
                self.state = if found {
                    CursorState::Active
                } else {
                    CursorState::ExhaustedBackward
                };
            }
        }
        Ok(hit)
    }

    /// Advance to the next match; `None` once there are no more
    pub fn next(&mut self) -> Result<Option<Rect>> {
        self.step(Step::Next)
    }

    /// Step back to the previous match
    pub fn prev(&mut self) -> Result<Option<Rect>> {
        self.step(Step::Prev)
    }

    /// Total matches, `None` if the search never started or is no longer current
    pub fn count_results(&self) -> Option<usize> {
        let ticket = self.ticket?;
        let index = self.index;
        self.session.with_state(|ctx| {
            let search = ctx.search_for(index, ticket)?;
            Some(ctx.engine.search_result_count(search).max(0) as usize)
        })
    }

    /// All remaining matches in forward order
    pub fn collect_forward(&mut self) -> Result<Vec<Rect>> {
        let mut hits = Vec::new();
        while let Some(rect) = self.next()? {
            hits.push(rect);
        }
        Ok(hits)
    }

    /// Release the engine search; safe to call repeatedly
    pub fn stop(&mut self) {
        if self.state == CursorState::Stopped {
            return;
        }
        if let Some(ticket) = self.ticket.take() {
            let index = self.index;
            self.session.with_state(|ctx| {
                // leave a newer cursor's registration alone
                if ctx.search_for(index, ticket).is_some() {
                    ctx.stop_search(index);
                }
            });
        }
        self.state = CursorState::Stopped;
        self.has_next = false;
        self.has_prev = false;
    }
}

impl<'s, E: Engine> Drop for SearchCursor<'s, E> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<E: Engine> Session<E> {
    /// Cursor for `query` on page `index`, not yet started
    pub fn new_search(&self, index: usize, query: impl Into<SearchQuery>) -> SearchCursor<'_, E> {
        SearchCursor {
            session: self,
            index,
            query: query.into(),
            ticket: None,
            state: CursorState::Created,
            has_next: false,
            has_prev: false,
        }
    }

    /// Create and start a cursor
    pub fn search(
        &self,
        index: usize,
        query: impl Into<SearchQuery>,
    ) -> Result<SearchCursor<'_, E>> {
        let mut cursor = self.new_search(index, query);
        cursor.start()?;
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PdfCore;
    use crate::engine::{FixtureDocument, FixtureEngine, FixturePage};

    fn session() -> Session<FixtureEngine> {
        let core = PdfCore::new(FixtureEngine::new());
        let bytes = FixtureDocument::new()
            .with_page(FixturePage::letter().with_text("the cat and the Cat sat"))
            .with_page(FixturePage::letter().with_text("nothing here"))
            .to_bytes()
            .unwrap();
        core.open(bytes, None).unwrap()
    }

    #[test]
    fn test_cursor_walks_matches() {
        let session = session();
        let mut cursor = session.search(0, "cat").unwrap();
        assert_eq!(cursor.state(), CursorState::Active);
        assert_eq!(cursor.count_results(), Some(2));

        let first = cursor.next().unwrap().unwrap();
        assert_eq!(first.left, 72.0 + 4.0 * 6.0);
        assert!(cursor.next().unwrap().is_some());
        assert!(cursor.next().unwrap().is_none());
        assert_eq!(cursor.state(), CursorState::ExhaustedForward);
        assert!(!cursor.has_next());

        let back = cursor.prev().unwrap().unwrap();
        assert_eq!(back, first);
        assert!(cursor.prev().unwrap().is_none());
        assert_eq!(cursor.state(), CursorState::ExhaustedBackward);
    }

    #[test]
    fn test_query_options() {
        let session = session();
        let query = SearchQuery::new("Cat").match_case(true);
        let cursor = session.search(0, query).unwrap();
        assert_eq!(cursor.count_results(), Some(1));
        drop(cursor);

        let whole = SearchQuery::new("at").match_whole_word(true);
        let cursor = session.search(0, whole).unwrap();
        assert_eq!(cursor.count_results(), Some(0));
    }

    #[test]
    fn test_not_started_cursor() {
        let session = session();
        let mut cursor = session.new_search(0, "cat");
        assert_eq!(cursor.state(), CursorState::Created);
        assert_eq!(cursor.count_results(), None);
        assert!(matches!(cursor.next(), Err(CoreError::InvalidState(_))));
        assert!(!session.has_search_handle(0));
    }

    #[test]
    fn test_newer_cursor_supersedes_older() {
        let session = session();
        let mut old = session.search(0, "cat").unwrap();
        let mut new = session.search(0, "sat").unwrap();

        assert!(matches!(old.next(), Err(CoreError::InvalidState(_))));
        assert_eq!(old.count_results(), None);
        assert!(new.next().unwrap().is_some());

        // stopping the stale cursor leaves the new registration alone
        old.stop();
        assert!(session.has_search_handle(0));
        new.stop();
        assert!(!session.has_search_handle(0));
    }

    #[test]
    fn test_restart_stops_previous_search_first() {
        let core = PdfCore::new(FixtureEngine::new());
        let bytes = FixtureDocument::new()
            .with_page(FixturePage::letter().with_text("the cat sat"))
            .to_bytes()
            .unwrap();
        let session = core.open(bytes, None).unwrap();

        let old = session.search(0, "cat").unwrap();
        let new = session.search(0, "sat").unwrap();
        let new_two = session.search(0, "the").unwrap();
        let audit = core.with_engine(|e| e.audit());
        assert_eq!(audit.searches, 1);
        assert_eq!(audit.peak_searches, 1);
        assert_eq!(audit.violations, 0);
        drop((old, new, new_two));
        assert_eq!(core.with_engine(|e| e.audit().searches), 0);
    }

    #[test]
    fn test_absent_pattern_has_no_results() {
        let session = session();
        let mut cursor = session.search(0, "zebra").unwrap();
        assert_eq!(cursor.count_results(), Some(0));
        assert_eq!(cursor.next().unwrap(), None);
        assert_eq!(cursor.state(), CursorState::ExhaustedForward);
        assert!(!cursor.has_next());
    }

    #[test]
    fn test_stop_is_idempotent_and_terminal() {
        let session = session();
        let mut cursor = session.search(1, "here").unwrap();
        assert!(session.has_search_handle(1));
        cursor.stop();
        cursor.stop();
        assert_eq!(cursor.state(), CursorState::Stopped);
        assert!(!session.has_search_handle(1));
        assert!(matches!(cursor.next(), Err(CoreError::InvalidState(_))));
        assert!(matches!(cursor.start(), Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn test_drop_stops_cursor() {
        let session = session();
        {
            let _cursor = session.search(0, "the").unwrap();
            assert!(session.has_search_handle(0));
        }
        assert!(!session.has_search_handle(0));
    }

    #[test]
    fn test_cursor_after_close() {
        let session = session();
        let mut cursor = session.search(0, "cat").unwrap();
        session.close();
        assert!(matches!(cursor.next(), Err(CoreError::InvalidState(_))));
        assert!(matches!(cursor.prev(), Err(CoreError::InvalidState(_))));
        assert_eq!(cursor.count_results(), None);
        cursor.stop();
    }

    #[test]
    fn test_releasing_text_page_stops_search() {
        let session = session();
        let mut cursor = session.search(0, "cat").unwrap();
        session.release_text_page(0).unwrap();
        assert!(!session.has_search_handle(0));
        assert!(matches!(cursor.next(), Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn test_collect_forward() {
        let session = session();
        let mut cursor = session.search(0, "THE").unwrap();
        assert_eq!(cursor.collect_forward().unwrap().len(), 2);
        assert!(!cursor.has_next());
    }
}
