//! Document sessions
//!
//! A [`Session`] owns one open document plus three caches of engine handles
//! keyed by page index: pages, text pages, and search cursors. Every public
//! method runs inside one acquisition of the engine monitor, followed by the
//! session's own state lock (always in that order).
//!
//! Release order on [`Session::close`] is search cursors, then text pages,
//! then pages, then the document. A handle is released at most once; the
//! tables hand out raw values only to code that holds the monitor.

mod handle_table;
mod source;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::CoreInner;
use crate::engine::{
    Engine, EngineError, Live, MetaKey, NativeHandle, RawDocument, RawPage, RawSearch, RawTextPage,
};
use crate::error::{CoreError, OpenError, Result};
use crate::geometry::{DevicePoint, DeviceRect, PageSize, Rect, Rotation, Viewport};
use crate::outline::OutlineLimits;
use crate::types::{DocumentMeta, Link};

pub use handle_table::HandleTable;
pub use source::DocumentSource;

/// Identity of one session within its `PdfCore`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(pub(crate) u64);

/// Receipt for a cached page
///
/// Two receipts are equal exactly when they refer to the same cached engine
/// handle. The raw handle itself stays inside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageHandle {
    session: SessionId,
    index: usize,
    token: u64,
}

impl PageHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// Receipt for a cached text page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextPageHandle {
    session: SessionId,
    index: usize,
    token: u64,
}

impl TextPageHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// Mutable session state, guarded by the session lock
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    doc: Option<Live<RawDocument>>,
    source: Option<DocumentSource>,
    pub(crate) pages: HandleTable<RawPage>,
    pub(crate) text_pages: HandleTable<RawTextPage>,
    pub(crate) search_cursors: HandleTable<RawSearch>,
    page_tokens: HashMap<usize, u64>,
    text_tokens: HashMap<usize, u64>,
    cursor_tickets: HashMap<usize, u64>,
    next_token: u64,
}

impl SessionState {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

/// Everything an operation needs once both locks are held
pub(crate) struct Ctx<'a, E: Engine> {
    pub(crate) engine: &'a mut E,
    pub(crate) state: &'a mut SessionState,
    pub(crate) dpi: u32,
    pub(crate) limits: OutlineLimits,
    session: SessionId,
}

/// Log a failed release and carry on
fn log_release(
    kind: &str,
    index: Option<usize>,
    raw: i64,
    result: std::result::Result<(), EngineError>,
) {
    if let Err(e) = result {
        warn!(kind, index, handle = raw, error = %e, "Failed to release engine handle");
    }
}

impl<'a, E: Engine> Ctx<'a, E> {
    pub(crate) fn doc(&self) -> Result<RawDocument> {
        self.state.doc.as_ref().map(Live::get).ok_or(CoreError::NotOpen)
    }

    pub(crate) fn page_count(&mut self) -> Result<usize> {
        let doc = self.doc()?;
        Ok(self.engine.page_count(doc).max(0) as usize)
    }

    pub(crate) fn check_index(&mut self, index: usize) -> Result<()> {
        let count = self.page_count()?;
        if index >= count {
            return Err(CoreError::Index { index, count });
        }
        Ok(())
    }

    fn page_receipt(&self, index: usize) -> Option<PageHandle> {
        self.state.page_tokens.get(&index).map(|&token| PageHandle {
            session: self.session,
            index,
            token,
        })
    }

    fn text_receipt(&self, index: usize) -> Option<TextPageHandle> {
        self.state.text_tokens.get(&index).map(|&token| TextPageHandle {
            session: self.session,
            index,
            token,
        })
    }

    fn store_page(&mut self, index: usize, page: Live<RawPage>) {
        if let Some(displaced) = self.state.pages.put(index, page) {
            let raw = displaced.into_inner();
            let result = self.engine.close_page(raw);
            log_release("page", Some(index), raw.as_raw(), result);
        }
        let token = self.state.token();
        self.state.page_tokens.insert(index, token);
    }

    /// Cached page handle, loading it on a miss
    pub(crate) fn ensure_page(&mut self, index: usize) -> Result<RawPage> {
        self.open_page(index)?;
        self.state.pages.get(index).ok_or(CoreError::PageLoad(index))
    }

    fn open_page(&mut self, index: usize) -> Result<PageHandle> {
        let doc = self.doc()?;
        self.check_index(index)?;
        if let Some(receipt) = self.page_receipt(index) {
            if self.state.pages.contains(index) {
                return Ok(receipt);
            }
        }

        let raw = self.engine.load_page(doc, index as i32);
        let page = Live::new(raw).ok_or(CoreError::PageLoad(index))?;
        debug!(index, handle = raw.as_raw(), "Loaded page");
        self.store_page(index, page);
        self.page_receipt(index).ok_or(CoreError::PageLoad(index))
    }

    fn open_pages(&mut self, from: usize, to: usize) -> Result<Vec<PageHandle>> {
        let doc = self.doc()?;
        let count = self.page_count()?;
        if from > to || from >= count {
            return Ok(Vec::new());
        }
        let last = to.min(count - 1);

        let mut index = from;
        while index <= last {
            if self.state.pages.contains(index) {
                index += 1;
                continue;
            }
            let run_start = index;
            while index <= last && !self.state.pages.contains(index) {
                index += 1;
            }
            let run_end = index - 1;

            let mut loaded = self
                .engine
                .load_pages(doc, run_start as i32, run_end as i32)
                .into_iter();
            for page_index in run_start..=run_end {
                match loaded.next().and_then(Live::new) {
                    Some(page) => self.store_page(page_index, page),
                    None => debug!(index = page_index, "Engine returned no page in ranged load"),
                }
            }
            // more handles than requested: not ours to keep
            for surplus in loaded.filter_map(Live::new) {
                let raw = surplus.into_inner();
                let result = self.engine.close_page(raw);
                log_release("page", None, raw.as_raw(), result);
            }
        }

        Ok((from..=last).filter_map(|i| self.page_receipt(i)).collect())
    }

    /// Cached text page handle, deriving it (and the page) on a miss
    pub(crate) fn ensure_text_page(&mut self, index: usize) -> Result<RawTextPage> {
        self.open_text_page(index)?;
        self.state.text_pages.get(index).ok_or(CoreError::NoText(index))
    }

    fn open_text_page(&mut self, index: usize) -> Result<TextPageHandle> {
        if self.state.text_pages.contains(index) {
            self.check_index(index)?;
            if let Some(receipt) = self.text_receipt(index) {
                return Ok(receipt);
            }
        }

        let page = self.ensure_page(index)?;
        let raw = self.engine.load_text_page(page);
        let text_page = Live::new(raw).ok_or(CoreError::NoText(index))?;
        debug!(index, handle = raw.as_raw(), "Loaded text page");

        if let Some(displaced) = self.state.text_pages.put(index, text_page) {
            let raw = displaced.into_inner();
            let result = self.engine.close_text_page(raw);
            log_release("text page", Some(index), raw.as_raw(), result);
        }
        let token = self.state.token();
        self.state.text_tokens.insert(index, token);
        self.text_receipt(index).ok_or(CoreError::NoText(index))
    }

    /// Register a freshly started search, stopping any older one on the page
    /// Callers stop the previous search on `index` before starting this one
    pub(crate) fn register_search(&mut self, index: usize, search: Live<RawSearch>) -> u64 {
        let ticket = self.state.token();
        if let Some(displaced) = self.state.search_cursors.put(index, search) {
            let raw = displaced.into_inner();
            let result = self.engine.search_stop(raw);
            log_release("search", Some(index), raw.as_raw(), result);
        }
        self.state.cursor_tickets.insert(index, ticket);
        ticket
    }

    /// Search handle registered under `ticket`, if it is still current
    pub(crate) fn search_for(&self, index: usize, ticket: u64) -> Option<RawSearch> {
        match self.state.cursor_tickets.get(&index) {
            Some(&current) if current == ticket => self.state.search_cursors.get(index),
            _ => None,
        }
    }

    /// Stop the search registered on `index` (no-op if none)
    pub(crate) fn stop_search(&mut self, index: usize) {
        self.state.cursor_tickets.remove(&index);
        if let Some(search) = self.state.search_cursors.remove(index) {
            let raw = search.into_inner();
            let result = self.engine.search_stop(raw);
            log_release("search", Some(index), raw.as_raw(), result);
        }
    }

    fn release_text_page(&mut self, index: usize) -> bool {
        self.stop_search(index);
        self.state.text_tokens.remove(&index);
        match self.state.text_pages.remove(index) {
            Some(text_page) => {
                let raw = text_page.into_inner();
                let result = self.engine.close_text_page(raw);
                log_release("text page", Some(index), raw.as_raw(), result);
                true
            }
            None => false,
        }
    }

    fn close(&mut self) {
        let Some(doc) = self.state.doc.take() else {
            return;
        };

        self.state.cursor_tickets.clear();
        for (index, search) in self.state.search_cursors.drain() {
            let raw = search.into_inner();
            let result = self.engine.search_stop(raw);
            log_release("search", Some(index), raw.as_raw(), result);
        }

        self.state.text_tokens.clear();
        for (index, text_page) in self.state.text_pages.drain() {
            let raw = text_page.into_inner();
            let result = self.engine.close_text_page(raw);
            log_release("text page", Some(index), raw.as_raw(), result);
        }

        self.state.page_tokens.clear();
        for (index, page) in self.state.pages.drain() {
            let raw = page.into_inner();
            let result = self.engine.close_page(raw);
            log_release("page", Some(index), raw.as_raw(), result);
        }

        let raw = doc.into_inner();
        let result = self.engine.close_document(raw);
        log_release("document", None, raw.as_raw(), result);
        self.state.source = None;
    }
}

/// One open document and its cached engine handles
pub struct Session<E: Engine> {
    id: SessionId,
    core: Arc<CoreInner<E>>,
    state: Mutex<SessionState>,
}

impl<E: Engine> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<E: Engine> Session<E> {
    pub(crate) fn open(
        id: SessionId,
        core: Arc<CoreInner<E>>,
        source: DocumentSource,
        password: Option<&str>,
    ) -> Result<Self> {
        let raw = {
            let mut engine = core.monitor.lock();
            engine
                .open_document(source.input(), password)
                .map_err(OpenError::from)?
        };
        let doc = Live::new(raw)
            .ok_or_else(|| OpenError::Engine(format!("engine returned null document {}", raw.0)))?;
        info!(session = id.0, handle = raw.as_raw(), "Opened document");

        Ok(Self {
            id,
            core,
            state: Mutex::new(SessionState {
                doc: Some(doc),
                source: Some(source),
                ..SessionState::default()
            }),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Run `f` holding the monitor, then the session lock
    pub(crate) fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Ctx<'_, E>) -> R,
    {
        let mut engine = self.core.monitor.lock();
        let mut state = self.state.lock();
        let mut ctx = Ctx {
            engine: &mut *engine,
            state: &mut *state,
            dpi: self.core.dpi(),
            limits: self.core.limits,
            session: self.id,
        };
        f(&mut ctx)
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().doc.is_some()
    }

    /// Whether the open document reads from a file rather than memory
    pub fn is_file_backed(&self) -> bool {
        matches!(self.state.lock().source, Some(DocumentSource::File(_)))
    }

    pub fn page_count(&self) -> Result<usize> {
        self.with_state(|ctx| ctx.page_count())
    }

    /// Open (or return the cached) page at `index`
    pub fn open_page(&self, index: usize) -> Result<PageHandle> {
        self.with_state(|ctx| ctx.open_page(index))
    }

    /// Open every page in `from..=to`, skipping indices past the end
    pub fn open_pages(&self, from: usize, to: usize) -> Result<Vec<PageHandle>> {
        self.with_state(|ctx| ctx.open_pages(from, to))
    }

    /// Whether `handle` still names the page cached for its index
    pub fn is_current(&self, handle: &PageHandle) -> bool {
        handle.session == self.id
            && self.with_state(|ctx| ctx.page_receipt(handle.index) == Some(*handle))
    }

    /// Text page for `index`, opening the page first if needed
    pub fn ensure_text_page(&self, index: usize) -> Result<TextPageHandle> {
        self.with_state(|ctx| ctx.open_text_page(index))
    }

    /// Derive text pages for `from..=to`; returns how many are now cached
    pub fn prepare_text_pages(&self, from: usize, to: usize) -> Result<usize> {
        self.with_state(|ctx| {
            let count = ctx.page_count()?;
            if from > to || from >= count {
                return Ok(0);
            }
            let mut prepared = 0;
            for index in from..=to.min(count - 1) {
                match ctx.open_text_page(index) {
                    Ok(_) => prepared += 1,
                    Err(CoreError::NoText(_)) | Err(CoreError::PageLoad(_)) => {
                        debug!(index, "Skipping page without text layer")
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(prepared)
        })
    }

    /// Release the text page cached for `index` (and its search cursor)
    pub fn release_text_page(&self, index: usize) -> Result<bool> {
        self.with_state(|ctx| {
            ctx.doc()?;
            Ok(ctx.release_text_page(index))
        })
    }

    /// Release every text page cached in `from..=to`; returns how many
    pub fn release_text_pages(&self, from: usize, to: usize) -> Result<usize> {
        self.with_state(|ctx| {
            ctx.doc()?;
            let cached: Vec<usize> = ctx
                .state
                .text_pages
                .indices()
                .into_iter()
                .filter(|i| (from..=to).contains(i))
                .collect();
            Ok(cached
                .into_iter()
                .filter(|&index| ctx.release_text_page(index))
                .count())
        })
    }

    pub fn has_page(&self, index: usize) -> bool {
        self.state.lock().pages.contains(index)
    }

    pub fn has_text_page(&self, index: usize) -> bool {
        self.state.lock().text_pages.contains(index)
    }

    pub fn has_search_handle(&self, index: usize) -> bool {
        self.state.lock().search_cursors.contains(index)
    }

    /// Cached page indices in ascending order
    pub fn cached_pages(&self) -> Vec<usize> {
        self.state.lock().pages.indices()
    }

    /// Release everything and close the document
    ///
    /// Never fails and may be called repeatedly. Engine release errors are
    /// logged and skipped.
    pub fn close(&self) {
        self.with_state(|ctx| {
            if ctx.state.doc.is_some() {
                ctx.close();
                info!(session = self.id.0, "Closed document");
            }
        })
    }

    pub fn page_width_pixels(&self, index: usize) -> Result<i32> {
        self.with_state(|ctx| {
            let page = ctx.ensure_page(index)?;
            Ok(ctx.engine.page_width_pixels(page, ctx.dpi))
        })
    }

    pub fn page_height_pixels(&self, index: usize) -> Result<i32> {
        self.with_state(|ctx| {
            let page = ctx.ensure_page(index)?;
            Ok(ctx.engine.page_height_pixels(page, ctx.dpi))
        })
    }

    pub fn page_width_points(&self, index: usize) -> Result<i32> {
        self.with_state(|ctx| {
            let page = ctx.ensure_page(index)?;
            Ok(ctx.engine.page_width_points(page))
        })
    }

    pub fn page_height_points(&self, index: usize) -> Result<i32> {
        self.with_state(|ctx| {
            let page = ctx.ensure_page(index)?;
            Ok(ctx.engine.page_height_points(page))
        })
    }

    /// Pixel size at the current DPI, without opening the page
    pub fn page_size(&self, index: usize) -> Result<PageSize> {
        self.with_state(|ctx| {
            let doc = ctx.doc()?;
            ctx.check_index(index)?;
            ctx.engine
                .page_size_by_index(doc, index as i32, ctx.dpi)
                .ok_or(CoreError::PageLoad(index))
        })
    }

    pub fn metadata(&self) -> Result<DocumentMeta> {
        self.with_state(|ctx| {
            let doc = ctx.doc()?;
            let mut meta = DocumentMeta::default();
            for key in MetaKey::ALL {
                meta.set(key, ctx.engine.metadata_field(doc, key));
            }
            Ok(meta)
        })
    }

    /// Link annotations of a page; links without a target are skipped
    pub fn page_links(&self, index: usize) -> Result<Vec<Link>> {
        self.with_state(|ctx| {
            let doc = ctx.doc()?;
            let page = ctx.ensure_page(index)?;
            let mut links = Vec::new();
            for link in ctx.engine.page_links(page) {
                let Some(rect) = ctx.engine.link_rect(link) else {
                    debug!(index, link = link.0, "Skipping link without bounds");
                    continue;
                };
                let destination = ctx.engine.link_destination(doc, link);
                let uri = ctx.engine.link_uri(doc, link);
                links.extend(Link::from_parts(Rect::from_ltrb(rect), destination, uri));
            }
            Ok(links)
        })
    }

    /// Draw a page region onto `surface` at the current DPI
    pub fn render_page(
        &self,
        index: usize,
        surface: &mut E::Surface,
        region: Viewport,
        annotations: bool,
    ) -> Result<()> {
        self.with_state(|ctx| {
            let page = ctx.ensure_page(index)?;
            ctx.engine
                .render_page(page, surface, ctx.dpi, region, annotations)
                .map_err(|e| CoreError::Render(e.to_string()))
        })
    }

    /// Map a page-space point into the viewport
    pub fn map_page_to_device(
        &self,
        index: usize,
        viewport: Viewport,
        rotation: Rotation,
        x: f64,
        y: f64,
    ) -> Result<DevicePoint> {
        self.with_state(|ctx| {
            let page = ctx.ensure_page(index)?;
            Ok(ctx.engine.page_to_device(page, viewport, rotation, x, y))
        })
    }

    /// Map a page-space rectangle corner by corner; the result is not normalized
    pub fn map_rect_to_device(
        &self,
        index: usize,
        viewport: Viewport,
        rotation: Rotation,
        rect: Rect,
    ) -> Result<DeviceRect> {
        self.with_state(|ctx| {
            let page = ctx.ensure_page(index)?;
            let top_left = ctx.engine.page_to_device(
                page,
                viewport,
                rotation,
                rect.left as f64,
                rect.top as f64,
            );
            let bottom_right = ctx.engine.page_to_device(
                page,
                viewport,
                rotation,
                rect.right as f64,
                rect.bottom as f64,
            );
            Ok(DeviceRect::from_corners(top_left, bottom_right))
        })
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        self.close();
    }
}
