//! External engine contract
//!
//! The PDF engine is an external, non-reentrant library that hands out
//! integer handles. This module describes its surface as the [`Engine`]
//! trait and provides the typed wrappers the session layer uses to manage
//! those handles.
//!
//! # Handle discipline
//!
//! Raw handles ([`RawDocument`], [`RawPage`], ...) are plain `Copy` values as
//! the engine issues them; zero and negative values are failure sentinels.
//! A handle the session keeps is wrapped in [`Live`], which:
//!
//! 1. can only be built from a non-sentinel value,
//! 2. is neither `Clone` nor `Copy`, so it has exactly one owner,
//! 3. is consumed by the matching release call.
//!
//! # Thread Safety
//!
//! Every method takes `&mut self`. The engine is only reachable through a
//! [`Monitor`] guard, so two calls can never overlap.

mod fixture;
mod monitor;

use std::fs::File;

use thiserror::Error;

use crate::geometry::{DevicePoint, PageSize, Rotation, Viewport};

pub use fixture::{
    FixtureAudit, FixtureBookmark, FixtureDocument, FixtureEngine, FixtureLink, FixturePage,
    FixtureSurface, HandleKind, OutlineOverride, Release, RenderRecord,
};
pub use monitor::{EngineGuard, Monitor};

/// Errors reported by the engine itself
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("password required or incorrect")]
    Password,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Handle unknown to the engine (released or never issued)
    #[error("invalid handle {0}")]
    InvalidHandle(i64),

    #[error("{0}")]
    Failure(String),
}

/// An engine-issued handle value
pub trait NativeHandle: Copy + Eq + std::fmt::Debug {
    fn as_raw(self) -> i64;

    /// Zero and negative values are sentinels, never live handles
    fn is_valid(self) -> bool {
        self.as_raw() > 0
    }
}

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub i64);

        impl NativeHandle for $name {
            fn as_raw(self) -> i64 {
                self.0
            }
        }
    };
}

raw_handle!(
    /// Document handle
    RawDocument
);
raw_handle!(
    /// Page handle, bound to one document
    RawPage
);
raw_handle!(
    /// Text-page handle, derived from a page
    RawTextPage
);
raw_handle!(
    /// Search-context handle, bound to one text page
    RawSearch
);
raw_handle!(
    /// Outline node, owned by the document (never released separately)
    RawBookmark
);
raw_handle!(
    /// Link annotation, owned by the page
    RawLink
);

/// Exclusive owner of a live engine handle
#[derive(Debug, PartialEq, Eq)]
pub struct Live<H: NativeHandle>(H);

impl<H: NativeHandle> Live<H> {
    /// Wrap a handle, rejecting sentinels
    pub fn new(raw: H) -> Option<Self> {
        raw.is_valid().then_some(Self(raw))
    }

    /// Raw value for an engine call made while the owner is locked
    pub fn get(&self) -> H {
        self.0
    }

    /// Give up ownership; the caller must release the value
    pub fn into_inner(self) -> H {
        self.0
    }
}

/// Source handed to the engine when opening a document
#[derive(Debug, Clone, Copy)]
pub enum DocumentInput<'a> {
    File(&'a File),
    Bytes(&'a [u8]),
}

/// Document information dictionary keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    Title,
    Author,
    Subject,
    Keywords,
    Creator,
    Producer,
    CreationDate,
    ModDate,
}

impl MetaKey {
    pub const ALL: [MetaKey; 8] = [
        MetaKey::Title,
        MetaKey::Author,
        MetaKey::Subject,
        MetaKey::Keywords,
        MetaKey::Creator,
        MetaKey::Producer,
        MetaKey::CreationDate,
        MetaKey::ModDate,
    ];

    /// Key as spelled in the info dictionary
    pub fn as_str(self) -> &'static str {
        match self {
            MetaKey::Title => "Title",
            MetaKey::Author => "Author",
            MetaKey::Subject => "Subject",
            MetaKey::Keywords => "Keywords",
            MetaKey::Creator => "Creator",
            MetaKey::Producer => "Producer",
            MetaKey::CreationDate => "CreationDate",
            MetaKey::ModDate => "ModDate",
        }
    }
}

/// The primitive operations of a non-reentrant PDF engine
///
/// Integer results follow the engine's conventions: counts are `i32`,
/// `-1` means "none", other negative values signal internal errors. Text
/// buffers are UTF-16LE code units; the `get_*text` calls return the number
/// of units written including the trailing terminator.
pub trait Engine: Send {
    /// Render sink (surface or bitmap); opaque to the session layer
    type Surface;

    // Document
    fn open_document(
        &mut self,
        input: DocumentInput<'_>,
        password: Option<&str>,
    ) -> Result<RawDocument, EngineError>;
    fn close_document(&mut self, doc: RawDocument) -> Result<(), EngineError>;
    fn page_count(&mut self, doc: RawDocument) -> i32;
    fn metadata_field(&mut self, doc: RawDocument, key: MetaKey) -> Option<String>;

    // Page
    fn load_page(&mut self, doc: RawDocument, index: i32) -> RawPage;
    /// Load `from..=to`; the result may contain sentinels
    fn load_pages(&mut self, doc: RawDocument, from: i32, to: i32) -> Vec<RawPage>;
    fn close_page(&mut self, page: RawPage) -> Result<(), EngineError>;
    fn page_width_pixels(&mut self, page: RawPage, dpi: u32) -> i32;
    fn page_height_pixels(&mut self, page: RawPage, dpi: u32) -> i32;
    fn page_width_points(&mut self, page: RawPage) -> i32;
    fn page_height_points(&mut self, page: RawPage) -> i32;
    /// Size without loading the page
    fn page_size_by_index(&mut self, doc: RawDocument, index: i32, dpi: u32) -> Option<PageSize>;
    fn page_links(&mut self, page: RawPage) -> Vec<RawLink>;
    fn link_destination(&mut self, doc: RawDocument, link: RawLink) -> Option<i32>;
    fn link_uri(&mut self, doc: RawDocument, link: RawLink) -> Option<String>;
    /// `[left, top, right, bottom]`
    fn link_rect(&mut self, link: RawLink) -> Option<[f64; 4]>;
    fn render_page(
        &mut self,
        page: RawPage,
        surface: &mut Self::Surface,
        dpi: u32,
        region: Viewport,
        annotations: bool,
    ) -> Result<(), EngineError>;
    fn page_to_device(
        &mut self,
        page: RawPage,
        viewport: Viewport,
        rotation: Rotation,
        page_x: f64,
        page_y: f64,
    ) -> DevicePoint;

    // Outline
    /// First child of `parent`, or of the outline root when `parent` is `None`
    fn first_child_bookmark(
        &mut self,
        doc: RawDocument,
        parent: Option<RawBookmark>,
    ) -> Option<RawBookmark>;
    fn next_sibling_bookmark(&mut self, doc: RawDocument, node: RawBookmark)
        -> Option<RawBookmark>;
    fn bookmark_title(&mut self, node: RawBookmark) -> String;
    /// Destination page index, `-1` when the node has no direct target
    fn bookmark_destination(&mut self, doc: RawDocument, node: RawBookmark) -> i64;

    // Text
    fn load_text_page(&mut self, page: RawPage) -> RawTextPage;
    fn close_text_page(&mut self, text_page: RawTextPage) -> Result<(), EngineError>;
    fn count_chars(&mut self, text_page: RawTextPage) -> i32;
    fn get_text(&mut self, text_page: RawTextPage, start: i32, count: i32, buf: &mut [u16]) -> i32;
    fn char_unicode(&mut self, text_page: RawTextPage, index: i32) -> u32;
    /// `[left, right, bottom, top]`
    fn char_box(&mut self, text_page: RawTextPage, index: i32) -> [f64; 4];
    fn char_index_at_pos(
        &mut self,
        text_page: RawTextPage,
        x: f64,
        y: f64,
        x_tolerance: f64,
        y_tolerance: f64,
    ) -> i32;
    fn count_rects(&mut self, text_page: RawTextPage, start: i32, count: i32) -> i32;
    /// `[left, top, right, bottom]` of a rectangle from the last `count_rects`
    fn get_rect(&mut self, text_page: RawTextPage, rect_index: i32) -> Option<[f64; 4]>;
    fn bounded_text_length(
        &mut self,
        text_page: RawTextPage,
        left: f64,
        top: f64,
        right: f64,
        bottom: f64,
    ) -> i32;
    #[allow(clippy::too_many_arguments)]
    fn get_bounded_text(
        &mut self,
        text_page: RawTextPage,
        left: f64,
        top: f64,
        right: f64,
        bottom: f64,
        buf: &mut [u16],
    ) -> i32;

    // Search
    fn search_start(
        &mut self,
        text_page: RawTextPage,
        query: &str,
        match_case: bool,
        match_whole_word: bool,
    ) -> RawSearch;
    fn search_stop(&mut self, search: RawSearch) -> Result<(), EngineError>;
    fn search_next(&mut self, search: RawSearch) -> bool;
    fn search_prev(&mut self, search: RawSearch) -> bool;
    fn search_result_char_index(&mut self, search: RawSearch) -> i32;
    fn search_result_count(&mut self, search: RawSearch) -> i32;
}
