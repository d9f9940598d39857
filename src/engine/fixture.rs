//! In-memory reference engine
//!
//! `FixtureEngine` implements the full [`Engine`] contract over documents
//! described as JSON ([`FixtureDocument`]). It lays text out on a fixed
//! monospace grid, so geometry is predictable, and it audits every handle it
//! issues: releasing or using an unknown handle is recorded as a violation
//! instead of being undefined behavior.
//!
//! Layout: glyphs start 72pt from the left and top edges, advance 6pt, are
//! 10pt tall, and lines are 12pt apart. A `'\n'` occupies a zero-width slot.
//! Character indices count UTF-16 code units; both halves of a surrogate pair
//! share one glyph box and only the leading half maps to a Unicode scalar.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};

use super::{
    DocumentInput, Engine, EngineError, MetaKey, RawBookmark, RawDocument, RawLink, RawPage,
    RawSearch, RawTextPage,
};
use crate::geometry::{DevicePoint, PageSize, Rotation, Viewport};

const MARGIN: f64 = 72.0;
const ADVANCE: f64 = 6.0;
const GLYPH_HEIGHT: f64 = 10.0;
const LINE_HEIGHT: f64 = 12.0;

/// Document description understood by the fixture engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureDocument {
    /// Required password, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Info dictionary entries keyed as in the PDF (`Title`, `Author`, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub pages: Vec<FixturePage>,
    /// Outline as a tree; flattened into a first-child/next-sibling chain
    #[serde(default)]
    pub outline: Vec<FixtureBookmark>,
    /// Chain patches applied after flattening (node ids are pre-order positions)
    #[serde(default)]
    pub outline_overrides: Vec<OutlineOverride>,
}

impl FixtureDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: FixturePage) -> Self {
        self.pages.push(page);
        self
    }

    pub fn with_bookmark(mut self, bookmark: FixtureBookmark) -> Self {
        self.outline.push(bookmark);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Serialize to the byte form accepted by `open_document`
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// One page of a fixture document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixturePage {
    /// Width in points
    pub width: f32,
    /// Height in points
    pub height: f32,
    /// Text layer content; `'\0'` marks a glyph without Unicode mapping
    #[serde(default)]
    pub text: String,
    /// `false` makes text-page derivation fail
    #[serde(default = "default_true")]
    pub text_layer: bool,
    /// `true` makes the engine refuse to load the page
    #[serde(default)]
    pub fail_load: bool,
    #[serde(default)]
    pub links: Vec<FixtureLink>,
}

fn default_true() -> bool {
    true
}

impl FixturePage {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            text: String::new(),
            text_layer: true,
            fail_load: false,
            links: Vec::new(),
        }
    }

    /// US Letter page
    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_link(mut self, link: FixtureLink) -> Self {
        self.links.push(link);
        self
    }

    pub fn without_text_layer(mut self) -> Self {
        self.text_layer = false;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_load = true;
        self
    }
}

/// Link annotation; `rect` is `[left, top, right, bottom]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureLink {
    pub rect: [f64; 4],
    #[serde(default)]
    pub page: Option<i32>,
    #[serde(default)]
    pub uri: Option<String>,
}

/// Outline entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureBookmark {
    pub title: String,
    #[serde(default)]
    pub page: Option<i32>,
    #[serde(default)]
    pub children: Vec<FixtureBookmark>,
}

impl FixtureBookmark {
    pub fn new(title: &str, page: Option<i32>) -> Self {
        Self {
            title: title.to_string(),
            page,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: FixtureBookmark) -> Self {
        self.children.push(child);
        self
    }
}

/// Rewires one node of the flattened outline chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineOverride {
    pub node: usize,
    #[serde(default)]
    pub next_sibling: Option<usize>,
    #[serde(default)]
    pub first_child: Option<usize>,
    /// Drop the node's next sibling
    #[serde(default)]
    pub end_of_chain: bool,
}

/// Kind of engine handle, for the release log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Document,
    Page,
    TextPage,
    Search,
}

/// One successful release, in call order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    pub kind: HandleKind,
    pub handle: i64,
}

/// Snapshot of the engine's handle bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureAudit {
    /// Live documents
    pub documents: usize,
    /// Live pages
    pub pages: usize,
    /// Live text pages
    pub text_pages: usize,
    /// Live search contexts
    pub searches: usize,
    /// Most search contexts live at the same time
    pub peak_searches: usize,
    /// Calls made with released or never-issued handles
    pub violations: usize,
    /// Pages loaded so far (single and ranged loads)
    pub page_loads: usize,
    /// Text pages derived so far
    pub text_page_loads: usize,
}

impl FixtureAudit {
    /// No live handle of any kind
    pub fn is_clean(&self) -> bool {
        self.documents == 0 && self.pages == 0 && self.text_pages == 0 && self.searches == 0
    }
}

/// One `render_page` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRecord {
    pub page_index: usize,
    pub dpi: u32,
    pub region: Viewport,
    pub annotations: bool,
}

/// Render sink that records what was drawn
#[derive(Debug, Clone, Default)]
pub struct FixtureSurface {
    pub records: Vec<RenderRecord>,
}

#[derive(Debug)]
struct OutlineNode {
    title: String,
    destination: i64,
    first_child: Option<usize>,
    next_sibling: Option<usize>,
}

#[derive(Debug)]
struct DocState {
    doc: FixtureDocument,
    nodes: Vec<OutlineNode>,
    root_first: Option<usize>,
    node_handles: Vec<i64>,
}

#[derive(Debug)]
struct PageState {
    doc: i64,
    index: usize,
    links: Vec<i64>,
}

/// One UTF-16 code unit of the text layer
#[derive(Debug, Clone, Copy)]
struct Glyph {
    unit: u16,
    /// Set on BMP units and leading surrogates, `None` on trailing surrogates
    scalar: Option<char>,
    /// `[left, right, bottom, top]`
    bbox: [f64; 4],
}

const NEWLINE: u16 = b'\n' as u16;

impl Glyph {
    fn is_newline(&self) -> bool {
        self.unit == NEWLINE
    }

    fn center(&self) -> (f64, f64) {
        (
            (self.bbox[0] + self.bbox[1]) / 2.0,
            (self.bbox[2] + self.bbox[3]) / 2.0,
        )
    }
}

#[derive(Debug)]
struct TextState {
    glyphs: Vec<Glyph>,
    last_rects: Vec<[f64; 4]>,
}

#[derive(Debug)]
struct SearchState {
    matches: Vec<usize>,
    /// Index into `matches`; `None` before the first advance
    cursor: Option<usize>,
}

/// Auditing in-memory engine
#[derive(Debug)]
pub struct FixtureEngine {
    next_handle: i64,
    documents: HashMap<i64, DocState>,
    pages: HashMap<i64, PageState>,
    links: HashMap<i64, (i64, usize, usize)>,
    text_pages: HashMap<i64, TextState>,
    searches: HashMap<i64, SearchState>,
    bookmarks: HashMap<i64, (i64, usize)>,
    failing_releases: Vec<HandleKind>,
    violations: Vec<String>,
    releases: Vec<Release>,
    page_loads: usize,
    text_page_loads: usize,
    peak_searches: usize,
}

impl Default for FixtureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureEngine {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            documents: HashMap::new(),
            pages: HashMap::new(),
            links: HashMap::new(),
            text_pages: HashMap::new(),
            searches: HashMap::new(),
            bookmarks: HashMap::new(),
            failing_releases: Vec::new(),
            violations: Vec::new(),
            releases: Vec::new(),
            page_loads: 0,
            text_page_loads: 0,
            peak_searches: 0,
        }
    }

    /// Current handle bookkeeping
    pub fn audit(&self) -> FixtureAudit {
        FixtureAudit {
            documents: self.documents.len(),
            pages: self.pages.len(),
            text_pages: self.text_pages.len(),
            searches: self.searches.len(),
            peak_searches: self.peak_searches,
            violations: self.violations.len(),
            page_loads: self.page_loads,
            text_page_loads: self.text_page_loads,
        }
    }

    /// Descriptions of every recorded violation
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Successful releases in call order
    pub fn release_log(&self) -> &[Release] {
        &self.releases
    }

    /// Make releases of `kind` report an engine failure (the handle stays live)
    pub fn fail_releases(&mut self, kind: HandleKind) {
        self.failing_releases.push(kind);
    }

    fn issue(&mut self) -> i64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn violation(&mut self, what: String) {
        tracing::debug!(violation = %what, "Fixture engine violation");
        self.violations.push(what);
    }

    fn release_failure(&self, kind: HandleKind, handle: i64) -> Result<(), EngineError> {
        if self.failing_releases.contains(&kind) {
            return Err(EngineError::Failure(format!(
                "injected release failure for {:?} {}",
                kind, handle
            )));
        }
        Ok(())
    }

    fn doc_state(&mut self, doc: RawDocument, op: &str) -> Option<&DocState> {
        if !self.documents.contains_key(&doc.0) {
            self.violation(format!("{} on unknown document {}", op, doc.0));
            return None;
        }
        self.documents.get(&doc.0)
    }

    fn described_page(&mut self, page: RawPage, op: &str) -> Option<FixturePage> {
        let Some(state) = self.pages.get(&page.0) else {
            self.violation(format!("{} on unknown page {}", op, page.0));
            return None;
        };
        let (doc, index) = (state.doc, state.index);
        self.documents
            .get(&doc)
            .and_then(|d| d.doc.pages.get(index))
            .cloned()
    }

    fn text_state(&mut self, text_page: RawTextPage, op: &str) -> Option<&mut TextState> {
        if !self.text_pages.contains_key(&text_page.0) {
            self.violation(format!("{} on unknown text page {}", op, text_page.0));
            return None;
        }
        self.text_pages.get_mut(&text_page.0)
    }

    fn glyph(&mut self, text_page: RawTextPage, index: i32, op: &str) -> Option<Glyph> {
        let state = self.text_state(text_page, op)?;
        usize::try_from(index)
            .ok()
            .and_then(|i| state.glyphs.get(i))
            .copied()
    }

    fn search_state(&mut self, search: RawSearch, op: &str) -> Option<&mut SearchState> {
        if !self.searches.contains_key(&search.0) {
            self.violation(format!("{} on unknown search {}", op, search.0));
            return None;
        }
        self.searches.get_mut(&search.0)
    }

    fn parse_document(
        input: DocumentInput<'_>,
        password: Option<&str>,
    ) -> Result<FixtureDocument, EngineError> {
        let data = match input {
            DocumentInput::Bytes(bytes) => bytes.to_vec(),
            DocumentInput::File(file) => {
                let mut reader = file;
                let mut data = Vec::new();
                reader.seek(SeekFrom::Start(0))?;
                reader.read_to_end(&mut data)?;
                data
            }
        };

        let doc: FixtureDocument = serde_json::from_slice(&data)
            .map_err(|e| EngineError::InvalidFormat(e.to_string()))?;

        if let Some(required) = &doc.password {
            if password != Some(required.as_str()) {
                return Err(EngineError::Password);
            }
        }
        Ok(doc)
    }

    fn load_one(&mut self, doc: RawDocument, index: i32) -> RawPage {
        let Some(state) = self.doc_state(doc, "load_page") else {
            return RawPage(0);
        };
        let desc = usize::try_from(index)
            .ok()
            .and_then(|i| state.doc.pages.get(i).map(|p| (i, p.fail_load, p.links.len())));
        let Some((index, fail_load, link_count)) = desc else {
            return RawPage(0);
        };
        if fail_load {
            return RawPage(0);
        }

        let handle = self.issue();
        let mut links = Vec::with_capacity(link_count);
        for link_index in 0..link_count {
            let link = self.issue();
            self.links.insert(link, (doc.0, index, link_index));
            links.push(link);
        }
        self.pages.insert(
            handle,
            PageState {
                doc: doc.0,
                index,
                links,
            },
        );
        self.page_loads += 1;
        RawPage(handle)
    }

    fn described_link(&mut self, link: RawLink) -> Option<FixtureLink> {
        let Some(&(doc, page, link_index)) = self.links.get(&link.0) else {
            self.violation(format!("link query on unknown link {}", link.0));
            return None;
        };
        self.documents
            .get(&doc)
            .and_then(|d| d.doc.pages.get(page))
            .and_then(|p| p.links.get(link_index))
            .cloned()
    }

    fn write_units(glyphs: &[Glyph], buf: &mut [u16]) -> i32 {
        if buf.is_empty() {
            return 0;
        }
        let written = glyphs.len().min(buf.len() - 1);
        for (slot, glyph) in buf.iter_mut().zip(&glyphs[..written]) {
            *slot = glyph.unit.to_le();
        }
        buf[written] = 0;
        (written + 1) as i32
    }

    fn bounded<'a>(
        glyphs: &'a [Glyph],
        left: f64,
        top: f64,
        right: f64,
        bottom: f64,
    ) -> impl Iterator<Item = &'a Glyph> + 'a {
        let (lo_x, hi_x) = (left.min(right), left.max(right));
        let (lo_y, hi_y) = (bottom.min(top), bottom.max(top));
        glyphs.iter().filter(move |g| {
            let (cx, cy) = g.center();
            cx >= lo_x && cx <= hi_x && cy >= lo_y && cy <= hi_y
        })
    }
}

fn flatten_outline(items: &[FixtureBookmark], nodes: &mut Vec<OutlineNode>) -> Option<usize> {
    let mut first = None;
    let mut previous: Option<usize> = None;
    for item in items {
        let id = nodes.len();
        nodes.push(OutlineNode {
            title: item.title.clone(),
            destination: item.page.map(i64::from).unwrap_or(-1),
            first_child: None,
            next_sibling: None,
        });
        let child = flatten_outline(&item.children, nodes);
        nodes[id].first_child = child;
        match previous {
            Some(prev) => nodes[prev].next_sibling = Some(id),
            None => first = Some(id),
        }
        previous = Some(id);
    }
    first
}

fn layout(page: &FixturePage) -> Vec<Glyph> {
    let height = page.height as f64;
    let mut glyphs = Vec::with_capacity(page.text.encode_utf16().count());
    let (mut line, mut column) = (0.0, 0.0);
    let mut units = [0u16; 2];
    for ch in page.text.chars() {
        let left = MARGIN + column * ADVANCE;
        let top = height - MARGIN - line * LINE_HEIGHT;
        let width = if ch == '\n' { 0.0 } else { ADVANCE };
        let bbox = [left, left + width, top - GLYPH_HEIGHT, top];
        // both halves of a surrogate pair share the glyph box
        for (i, &unit) in ch.encode_utf16(&mut units).iter().enumerate() {
            glyphs.push(Glyph {
                unit,
                scalar: (i == 0).then_some(ch),
                bbox,
            });
        }
        if ch == '\n' {
            line += 1.0;
            column = 0.0;
        } else {
            column += 1.0;
        }
    }
    glyphs
}

fn find_matches(glyphs: &[Glyph], query: &str, match_case: bool, whole_word: bool) -> Vec<usize> {
    let needle: Vec<u16> = query.encode_utf16().collect();
    if needle.is_empty() || needle.len() > glyphs.len() {
        return Vec::new();
    }
    let same = |a: u16, b: u16| {
        if match_case {
            a == b
        } else {
            fold_case(a) == fold_case(b)
        }
    };
    let is_word = |i: usize| {
        let scalar = match glyphs[i].scalar {
            Some(c) => Some(c),
            None if i > 0 => glyphs[i - 1].scalar,
            None => None,
        };
        scalar.is_some_and(|c| c.is_alphanumeric() || c == '_')
    };

    (0..=glyphs.len() - needle.len())
        .filter(|&start| {
            needle
                .iter()
                .enumerate()
                .all(|(i, &unit)| same(glyphs[start + i].unit, unit))
        })
        .filter(|&start| {
            if !whole_word {
                return true;
            }
            let end = start + needle.len();
            let before = start == 0 || !is_word(start - 1);
            let after = end == glyphs.len() || !is_word(end);
            before && after
        })
        .collect()
}

/// Lowercase a BMP unit when its lowercase form is a single BMP unit
fn fold_case(unit: u16) -> u16 {
    let Some(c) = char::from_u32(u32::from(unit)) else {
        return unit;
    };
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) if l.len_utf16() == 1 => l as u16,
        _ => unit,
    }
}

fn to_pixels(points: f32, dpi: u32) -> i32 {
    (points as f64 * dpi as f64 / 72.0).round() as i32
}

impl Engine for FixtureEngine {
    type Surface = FixtureSurface;

    fn open_document(
        &mut self,
        input: DocumentInput<'_>,
        password: Option<&str>,
    ) -> Result<RawDocument, EngineError> {
        let doc = Self::parse_document(input, password)?;

        let mut nodes = Vec::new();
        let root_first = flatten_outline(&doc.outline, &mut nodes);
        for patch in &doc.outline_overrides {
            if let Some(node) = nodes.get_mut(patch.node) {
                if patch.next_sibling.is_some() {
                    node.next_sibling = patch.next_sibling;
                }
                if patch.first_child.is_some() {
                    node.first_child = patch.first_child;
                }
                if patch.end_of_chain {
                    node.next_sibling = None;
                }
            }
        }

        let handle = self.issue();
        let mut node_handles = Vec::with_capacity(nodes.len());
        for node in 0..nodes.len() {
            let bookmark = self.issue();
            self.bookmarks.insert(bookmark, (handle, node));
            node_handles.push(bookmark);
        }

        self.documents.insert(
            handle,
            DocState {
                doc,
                nodes,
                root_first,
                node_handles,
            },
        );
        Ok(RawDocument(handle))
    }

    fn close_document(&mut self, doc: RawDocument) -> Result<(), EngineError> {
        if !self.documents.contains_key(&doc.0) {
            self.violation(format!("close_document on unknown document {}", doc.0));
            return Err(EngineError::InvalidHandle(doc.0));
        }
        self.release_failure(HandleKind::Document, doc.0)?;
        if let Some(state) = self.documents.remove(&doc.0) {
            for bookmark in state.node_handles {
                self.bookmarks.remove(&bookmark);
            }
        }
        self.releases.push(Release {
            kind: HandleKind::Document,
            handle: doc.0,
        });
        Ok(())
    }

    fn page_count(&mut self, doc: RawDocument) -> i32 {
        self.doc_state(doc, "page_count")
            .map(|s| s.doc.pages.len() as i32)
            .unwrap_or(0)
    }

    fn metadata_field(&mut self, doc: RawDocument, key: MetaKey) -> Option<String> {
        self.doc_state(doc, "metadata_field")
            .and_then(|s| s.doc.metadata.get(key.as_str()).cloned())
    }

    fn load_page(&mut self, doc: RawDocument, index: i32) -> RawPage {
        self.load_one(doc, index)
    }

    fn load_pages(&mut self, doc: RawDocument, from: i32, to: i32) -> Vec<RawPage> {
        if from > to {
            return Vec::new();
        }
        (from..=to).map(|index| self.load_one(doc, index)).collect()
    }

    fn close_page(&mut self, page: RawPage) -> Result<(), EngineError> {
        if !self.pages.contains_key(&page.0) {
            self.violation(format!("close_page on unknown page {}", page.0));
            return Err(EngineError::InvalidHandle(page.0));
        }
        self.release_failure(HandleKind::Page, page.0)?;
        if let Some(state) = self.pages.remove(&page.0) {
            for link in state.links {
                self.links.remove(&link);
            }
        }
        self.releases.push(Release {
            kind: HandleKind::Page,
            handle: page.0,
        });
        Ok(())
    }

    fn page_width_pixels(&mut self, page: RawPage, dpi: u32) -> i32 {
        self.described_page(page, "page_width_pixels")
            .map(|p| to_pixels(p.width, dpi))
            .unwrap_or(0)
    }

    fn page_height_pixels(&mut self, page: RawPage, dpi: u32) -> i32 {
        self.described_page(page, "page_height_pixels")
            .map(|p| to_pixels(p.height, dpi))
            .unwrap_or(0)
    }

    fn page_width_points(&mut self, page: RawPage) -> i32 {
        self.described_page(page, "page_width_points")
            .map(|p| p.width.round() as i32)
            .unwrap_or(0)
    }

    fn page_height_points(&mut self, page: RawPage) -> i32 {
        self.described_page(page, "page_height_points")
            .map(|p| p.height.round() as i32)
            .unwrap_or(0)
    }

    fn page_size_by_index(&mut self, doc: RawDocument, index: i32, dpi: u32) -> Option<PageSize> {
        let state = self.doc_state(doc, "page_size_by_index")?;
        let page = usize::try_from(index).ok().and_then(|i| state.doc.pages.get(i))?;
        Some(PageSize {
            width: to_pixels(page.width, dpi),
            height: to_pixels(page.height, dpi),
        })
    }

    fn page_links(&mut self, page: RawPage) -> Vec<RawLink> {
        match self.pages.get(&page.0) {
            Some(state) => state.links.iter().map(|&l| RawLink(l)).collect(),
            None => {
                self.violation(format!("page_links on unknown page {}", page.0));
                Vec::new()
            }
        }
    }

    fn link_destination(&mut self, _doc: RawDocument, link: RawLink) -> Option<i32> {
        self.described_link(link).and_then(|l| l.page)
    }

    fn link_uri(&mut self, _doc: RawDocument, link: RawLink) -> Option<String> {
        self.described_link(link).and_then(|l| l.uri)
    }

    fn link_rect(&mut self, link: RawLink) -> Option<[f64; 4]> {
        self.described_link(link).map(|l| l.rect)
    }

    fn render_page(
        &mut self,
        page: RawPage,
        surface: &mut FixtureSurface,
        dpi: u32,
        region: Viewport,
        annotations: bool,
    ) -> Result<(), EngineError> {
        let Some(page_index) = self.pages.get(&page.0).map(|s| s.index) else {
            self.violation(format!("render_page on unknown page {}", page.0));
            return Err(EngineError::InvalidHandle(page.0));
        };
        if region.width <= 0 || region.height <= 0 {
            return Err(EngineError::Failure(format!(
                "empty render region {}x{}",
                region.width, region.height
            )));
        }
        surface.records.push(RenderRecord {
            page_index,
            dpi,
            region,
            annotations,
        });
        Ok(())
    }

    fn page_to_device(
        &mut self,
        page: RawPage,
        viewport: Viewport,
        rotation: Rotation,
        page_x: f64,
        page_y: f64,
    ) -> DevicePoint {
        let Some(desc) = self.described_page(page, "page_to_device") else {
            return DevicePoint { x: 0, y: 0 };
        };
        // Normalized coordinates with a top-left origin
        let u = page_x / desc.width as f64;
        let v = (desc.height as f64 - page_y) / desc.height as f64;
        let (nx, ny) = match rotation {
            Rotation::None => (u, v),
            Rotation::Clockwise90 => (1.0 - v, u),
            Rotation::Half => (1.0 - u, 1.0 - v),
            Rotation::CounterClockwise90 => (v, 1.0 - u),
        };
        DevicePoint {
            x: viewport.x + (nx * viewport.width as f64).round() as i32,
            y: viewport.y + (ny * viewport.height as f64).round() as i32,
        }
    }

    fn first_child_bookmark(
        &mut self,
        doc: RawDocument,
        parent: Option<RawBookmark>,
    ) -> Option<RawBookmark> {
        let node = match parent {
            None => self.doc_state(doc, "first_child_bookmark")?.root_first,
            Some(parent) => {
                let Some(&(owner, node)) = self.bookmarks.get(&parent.0) else {
                    self.violation(format!("first_child_bookmark on unknown node {}", parent.0));
                    return None;
                };
                let state = self.documents.get(&owner)?;
                state.nodes.get(node).and_then(|n| n.first_child)
            }
        }?;
        self.documents
            .get(&doc.0)
            .and_then(|s| s.node_handles.get(node))
            .map(|&h| RawBookmark(h))
    }

    fn next_sibling_bookmark(
        &mut self,
        doc: RawDocument,
        node: RawBookmark,
    ) -> Option<RawBookmark> {
        let Some(&(owner, index)) = self.bookmarks.get(&node.0) else {
            self.violation(format!("next_sibling_bookmark on unknown node {}", node.0));
            return None;
        };
        let state = self.documents.get(&owner)?;
        let sibling = state.nodes.get(index).and_then(|n| n.next_sibling)?;
        self.documents
            .get(&doc.0)
            .and_then(|s| s.node_handles.get(sibling))
            .map(|&h| RawBookmark(h))
    }

    fn bookmark_title(&mut self, node: RawBookmark) -> String {
        let Some(&(owner, index)) = self.bookmarks.get(&node.0) else {
            self.violation(format!("bookmark_title on unknown node {}", node.0));
            return String::new();
        };
        self.documents
            .get(&owner)
            .and_then(|s| s.nodes.get(index))
            .map(|n| n.title.clone())
            .unwrap_or_default()
    }

    fn bookmark_destination(&mut self, _doc: RawDocument, node: RawBookmark) -> i64 {
        let Some(&(owner, index)) = self.bookmarks.get(&node.0) else {
            self.violation(format!("bookmark_destination on unknown node {}", node.0));
            return -1;
        };
        self.documents
            .get(&owner)
            .and_then(|s| s.nodes.get(index))
            .map(|n| n.destination)
            .unwrap_or(-1)
    }

    fn load_text_page(&mut self, page: RawPage) -> RawTextPage {
        let Some(desc) = self.described_page(page, "load_text_page") else {
            return RawTextPage(0);
        };
        if !desc.text_layer {
            return RawTextPage(-1);
        }
        let handle = self.issue();
        self.text_pages.insert(
            handle,
            TextState {
                glyphs: layout(&desc),
                last_rects: Vec::new(),
            },
        );
        self.text_page_loads += 1;
        RawTextPage(handle)
    }

    fn close_text_page(&mut self, text_page: RawTextPage) -> Result<(), EngineError> {
        if !self.text_pages.contains_key(&text_page.0) {
            self.violation(format!("close_text_page on unknown text page {}", text_page.0));
            return Err(EngineError::InvalidHandle(text_page.0));
        }
        self.release_failure(HandleKind::TextPage, text_page.0)?;
        self.text_pages.remove(&text_page.0);
        self.releases.push(Release {
            kind: HandleKind::TextPage,
            handle: text_page.0,
        });
        Ok(())
    }

    fn count_chars(&mut self, text_page: RawTextPage) -> i32 {
        self.text_state(text_page, "count_chars")
            .map(|s| s.glyphs.len() as i32)
            .unwrap_or(-1)
    }

    fn get_text(&mut self, text_page: RawTextPage, start: i32, count: i32, buf: &mut [u16]) -> i32 {
        let Some(state) = self.text_state(text_page, "get_text") else {
            return 0;
        };
        let (Ok(start), Ok(count)) = (usize::try_from(start), usize::try_from(count)) else {
            return 0;
        };
        if start > state.glyphs.len() {
            return 0;
        }
        let end = (start + count).min(state.glyphs.len());
        Self::write_units(&state.glyphs[start..end], buf)
    }

    fn char_unicode(&mut self, text_page: RawTextPage, index: i32) -> u32 {
        self.glyph(text_page, index, "char_unicode")
            .and_then(|g| g.scalar)
            .map(u32::from)
            .unwrap_or(0)
    }

    fn char_box(&mut self, text_page: RawTextPage, index: i32) -> [f64; 4] {
        self.glyph(text_page, index, "char_box")
            .map(|g| g.bbox)
            .unwrap_or([0.0; 4])
    }

    fn char_index_at_pos(
        &mut self,
        text_page: RawTextPage,
        x: f64,
        y: f64,
        x_tolerance: f64,
        y_tolerance: f64,
    ) -> i32 {
        let Some(state) = self.text_state(text_page, "char_index_at_pos") else {
            return -3;
        };
        state
            .glyphs
            .iter()
            .position(|g| {
                let [left, right, bottom, top] = g.bbox;
                !g.is_newline()
                    && x >= left - x_tolerance
                    && x <= right + x_tolerance
                    && y >= bottom - y_tolerance
                    && y <= top + y_tolerance
            })
            .map(|i| i as i32)
            .unwrap_or(-1)
    }

    fn count_rects(&mut self, text_page: RawTextPage, start: i32, count: i32) -> i32 {
        let Some(state) = self.text_state(text_page, "count_rects") else {
            return -1;
        };
        let Ok(start) = usize::try_from(start) else {
            return 0;
        };
        let len = state.glyphs.len();
        let end = if count < 0 {
            len
        } else {
            (start + count as usize).min(len)
        };

        let mut rects: Vec<[f64; 4]> = Vec::new();
        let mut current: Option<[f64; 4]> = None;
        for glyph in state.glyphs.get(start..end).unwrap_or(&[]) {
            let [left, right, bottom, top] = glyph.bbox;
            if glyph.is_newline() {
                rects.extend(current.take());
                continue;
            }
            current = match current {
                // same line: extend to the right
                Some([l, t, _, b]) if b == bottom => Some([l, t, right, b]),
                Some(done) => {
                    rects.push(done);
                    Some([left, top, right, bottom])
                }
                None => Some([left, top, right, bottom]),
            };
        }
        rects.extend(current);

        let n = rects.len() as i32;
        state.last_rects = rects;
        n
    }

    fn get_rect(&mut self, text_page: RawTextPage, rect_index: i32) -> Option<[f64; 4]> {
        let state = self.text_state(text_page, "get_rect")?;
        usize::try_from(rect_index)
            .ok()
            .and_then(|i| state.last_rects.get(i))
            .copied()
    }

    fn bounded_text_length(
        &mut self,
        text_page: RawTextPage,
        left: f64,
        top: f64,
        right: f64,
        bottom: f64,
    ) -> i32 {
        let Some(state) = self.text_state(text_page, "bounded_text_length") else {
            return 0;
        };
        Self::bounded(&state.glyphs, left, top, right, bottom).count() as i32
    }

    fn get_bounded_text(
        &mut self,
        text_page: RawTextPage,
        left: f64,
        top: f64,
        right: f64,
        bottom: f64,
        buf: &mut [u16],
    ) -> i32 {
        let Some(state) = self.text_state(text_page, "get_bounded_text") else {
            return 0;
        };
        let glyphs: Vec<Glyph> = Self::bounded(&state.glyphs, left, top, right, bottom)
            .copied()
            .collect();
        Self::write_units(&glyphs, buf)
    }

    fn search_start(
        &mut self,
        text_page: RawTextPage,
        query: &str,
        match_case: bool,
        match_whole_word: bool,
    ) -> RawSearch {
        let Some(state) = self.text_state(text_page, "search_start") else {
            return RawSearch(0);
        };
        let matches = find_matches(&state.glyphs, query, match_case, match_whole_word);
        let handle = self.issue();
        self.searches.insert(
            handle,
            SearchState {
                matches,
                cursor: None,
            },
        );
        self.peak_searches = self.peak_searches.max(self.searches.len());
        RawSearch(handle)
    }

    fn search_stop(&mut self, search: RawSearch) -> Result<(), EngineError> {
        if !self.searches.contains_key(&search.0) {
            self.violation(format!("search_stop on unknown search {}", search.0));
            return Err(EngineError::InvalidHandle(search.0));
        }
        self.release_failure(HandleKind::Search, search.0)?;
        self.searches.remove(&search.0);
        self.releases.push(Release {
            kind: HandleKind::Search,
            handle: search.0,
        });
        Ok(())
    }

    fn search_next(&mut self, search: RawSearch) -> bool {
        let Some(state) = self.search_state(search, "search_next") else {
            return false;
        };
        let next = state.cursor.map(|c| c + 1).unwrap_or(0);
        if next < state.matches.len() {
            state.cursor = Some(next);
            true
        } else {
            false
        }
    }

    fn search_prev(&mut self, search: RawSearch) -> bool {
        let Some(state) = self.search_state(search, "search_prev") else {
            return false;
        };
        match state.cursor {
            Some(c) if c > 0 => {
                state.cursor = Some(c - 1);
                true
            }
            _ => false,
        }
    }

    fn search_result_char_index(&mut self, search: RawSearch) -> i32 {
        let Some(state) = self.search_state(search, "search_result_char_index") else {
            return -1;
        };
        match state.cursor.and_then(|c| state.matches.get(c)) {
            Some(&char_index) => char_index as i32,
            None => -1,
        }
    }

    fn search_result_count(&mut self, search: RawSearch) -> i32 {
        self.search_state(search, "search_result_count")
            .map(|s| s.matches.len() as i32)
            .unwrap_or(0)
    }
}
