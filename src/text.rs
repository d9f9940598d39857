//! Text extraction from text pages
//!
//! The engine writes UTF-16LE code units into caller buffers and reports how
//! many it wrote including a trailing terminator. [`Utf16Buffer`] owns that
//! convention; the `Session` methods below only decide sizes and ranges.

use serde::Serialize;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{CoreError, Result};
use crate::geometry::Rect;
use crate::session::Session;

/// Scratch buffer for one engine text call
#[derive(Debug)]
pub struct Utf16Buffer {
    units: Vec<u16>,
}

impl Utf16Buffer {
    /// Room for `length` units plus the terminator
    pub fn with_length(length: usize) -> Self {
        Self {
            units: vec![0; length + 1],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u16] {
        &mut self.units
    }

    /// Decode the first `written - 1` units, never reaching the terminator slot
    ///
    /// Returns `None` if they are not valid UTF-16.
    pub fn decode(&self, written: i32) -> Option<String> {
        let usable = usize::try_from(written)
            .unwrap_or(0)
            .saturating_sub(1)
            .min(self.units.len().saturating_sub(1));
        let units: Vec<u16> = self.units[..usable]
            .iter()
            .map(|u| u16::from_le(*u))
            .collect();
        match String::from_utf16(&units) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(error = %e, units = usable, "Discarding undecodable text");
                None
            }
        }
    }
}

/// Result of a hit test against a text page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "index")]
pub enum CharHit {
    Found(usize),
    /// No character within tolerance
    None,
    /// The engine reported an internal failure
    EngineError,
}

impl CharHit {
    fn from_engine(value: i32) -> Self {
        match value {
            v if v >= 0 => CharHit::Found(v as usize),
            -1 => CharHit::None,
            _ => CharHit::EngineError,
        }
    }
}

impl<E: Engine> Session<E> {
    /// Characters on a page's text layer, in UTF-16 code units
    pub fn count_characters(&self, index: usize) -> Result<usize> {
        self.with_state(|ctx| {
            let text_page = ctx.ensure_text_page(index)?;
            Ok(ctx.engine.count_chars(text_page).max(0) as usize)
        })
    }

    /// `length` characters starting at `start`
    ///
    /// Undecodable output yields an empty string.
    pub fn extract_range(&self, index: usize, start: usize, length: usize) -> Result<String> {
        self.with_state(|ctx| {
            let text_page = ctx.ensure_text_page(index)?;
            let count = ctx.engine.count_chars(text_page).max(0) as usize;
            if start.checked_add(length).map_or(true, |end| end > count) {
                return Err(CoreError::Range {
                    start,
                    length,
                    count,
                });
            }

            let mut buf = Utf16Buffer::with_length(length);
            let written =
                ctx.engine
                    .get_text(text_page, start as i32, length as i32, buf.as_mut_slice());
            Ok(buf.decode(written).unwrap_or_default())
        })
    }

    /// Whole text layer of a page
    pub fn extract_page_text(&self, index: usize) -> Result<String> {
        let count = self.count_characters(index)?;
        self.extract_range(index, 0, count)
    }

    /// Unicode scalar of one character; 0 when the glyph has no mapping
    pub fn character_unicode(&self, index: usize, char_index: usize) -> Result<u32> {
        self.with_state(|ctx| {
            let text_page = ctx.ensure_text_page(index)?;
            Ok(ctx.engine.char_unicode(text_page, char_index as i32))
        })
    }

    /// Bounding box of one character in page space
    pub fn character_box(&self, index: usize, char_index: usize) -> Result<Rect> {
        self.with_state(|ctx| {
            let text_page = ctx.ensure_text_page(index)?;
            Ok(Rect::from_char_box(
                ctx.engine.char_box(text_page, char_index as i32),
            ))
        })
    }

    /// Character at a page-space position, within the given tolerances
    pub fn character_index_at(
        &self,
        index: usize,
        x: f64,
        y: f64,
        x_tolerance: f64,
        y_tolerance: f64,
    ) -> Result<CharHit> {
        self.with_state(|ctx| {
            let text_page = ctx.ensure_text_page(index)?;
            let hit = ctx
                .engine
                .char_index_at_pos(text_page, x, y, x_tolerance, y_tolerance);
            Ok(CharHit::from_engine(hit))
        })
    }

    /// Number of rectangles covering `count` characters from `start`
    ///
    /// A negative engine result (failure) is reported as zero. The rectangles
    /// are then available through [`text_rect`](Self::text_rect).
    pub fn count_text_rects(&self, index: usize, start: usize, count: i32) -> Result<usize> {
        self.with_state(|ctx| {
            let text_page = ctx.ensure_text_page(index)?;
            Ok(ctx.engine.count_rects(text_page, start as i32, count).max(0) as usize)
        })
    }

    /// One rectangle from the last [`count_text_rects`](Self::count_text_rects)
    pub fn text_rect(&self, index: usize, rect_index: usize) -> Result<Option<Rect>> {
        self.with_state(|ctx| {
            let text_page = ctx.ensure_text_page(index)?;
            Ok(ctx
                .engine
                .get_rect(text_page, rect_index as i32)
                .map(Rect::from_ltrb))
        })
    }

    /// UTF-16 length of the text inside `rect`, as reported by the engine
    pub fn bounded_text_length(&self, index: usize, rect: Rect) -> Result<usize> {
        self.with_state(|ctx| {
            let text_page = ctx.ensure_text_page(index)?;
            let length = ctx.engine.bounded_text_length(
                text_page,
                rect.left as f64,
                rect.top as f64,
                rect.right as f64,
                rect.bottom as f64,
            );
            Ok(length.max(0) as usize)
        })
    }

    /// Text whose glyphs fall inside `rect`; `None` when there is none
    pub fn extract_bounded(&self, index: usize, rect: Rect) -> Result<Option<String>> {
        self.with_state(|ctx| {
            let text_page = ctx.ensure_text_page(index)?;
            let (left, top, right, bottom) = (
                rect.left as f64,
                rect.top as f64,
                rect.right as f64,
                rect.bottom as f64,
            );
            let length = ctx
                .engine
                .bounded_text_length(text_page, left, top, right, bottom);
            if length <= 0 {
                return Ok(None);
            }

            let mut buf = Utf16Buffer::with_length(length as usize);
            let written = ctx.engine.get_bounded_text(
                text_page,
                left,
                top,
                right,
                bottom,
                buf.as_mut_slice(),
            );
            Ok(buf.decode(written))
        })
    }
}
