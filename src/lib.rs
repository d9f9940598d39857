//! PDF core session layer
//!
//! Resource lifecycle and session management over a non-reentrant PDF
//! engine. The engine does the parsing, shaping and rasterizing; this crate
//! owns its handles, serializes access to it and turns its linked and
//! buffer-based outputs into owned values.
//!
//! # Modules
//!
//! - `engine`: the engine contract, raw handles, the serialization monitor
//!   and an in-memory fixture engine
//! - `session`: open documents and their page / text-page / search caches
//! - `outline`: bookmark chain to tree
//! - `text`: text extraction
//! - `search`: search cursors
//! - `geometry`: page and device coordinate types
//! - `service`: async facade on tokio's blocking pool
//!
//! # Example
//!
//! ```
//! use pdfcore_session::engine::{FixtureDocument, FixtureEngine, FixturePage};
//! use pdfcore_session::PdfCore;
//!
//! let core = PdfCore::new(FixtureEngine::new());
//! let bytes = FixtureDocument::new()
//!     .with_page(FixturePage::letter().with_text("Hello"))
//!     .to_bytes()
//!     .unwrap();
//! let session = core.open(bytes, None).unwrap();
//! assert_eq!(session.extract_page_text(0).unwrap(), "Hello");
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod outline;
pub mod search;
pub mod service;
pub mod session;
pub mod text;
pub mod types;

pub use config::CoreConfig;
pub use context::PdfCore;
pub use error::{CoreError, OpenError, Result};
pub use geometry::{DevicePoint, DeviceRect, PageSize, Rect, Rotation, Viewport};
pub use outline::{Bookmark, OutlineLimits};
pub use search::{CursorState, SearchCursor, SearchQuery};
pub use service::SessionService;
pub use session::{DocumentSource, HandleTable, PageHandle, Session, SessionId, TextPageHandle};
pub use text::CharHit;
pub use types::{DocumentMeta, Link, LinkTarget};
