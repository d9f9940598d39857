//! Document-level value types

use serde::{Deserialize, Serialize};

use crate::engine::MetaKey;
use crate::geometry::Rect;

/// Where a link leads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum LinkTarget {
    /// Zero-based page index inside the document
    Page(usize),
    /// External URI
    Uri(String),
}

/// Link annotation on a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub bounds: Rect,
    pub target: LinkTarget,
}

impl Link {
    /// Build from what the engine reports; a page destination wins over a URI
    pub fn from_parts(bounds: Rect, page: Option<i32>, uri: Option<String>) -> Option<Self> {
        let target = match (page.and_then(|p| usize::try_from(p).ok()), uri) {
            (Some(page), _) => LinkTarget::Page(page),
            (None, Some(uri)) if !uri.is_empty() => LinkTarget::Uri(uri),
            _ => return None,
        };
        Some(Self { bounds, target })
    }
}

/// Document information dictionary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub mod_date: Option<String>,
}

impl DocumentMeta {
    /// Set one field; empty values are treated as absent
    pub fn set(&mut self, key: MetaKey, value: Option<String>) {
        let value = value.filter(|v| !v.is_empty());
        let slot = match key {
            MetaKey::Title => &mut self.title,
            MetaKey::Author => &mut self.author,
            MetaKey::Subject => &mut self.subject,
            MetaKey::Keywords => &mut self.keywords,
            MetaKey::Creator => &mut self.creator,
            MetaKey::Producer => &mut self.producer,
            MetaKey::CreationDate => &mut self.creation_date,
            MetaKey::ModDate => &mut self.mod_date,
        };
        *slot = value;
    }

    pub fn get(&self, key: MetaKey) -> Option<&str> {
        match key {
            MetaKey::Title => self.title.as_deref(),
            MetaKey::Author => self.author.as_deref(),
            MetaKey::Subject => self.subject.as_deref(),
            MetaKey::Keywords => self.keywords.as_deref(),
            MetaKey::Creator => self.creator.as_deref(),
            MetaKey::Producer => self.producer.as_deref(),
            MetaKey::CreationDate => self.creation_date.as_deref(),
            MetaKey::ModDate => self.mod_date.as_deref(),
        }
    }
}
