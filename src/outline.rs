//! Outline (bookmark tree) materialization
//!
//! The engine exposes the outline as a linked chain: each node has a first
//! child and a next sibling. [`materialize`] walks that chain depth-first
//! (children before the next sibling) and builds an owned tree. The walk
//! refuses to loop: a node seen twice, nesting past `max_depth`, or more than
//! `max_nodes` entries all end in [`CoreError::MalformedOutline`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::engine::{Engine, RawBookmark, RawDocument};
use crate::error::{CoreError, Result};
use crate::session::Session;

/// One outline entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub title: String,
    /// Target page, `None` when the entry has no direct destination
    pub page_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Bookmark>,
}

impl Bookmark {
    /// This entry plus all descendants
    pub fn count(&self) -> usize {
        self.walk().count()
    }

    /// Pre-order traversal with nesting depth (0 for this entry)
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![(0, self)],
        }
    }
}

/// Pre-order iterator over a bookmark subtree
pub struct Walk<'a> {
    stack: Vec<(usize, &'a Bookmark)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a Bookmark);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.stack.pop()?;
        self.stack
            .extend(node.children.iter().rev().map(|child| (depth + 1, child)));
        Some((depth, node))
    }
}

/// All entries of a forest in pre-order, with depth
pub fn flatten(roots: &[Bookmark]) -> Vec<(usize, &Bookmark)> {
    roots.iter().flat_map(Bookmark::walk).collect()
}

/// Guards for outline traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlineLimits {
    pub max_depth: usize,
    pub max_nodes: usize,
}

impl From<&CoreConfig> for OutlineLimits {
    fn from(config: &CoreConfig) -> Self {
        Self {
            max_depth: config.max_outline_depth,
            max_nodes: config.max_outline_nodes,
        }
    }
}

impl Default for OutlineLimits {
    fn default() -> Self {
        Self::from(&CoreConfig::default())
    }
}

struct Walker<'e, E: Engine> {
    engine: &'e mut E,
    doc: RawDocument,
    limits: OutlineLimits,
    visited: HashSet<RawBookmark>,
}

/// One open level of the walk
struct Level {
    /// Bookmark owning this level; `None` for the outline root
    owner: Option<(RawBookmark, String, Option<usize>)>,
    children: Vec<Bookmark>,
    next: Option<RawBookmark>,
}

impl<'e, E: Engine> Walker<'e, E> {
    fn too_deep(&self) -> CoreError {
        CoreError::MalformedOutline(format!(
            "nesting deeper than {} levels",
            self.limits.max_depth
        ))
    }

    fn visit(&mut self, node: RawBookmark) -> Result<()> {
        if !self.visited.insert(node) {
            return Err(CoreError::MalformedOutline(format!(
                "cycle at bookmark {}",
                node.0
            )));
        }
        if self.visited.len() > self.limits.max_nodes {
            return Err(CoreError::MalformedOutline(format!(
                "more than {} bookmarks",
                self.limits.max_nodes
            )));
        }
        Ok(())
    }

    /// Pre-order walk on an explicit stack; the depth of a level is its stack position
    fn walk(&mut self) -> Result<Vec<Bookmark>> {
        let first = self.engine.first_child_bookmark(self.doc, None);
        if first.is_some() && self.limits.max_depth == 0 {
            return Err(self.too_deep());
        }
        let mut levels = vec![Level {
            owner: None,
            children: Vec::new(),
            next: first,
        }];

        loop {
            let depth = levels.len();
            let Some(level) = levels.last_mut() else {
                return Ok(Vec::new());
            };

            match level.next {
                Some(node) => {
                    self.visit(node)?;
                    let title = self.engine.bookmark_title(node);
                    let page_index =
                        usize::try_from(self.engine.bookmark_destination(self.doc, node)).ok();
                    let first_child = self.engine.first_child_bookmark(self.doc, Some(node));

                    match first_child {
                        Some(child) => {
                            if depth >= self.limits.max_depth {
                                return Err(self.too_deep());
                            }
                            levels.push(Level {
                                owner: Some((node, title, page_index)),
                                children: Vec::new(),
                                next: Some(child),
                            });
                        }
                        None => {
                            level.children.push(Bookmark {
                                title,
                                page_index,
                                children: Vec::new(),
                            });
                            level.next = self.engine.next_sibling_bookmark(self.doc, node);
                        }
                    }
                }
                None => {
                    let Some(done) = levels.pop() else {
                        return Ok(Vec::new());
                    };
                    let Some((node, title, page_index)) = done.owner else {
                        return Ok(done.children);
                    };
                    let next = self.engine.next_sibling_bookmark(self.doc, node);
                    if let Some(parent) = levels.last_mut() {
                        parent.children.push(Bookmark {
                            title,
                            page_index,
                            children: done.children,
                        });
                        parent.next = next;
                    }
                }
            }
        }
    }
}

/// Build the outline tree of `doc`
pub fn materialize<E: Engine>(
    engine: &mut E,
    doc: RawDocument,
    limits: OutlineLimits,
) -> Result<Vec<Bookmark>> {
    let mut walker = Walker {
        engine,
        doc,
        limits,
        visited: HashSet::new(),
    };
    walker.walk()
}

impl<E: Engine> Session<E> {
    /// Document outline as a tree
    pub fn table_of_contents(&self) -> Result<Vec<Bookmark>> {
        self.with_state(|ctx| {
            let doc = ctx.doc()?;
            let roots = materialize(&mut *ctx.engine, doc, ctx.limits)?;
            tracing::debug!(
                entries = roots.iter().map(Bookmark::count).sum::<usize>(),
                "Materialized outline"
            );
            Ok(roots)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PdfCore;
    use crate::engine::{
        FixtureBookmark, FixtureDocument, FixtureEngine, FixturePage, OutlineOverride,
    };

    fn open_outline(doc: FixtureDocument, limits: Option<CoreConfig>) -> Session<FixtureEngine> {
        let config = limits.unwrap_or_default();
        let core = PdfCore::with_config(FixtureEngine::new(), config);
        core.open(doc.with_page(FixturePage::letter()).to_bytes().unwrap(), None)
            .unwrap()
    }

    #[test]
    fn test_child_before_sibling() {
        let doc = FixtureDocument::new()
            .with_bookmark(
                FixtureBookmark::new("A", Some(0)).with_child(FixtureBookmark::new("A1", Some(0))),
            )
            .with_bookmark(FixtureBookmark::new("B", None));
        let session = open_outline(doc, None);

        let toc = session.table_of_contents().unwrap();
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].title, "A");
        assert_eq!(toc[0].children[0].title, "A1");
        assert_eq!(toc[1].title, "B");
        assert_eq!(toc[1].page_index, None);
        assert!(toc[1].children.is_empty());
    }

    #[test]
    fn test_node_count_and_preorder_preserved() {
        let doc = FixtureDocument::new()
            .with_bookmark(
                FixtureBookmark::new("1", Some(0))
                    .with_child(
                        FixtureBookmark::new("1.1", Some(0))
                            .with_child(FixtureBookmark::new("1.1.1", None)),
                    )
                    .with_child(FixtureBookmark::new("1.2", Some(0))),
            )
            .with_bookmark(FixtureBookmark::new("2", Some(0)));
        let session = open_outline(doc, None);

        let toc = session.table_of_contents().unwrap();
        let titles: Vec<(usize, &str)> = flatten(&toc)
            .into_iter()
            .map(|(depth, b)| (depth, b.title.as_str()))
            .collect();
        assert_eq!(
            titles,
            vec![(0, "1"), (1, "1.1"), (2, "1.1.1"), (1, "1.2"), (0, "2")]
        );
        assert_eq!(toc.iter().map(Bookmark::count).sum::<usize>(), 5);
    }

    #[test]
    fn test_empty_outline() {
        let session = open_outline(FixtureDocument::new(), None);
        assert!(session.table_of_contents().unwrap().is_empty());
    }

    #[test]
    fn test_sibling_cycle_is_malformed() {
        let mut doc = FixtureDocument::new()
            .with_bookmark(FixtureBookmark::new("A", Some(0)))
            .with_bookmark(FixtureBookmark::new("B", Some(0)));
        // B -> A
        doc.outline_overrides.push(OutlineOverride {
            node: 1,
            next_sibling: Some(0),
            first_child: None,
            end_of_chain: false,
        });
        let session = open_outline(doc, None);
        assert!(matches!(
            session.table_of_contents(),
            Err(CoreError::MalformedOutline(_))
        ));
    }

    #[test]
    fn test_child_cycle_is_malformed() {
        let mut doc = FixtureDocument::new().with_bookmark(FixtureBookmark::new("A", Some(0)));
        doc.outline_overrides.push(OutlineOverride {
            node: 0,
            next_sibling: None,
            first_child: Some(0),
            end_of_chain: false,
        });
        let session = open_outline(doc, None);
        assert!(matches!(
            session.table_of_contents(),
            Err(CoreError::MalformedOutline(_))
        ));
    }

    #[test]
    fn test_depth_and_node_limits() {
        let deep = FixtureBookmark::new("a", None).with_child(
            FixtureBookmark::new("b", None).with_child(FixtureBookmark::new("c", None)),
        );

        let config = CoreConfig {
            max_outline_depth: 2,
            ..CoreConfig::default()
        };
        let session = open_outline(
            FixtureDocument::new().with_bookmark(deep.clone()),
            Some(config),
        );
        let err = session.table_of_contents().unwrap_err();
        assert!(err.to_string().contains("deeper than 2"));

        let config = CoreConfig {
            max_outline_nodes: 2,
            ..CoreConfig::default()
        };
        let session = open_outline(FixtureDocument::new().with_bookmark(deep), Some(config));
        let err = session.table_of_contents().unwrap_err();
        assert!(err.to_string().contains("more than 2"));
    }

    #[test]
    fn test_deep_chain_with_unbounded_depth_limit() {
        // a flat list rewired into one chain of first children
        const DEPTH: usize = 2_000;
        let mut doc = FixtureDocument::new();
        for i in 0..DEPTH {
            doc = doc.with_bookmark(FixtureBookmark::new(&i.to_string(), None));
            doc.outline_overrides.push(OutlineOverride {
                node: i,
                next_sibling: None,
                first_child: (i + 1 < DEPTH).then_some(i + 1),
                end_of_chain: true,
            });
        }
        let config = CoreConfig {
            max_outline_depth: usize::MAX,
            ..CoreConfig::default()
        };
        let session = open_outline(doc, Some(config));

        let toc = session.table_of_contents().unwrap();
        assert_eq!(toc.len(), 1);
        let mut node = &toc[0];
        let mut depth = 1;
        while let Some(child) = node.children.first() {
            assert_eq!(node.children.len(), 1);
            node = child;
            depth += 1;
        }
        assert_eq!(depth, DEPTH);
        assert_eq!(node.title, (DEPTH - 1).to_string());
        assert_eq!(toc[0].count(), DEPTH);
    }

    #[test]
    fn test_walk_depths() {
        let tree = Bookmark {
            title: "root".into(),
            page_index: Some(0),
            children: vec![Bookmark {
                title: "leaf".into(),
                page_index: None,
                children: vec![],
            }],
        };
        let depths: Vec<usize> = tree.walk().map(|(d, _)| d).collect();
        assert_eq!(depths, vec![0, 1]);
        assert_eq!(tree.count(), 2);
    }
}
