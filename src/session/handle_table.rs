//! Page-index keyed cache of live engine handles

use std::collections::HashMap;

use crate::engine::{Live, NativeHandle};

/// Map from zero-based page index to one owned engine handle
///
/// The table never talks to the engine. Whatever it hands back from
/// [`put`](Self::put), [`remove`](Self::remove) or [`drain`](Self::drain)
/// must be released by the caller.
#[derive(Debug)]
pub struct HandleTable<H: NativeHandle> {
    entries: HashMap<usize, Live<H>>,
}

impl<H: NativeHandle> Default for HandleTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: NativeHandle> HandleTable<H> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Raw value for an engine call made under the monitor
    pub fn get(&self, index: usize) -> Option<H> {
        self.entries.get(&index).map(Live::get)
    }

    /// Store a handle, returning the one it displaced (if any)
    #[must_use = "a displaced handle must be released"]
    pub fn put(&mut self, index: usize, handle: Live<H>) -> Option<Live<H>> {
        self.entries.insert(index, handle)
    }

    #[must_use = "a removed handle must be released"]
    pub fn remove(&mut self, index: usize) -> Option<Live<H>> {
        self.entries.remove(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached indices in ascending order
    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.entries.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Empty the table, yielding every handle ordered by page index
    #[must_use = "drained handles must be released"]
    pub fn drain(&mut self) -> Vec<(usize, Live<H>)> {
        let mut all: Vec<(usize, Live<H>)> = self.entries.drain().collect();
        all.sort_unstable_by_key(|(index, _)| *index);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RawPage;

    fn live(raw: i64) -> Live<RawPage> {
        Live::new(RawPage(raw)).unwrap()
    }

    #[test]
    fn test_put_get_remove() {
        let mut table = HandleTable::new();
        assert!(table.is_empty());
        assert!(table.put(3, live(11)).is_none());
        assert_eq!(table.get(3), Some(RawPage(11)));
        assert!(table.contains(3));
        assert!(!table.contains(4));

        let removed = table.remove(3).unwrap();
        assert_eq!(removed.into_inner(), RawPage(11));
        assert!(table.get(3).is_none());
        assert!(table.remove(3).is_none());
    }

    #[test]
    fn test_put_returns_displaced_handle() {
        let mut table = HandleTable::new();
        assert!(table.put(0, live(1)).is_none());
        let displaced = table.put(0, live(2)).unwrap();
        assert_eq!(displaced.get(), RawPage(1));
        assert_eq!(table.get(0), Some(RawPage(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_drain_is_ordered_and_empties() {
        let mut table = HandleTable::new();
        for (index, raw) in [(7, 70), (1, 10), (4, 40)] {
            assert!(table.put(index, live(raw)).is_none());
        }
        assert_eq!(table.indices(), vec![1, 4, 7]);

        let drained: Vec<_> = table
            .drain()
            .into_iter()
            .map(|(i, h)| (i, h.into_inner().0))
            .collect();
        assert_eq!(drained, vec![(1, 10), (4, 40), (7, 70)]);
        assert!(table.is_empty());
    }
}
