//! Insertion-ordered registry of parked readers.
//!
//! While a cell is empty, reads park here. On first value every parked
//! callback fires in the order the reads arrived, so the map must preserve
//! insertion order. Waiter counts are small in practice; a scanned `Vec`
//! keeps the order for free and beats a hash map at these sizes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identity of a single read request.
///
/// Ids are process-unique and compared by identity; a fresh id is allocated
/// for every read so a cancellation can name exactly the read it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

impl WaiterId {
    /// Allocates a fresh, process-unique id.
    pub(crate) fn next() -> Self {
        Self(NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "waiter-{}", self.0)
    }
}

/// Mapping from [`WaiterId`] to a parked callback, preserving insertion
/// order.
///
/// Inserting an id that is already present replaces the callback in place,
/// keeping the slot of the earliest insert. Under normal operation this
/// does not happen because ids are unique.
pub(crate) struct WaiterMap<C> {
    entries: Vec<(WaiterId, C)>,
}

impl<C> WaiterMap<C> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a waiter, or replaces the callback of an existing id.
    pub(crate) fn insert(&mut self, id: WaiterId, callback: C) {
        if let Some(entry) = self.entries.iter_mut().find(|(other, _)| *other == id) {
            entry.1 = callback;
        } else {
            self.entries.push((id, callback));
        }
    }

    /// Removes a waiter by id, returning its callback if it was present.
    pub(crate) fn remove(&mut self, id: WaiterId) -> Option<C> {
        self.entries
            .iter()
            .position(|(other, _)| *other == id)
            .map(|index| self.entries.remove(index).1)
    }

    /// Takes every waiter in insertion order, leaving the map empty.
    pub(crate) fn drain(&mut self) -> Vec<(WaiterId, C)> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> fmt::Debug for WaiterMap<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaiterMap")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = WaiterId::next();
        let b = WaiterId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn drain_preserves_insertion_order() {
        let mut map = WaiterMap::new();
        let ids: Vec<WaiterId> = (0..5).map(|_| WaiterId::next()).collect();
        for (index, id) in ids.iter().enumerate() {
            map.insert(*id, index);
        }

        let drained = map.drain();
        assert!(map.is_empty());
        assert_eq!(
            drained.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            ids,
            "callbacks must fire in arrival order"
        );
        assert_eq!(
            drained.iter().map(|(_, cb)| *cb).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn remove_reports_presence() {
        let mut map = WaiterMap::new();
        let id = WaiterId::next();
        map.insert(id, "cb");

        assert_eq!(map.remove(id), Some("cb"));
        assert!(map.is_empty());
        assert_eq!(map.remove(id), None);
    }

    #[test]
    fn remove_keeps_order_of_remaining() {
        let mut map = WaiterMap::new();
        let ids: Vec<WaiterId> = (0..4).map(|_| WaiterId::next()).collect();
        for (index, id) in ids.iter().enumerate() {
            map.insert(*id, index);
        }

        map.remove(ids[1]);
        let drained = map.drain();
        assert_eq!(
            drained.iter().map(|(_, cb)| *cb).collect::<Vec<_>>(),
            vec![0, 2, 3]
        );
    }

    #[test]
    fn duplicate_insert_replaces_in_place() {
        let mut map = WaiterMap::new();
        let first = WaiterId::next();
        let second = WaiterId::next();
        map.insert(first, "a");
        map.insert(second, "b");
        map.insert(first, "a2");

        let drained = map.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], (first, "a2"), "earliest slot is kept");
        assert_eq!(drained[1], (second, "b"));
    }
}
