use slotmap::SlotMap;
use std::collections::HashSet;

use crate::render::device::GpuHandle;

struct Entry<R> {
    resource: R,
    parents: Vec<GpuHandle>,
    sequence: u64,
}

/// Generation-tagged store of device objects.
///
/// Every resource records the resources it depends on. Removal cascades to
/// dependents, and teardown order is always dependents first, newest first,
/// so a resource is never destroyed while something built on it is alive.
/// Keys of removed resources stay dead even when their slot is reused.
pub struct ResourceArena<R> {
    entries: SlotMap<GpuHandle, Entry<R>>,
    next_sequence: u64,
}

impl<R> Default for ResourceArena<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ResourceArena<R> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            entries: SlotMap::with_key(),
            next_sequence: 0,
        }
    }

    /// Store a resource that depends on `parents`.
    ///
    /// Parents that are no longer alive are ignored.
    pub fn insert(&mut self, resource: R, parents: &[GpuHandle]) -> GpuHandle {
        let parents: Vec<GpuHandle> = parents
            .iter()
            .copied()
            .filter(|parent| self.entries.contains_key(*parent))
            .collect();
        debug_assert!(
            parents.len() <= 8,
            "resource with an unexpectedly wide dependency list"
        );

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(Entry {
            resource,
            parents,
            sequence,
        })
    }

    /// Resolve a handle
    pub fn get(&self, handle: GpuHandle) -> Option<&R> {
        self.entries.get(handle).map(|entry| &entry.resource)
    }

    /// Resolve a handle mutably
    pub fn get_mut(&mut self, handle: GpuHandle) -> Option<&mut R> {
        self.entries.get_mut(handle).map(|entry| &mut entry.resource)
    }

    /// Whether the handle refers to a live resource
    pub fn contains(&self, handle: GpuHandle) -> bool {
        self.entries.contains_key(handle)
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the arena holds no resources
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over live resources
    pub fn iter(&self) -> impl Iterator<Item = (GpuHandle, &R)> {
        self.entries.iter().map(|(handle, entry)| (handle, &entry.resource))
    }

    /// Remove a resource together with everything that depends on it.
    ///
    /// Resources are returned in the order they must be destroyed. A stale
    /// handle yields nothing.
    pub fn remove(&mut self, handle: GpuHandle) -> Vec<R> {
        if !self.entries.contains_key(handle) {
            return Vec::new();
        }

        let mut doomed: HashSet<GpuHandle> = HashSet::from([handle]);
        loop {
            let before = doomed.len();
            for (candidate, entry) in &self.entries {
                if !doomed.contains(&candidate)
                    && entry.parents.iter().any(|parent| doomed.contains(parent))
                {
                    doomed.insert(candidate);
                }
            }
            if doomed.len() == before {
                break;
            }
        }

        self.take_in_teardown_order(doomed.into_iter().collect())
    }

    /// Remove every resource, in teardown order
    pub fn drain(&mut self) -> Vec<R> {
        let all = self.entries.keys().collect();
        self.take_in_teardown_order(all)
    }

    fn take_in_teardown_order(&mut self, mut handles: Vec<GpuHandle>) -> Vec<R> {
        handles.sort_by_key(|handle| std::cmp::Reverse(self.entries[*handle].sequence));
        handles
            .into_iter()
            .filter_map(|handle| self.entries.remove(handle))
            .map(|entry| entry.resource)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut arena = ResourceArena::new();
        let a = arena.insert("swapchain", &[]);
        assert_eq!(arena.get(a), Some(&"swapchain"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_remove_cascades_to_dependents() {
        let mut arena = ResourceArena::new();
        let swapchain = arena.insert("swapchain", &[]);
        let view = arena.insert("view", &[swapchain]);
        let render_pass = arena.insert("render pass", &[]);
        let framebuffer = arena.insert("framebuffer", &[render_pass, view]);
        let unrelated = arena.insert("buffer", &[]);

        let removed = arena.remove(swapchain);
        assert_eq!(removed, vec!["framebuffer", "view", "swapchain"]);
        assert!(!arena.contains(framebuffer));
        assert!(arena.contains(render_pass));
        assert!(arena.contains(unrelated));
    }

    #[test]
    fn test_drain_destroys_dependents_first() {
        let mut arena = ResourceArena::new();
        let pool = arena.insert("pool", &[]);
        let layout = arena.insert("layout", &[]);
        arena.insert("set", &[pool, layout]);
        arena.insert("pipeline", &[layout]);

        assert_eq!(arena.drain(), vec!["pipeline", "set", "layout", "pool"]);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_stale_handle_does_not_resolve() {
        let mut arena = ResourceArena::new();
        let first = arena.insert(1, &[]);
        arena.remove(first);
        let second = arena.insert(2, &[]);

        assert_ne!(first, second);
        assert_eq!(arena.get(first), None);
        assert!(arena.remove(first).is_empty());
        assert_eq!(arena.get(second), Some(&2));
    }

    #[test]
    fn test_dead_parents_are_ignored() {
        let mut arena = ResourceArena::new();
        let parent = arena.insert("parent", &[]);
        arena.remove(parent);
        let orphan = arena.insert("orphan", &[parent]);

        let replacement = arena.insert("replacement", &[]);
        arena.remove(replacement);
        assert!(arena.contains(orphan));
    }
}
