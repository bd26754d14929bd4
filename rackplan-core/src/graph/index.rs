//! Derived lookup indices over the entity map
//!
//! Kept in step with the map on every mutation: by kind, by resolved parent,
//! and by path. Each entity's index entry is remembered so it can be removed
//! under exactly the keys it was inserted with.

use std::collections::HashMap;

use crate::entity::EntityKind;
use crate::ids::{LocalId, RemoteId};

/// Bucket key for the parent index
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParentKey {
    /// Top-level entity
    Root,
    /// Parent resolved to a local entity
    Local(LocalId),
    /// Parent known only by a remote id that has no local mapping yet
    Unresolved(RemoteId),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct IndexEntry {
    pub kind: EntityKind,
    pub parent: ParentKey,
    pub path: String,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct GraphIndex {
    by_kind: HashMap<EntityKind, Vec<LocalId>>,
    by_parent: HashMap<ParentKey, Vec<LocalId>>,
    by_path: HashMap<String, Vec<LocalId>>,
    entries: HashMap<LocalId, IndexEntry>,
}

fn push_unique(bucket: &mut Vec<LocalId>, id: &LocalId) {
    if !bucket.contains(id) {
        bucket.push(id.clone());
    }
}

fn remove_from<K: Eq + std::hash::Hash>(map: &mut HashMap<K, Vec<LocalId>>, key: &K, id: &LocalId) {
    if let Some(bucket) = map.get_mut(key) {
        bucket.retain(|x| x != id);
        if bucket.is_empty() {
            map.remove(key);
        }
    }
}

impl GraphIndex {
    /// Index `id` under the given keys, replacing any previous entry
    pub fn insert(&mut self, id: &LocalId, entry: IndexEntry) {
        self.remove(id);
        push_unique(self.by_kind.entry(entry.kind).or_default(), id);
        push_unique(self.by_parent.entry(entry.parent.clone()).or_default(), id);
        push_unique(self.by_path.entry(entry.path.clone()).or_default(), id);
        self.entries.insert(id.clone(), entry);
    }

    pub fn remove(&mut self, id: &LocalId) -> Option<IndexEntry> {
        let entry = self.entries.remove(id)?;
        remove_from(&mut self.by_kind, &entry.kind, id);
        remove_from(&mut self.by_parent, &entry.parent, id);
        remove_from(&mut self.by_path, &entry.path, id);
        Some(entry)
    }

    /// Move every child filed under `from` to `to`
    pub fn relink(&mut self, from: &ParentKey, to: &ParentKey) -> Vec<LocalId> {
        let Some(moved) = self.by_parent.remove(from) else {
            return Vec::new();
        };
        let bucket = self.by_parent.entry(to.clone()).or_default();
        for id in &moved {
            push_unique(bucket, id);
            if let Some(entry) = self.entries.get_mut(id) {
                entry.parent = to.clone();
            }
        }
        moved
    }

    pub fn by_kind(&self, kind: EntityKind) -> &[LocalId] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_parent(&self, key: &ParentKey) -> &[LocalId] {
        self.by_parent.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_path(&self, path: &str) -> &[LocalId] {
        self.by_path.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entry(&self, id: &LocalId) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.by_kind.clear();
        self.by_parent.clear();
        self.by_path.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: EntityKind, parent: ParentKey, path: &str) -> IndexEntry {
        IndexEntry { kind, parent, path: path.to_string() }
    }

    #[test]
    fn test_insert_replaces_previous_keys() {
        let mut index = GraphIndex::default();
        let id = LocalId::from_string("a");
        index.insert(&id, entry(EntityKind::Rack, ParentKey::Root, "rack"));
        index.insert(
            &id,
            entry(EntityKind::Rack, ParentKey::Local(LocalId::from_string("f")), "floor.rack"),
        );

        assert!(index.by_parent(&ParentKey::Root).is_empty());
        assert!(index.by_path("rack").is_empty());
        assert_eq!(index.by_path("floor.rack"), &[id.clone()]);
        assert_eq!(index.by_kind(EntityKind::Rack).len(), 1);
    }

    #[test]
    fn test_relink_moves_bucket() {
        let mut index = GraphIndex::default();
        let child = LocalId::from_string("c");
        let pending = ParentKey::Unresolved(RemoteId::from_string("r1"));
        index.insert(&child, entry(EntityKind::Shelf, pending.clone(), "shelf"));

        let parent = ParentKey::Local(LocalId::from_string("p"));
        let moved = index.relink(&pending, &parent);

        assert_eq!(moved, vec![child.clone()]);
        assert!(index.by_parent(&pending).is_empty());
        assert_eq!(index.by_parent(&parent), &[child.clone()]);
        assert_eq!(index.entry(&child).unwrap().parent, parent);
    }

    #[test]
    fn test_remove_cleans_every_index() {
        let mut index = GraphIndex::default();
        let id = LocalId::from_string("a");
        index.insert(&id, entry(EntityKind::Bin, ParentKey::Root, "bin"));
        assert!(index.remove(&id).is_some());
        assert_eq!(index.len(), 0);
        assert!(index.by_kind(EntityKind::Bin).is_empty());
        assert!(index.remove(&id).is_none());
    }
}
