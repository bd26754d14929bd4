//! Per-parent registry of floor-level footprints
//!
//! Racks and obstacles register their bounding boxes here as they are
//! created, moved or removed, so overlap checks against a floor do not need
//! to walk the whole graph.

use std::collections::HashMap;

use crate::entity::{Aabb, EntityKind};
use crate::graph::ParentKey;
use crate::ids::LocalId;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialEntry {
    pub kind: EntityKind,
    pub bounds: Aabb,
}

#[derive(Clone, Debug, Default)]
pub struct SpatialIndex {
    cells: HashMap<ParentKey, HashMap<LocalId, SpatialEntry>>,
    owner: HashMap<LocalId, ParentKey>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or move an entry
    pub fn insert(&mut self, id: &LocalId, parent: ParentKey, entry: SpatialEntry) {
        self.remove(id);
        self.cells
            .entry(parent.clone())
            .or_default()
            .insert(id.clone(), entry);
        self.owner.insert(id.clone(), parent);
    }

    pub fn remove(&mut self, id: &LocalId) -> Option<SpatialEntry> {
        let parent = self.owner.remove(id)?;
        let cell = self.cells.get_mut(&parent)?;
        let removed = cell.remove(id);
        if cell.is_empty() {
            self.cells.remove(&parent);
        }
        removed
    }

    /// Re-file every entry under `from` to `to`
    pub fn relink(&mut self, from: &ParentKey, to: &ParentKey) {
        let Some(cell) = self.cells.remove(from) else {
            return;
        };
        for id in cell.keys() {
            self.owner.insert(id.clone(), to.clone());
        }
        self.cells.entry(to.clone()).or_default().extend(cell);
    }

    pub fn get(&self, id: &LocalId) -> Option<&SpatialEntry> {
        let parent = self.owner.get(id)?;
        self.cells.get(parent)?.get(id)
    }

    pub fn within(&self, parent: &ParentKey) -> impl Iterator<Item = (&LocalId, &SpatialEntry)> {
        self.cells.get(parent).into_iter().flat_map(|cell| cell.iter())
    }

    /// Entries under `parent` whose bounds overlap `bounds`, excluding `skip`
    pub fn overlapping(
        &self,
        parent: &ParentKey,
        bounds: &Aabb,
        tolerance: f64,
        skip: Option<&LocalId>,
    ) -> Vec<LocalId> {
        let mut hits: Vec<LocalId> = self
            .within(parent)
            .filter(|(id, _)| Some(*id) != skip)
            .filter(|(_, entry)| entry.bounds.overlaps(bounds, tolerance))
            .map(|(id, _)| id.clone())
            .collect();
        hits.sort();
        hits
    }

    pub fn len(&self) -> usize {
        self.owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.owner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Dimensions, Geometry, Vec3};

    fn rack_at(x: f64) -> SpatialEntry {
        SpatialEntry {
            kind: EntityKind::Rack,
            bounds: Geometry::new(Dimensions::new(2.0, 1.0, 3.0))
                .at(Vec3::new(x, 0.0, 0.0))
                .bounds(),
        }
    }

    #[test]
    fn test_overlapping_respects_parent_and_skip() {
        let floor = ParentKey::Local(LocalId::from_string("floor"));
        let mut index = SpatialIndex::new();
        let a = LocalId::from_string("a");
        let b = LocalId::from_string("b");
        index.insert(&a, floor.clone(), rack_at(0.0));
        index.insert(&b, ParentKey::Root, rack_at(0.0));

        let query = rack_at(1.0).bounds;
        assert_eq!(index.overlapping(&floor, &query, 1e-6, None), vec![a.clone()]);
        assert!(index.overlapping(&floor, &query, 1e-6, Some(&a)).is_empty());
    }

    #[test]
    fn test_insert_moves_and_relink() {
        let mut index = SpatialIndex::new();
        let a = LocalId::from_string("a");
        let unresolved = ParentKey::Unresolved(crate::ids::RemoteId::from_string("r9"));
        index.insert(&a, unresolved.clone(), rack_at(0.0));
        index.insert(&a, unresolved.clone(), rack_at(5.0));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&a).unwrap().bounds.min.x, 5.0);

        let floor = ParentKey::Local(LocalId::from_string("f"));
        index.relink(&unresolved, &floor);
        assert_eq!(index.within(&floor).count(), 1);
        assert_eq!(index.within(&unresolved).count(), 0);

        assert!(index.remove(&a).is_some());
        assert!(index.is_empty());
    }
}
