//! Placement validation
//!
//! Decides whether a candidate may occupy its position: hierarchy rules per
//! kind, containment within the parent's bounds, and bounding-box overlap
//! against collidable siblings. Reads the graph, never mutates it.

pub mod spatial;

use std::fmt;

use crate::entity::{Aabb, Attributes, Entity, EntityKind, ParentRef};
use crate::graph::{EntityGraph, ParentKey};
use crate::ids::LocalId;

pub use spatial::{SpatialEntry, SpatialIndex};

/// Default epsilon for touching faces, in metres
pub const DEFAULT_OVERLAP_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Violation {
    Overlap,
    OutOfBounds,
    Hierarchy,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Violation::Overlap => "overlap",
            Violation::OutOfBounds => "out of bounds",
            Violation::Hierarchy => "hierarchy",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlacementVerdict {
    Allowed,
    Rejected { violation: Violation, reason: String },
}

impl PlacementVerdict {
    fn reject(violation: Violation, reason: impl Into<String>) -> Self {
        PlacementVerdict::Rejected {
            violation,
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, PlacementVerdict::Allowed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            PlacementVerdict::Allowed => None,
            PlacementVerdict::Rejected { reason, .. } => Some(reason),
        }
    }

    pub fn violation(&self) -> Option<Violation> {
        match self {
            PlacementVerdict::Allowed => None,
            PlacementVerdict::Rejected { violation, .. } => Some(*violation),
        }
    }
}

/// What is being placed, and where
#[derive(Clone, Copy, Debug)]
pub struct PlacementCandidate<'a> {
    /// Set when the candidate is already in the graph, so it is not
    /// compared against itself
    pub id: Option<&'a LocalId>,
    pub attributes: &'a Attributes,
    pub parent: Option<&'a ParentRef>,
}

impl<'a> PlacementCandidate<'a> {
    pub fn from_entity(entity: &'a Entity) -> Self {
        Self {
            id: Some(&entity.local_id),
            attributes: &entity.attributes,
            parent: entity.parent.as_ref(),
        }
    }
}

/// Whether `kind` may sit under a parent of `parent` kind (`None` = root)
pub fn allowed_parent(kind: EntityKind, parent: Option<EntityKind>) -> bool {
    match kind {
        EntityKind::Floor => parent.is_none(),
        EntityKind::Rack | EntityKind::Obstacle => {
            parent.is_none_or(|p| p == EntityKind::Floor)
        }
        EntityKind::Shelf => parent == Some(EntityKind::Rack),
        EntityKind::Bin => parent == Some(EntityKind::Shelf),
        EntityKind::Marker => true,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PlacementValidator {
    tolerance: f64,
}

impl Default for PlacementValidator {
    fn default() -> Self {
        Self::new(DEFAULT_OVERLAP_TOLERANCE)
    }
}

impl PlacementValidator {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Validate an entity already in the graph; `None` if it is missing
    pub fn validate_entity(&self, graph: &EntityGraph, id: &LocalId) -> Option<PlacementVerdict> {
        let entity = graph.get_entity(id)?;
        Some(self.validate(graph, &PlacementCandidate::from_entity(entity)))
    }

    pub fn validate(&self, graph: &EntityGraph, candidate: &PlacementCandidate<'_>) -> PlacementVerdict {
        let kind = candidate.attributes.kind();
        let parent_key = graph.resolve_parent(candidate.parent);

        let parent = match &parent_key {
            ParentKey::Root => None,
            ParentKey::Unresolved(remote) => {
                return PlacementVerdict::reject(
                    Violation::Hierarchy,
                    format!("parent {} is not loaded", remote),
                );
            }
            ParentKey::Local(id) => match graph.get_entity(id) {
                Some(p) => Some(p),
                None => {
                    return PlacementVerdict::reject(
                        Violation::Hierarchy,
                        format!("parent {} does not exist", id),
                    );
                }
            },
        };

        if !allowed_parent(kind, parent.map(Entity::kind)) {
            let reason = match parent {
                Some(p) => format!("a {} cannot be placed inside a {}", kind, p.kind()),
                None => format!("a {} must be placed inside a parent", kind),
            };
            return PlacementVerdict::reject(Violation::Hierarchy, reason);
        }

        if !kind.is_collidable() {
            return PlacementVerdict::Allowed;
        }
        let Some(bounds) = candidate.attributes.bounds() else {
            return PlacementVerdict::Allowed;
        };

        if let Some(parent) = parent {
            if let Some(outer) = parent.bounds() {
                // Shelves sit inside the rack volume; everything else only
                // needs to stay within the parent's footprint
                let inside = if parent.kind() == EntityKind::Rack {
                    outer.contains(&bounds, self.tolerance)
                } else {
                    outer.contains_footprint(&bounds, self.tolerance)
                };
                if !inside {
                    return PlacementVerdict::reject(
                        Violation::OutOfBounds,
                        format!("{} extends outside its {} '{}'", kind, parent.kind(), parent.name),
                    );
                }
            }
        }

        match self.first_overlap(graph, &parent_key, kind, &bounds, candidate.id) {
            Some(other) => PlacementVerdict::reject(
                Violation::Overlap,
                format!(
                    "{} overlaps {} '{}' ({})",
                    kind,
                    other.kind(),
                    other.name,
                    other.local_id
                ),
            ),
            None => PlacementVerdict::Allowed,
        }
    }

    fn first_overlap<'g>(
        &self,
        graph: &'g EntityGraph,
        parent: &ParentKey,
        kind: EntityKind,
        bounds: &Aabb,
        skip: Option<&LocalId>,
    ) -> Option<&'g Entity> {
        if kind.is_spatially_indexed() {
            return graph
                .spatial()
                .overlapping(parent, bounds, self.tolerance, skip)
                .first()
                .and_then(|id| graph.get_entity(id));
        }

        graph
            .get_children_by_key(parent)
            .into_iter()
            .filter(|e| Some(&e.local_id) != skip)
            .filter(|e| e.kind().is_collidable())
            .find(|e| e.bounds().is_some_and(|b| b.overlaps(bounds, self.tolerance)))
    }
}
