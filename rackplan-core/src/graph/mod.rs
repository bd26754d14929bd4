//! Entity graph store
//!
//! The single source of truth for every in-memory entity. Owns:
//! - the entity map, keyed by local id
//! - derived indices by kind, parent and path
//! - the local <-> remote identity maps
//! - the placement validator's spatial index
//! - the single ghost slot used for placement previews
//!
//! Nothing outside this module mutates the map directly; the reconciliation
//! bridge and commit pipeline go through the crate-private lifecycle methods
//! at the bottom of this file.

mod ghost;
mod index;

use std::collections::{HashMap, VecDeque};

use crate::diagnostics::{DiagnosticCategory, DiagnosticsLog};
use crate::entity::{
    describe_issues, now_millis, AttributeIssue, AttributePatch, Attributes, Entity, EntityKind,
    EntityStatus, ParentRef,
};
use crate::ids::{LocalId, RemoteId};
use crate::placement::{SpatialEntry, SpatialIndex};

pub use index::ParentKey;
pub(crate) use index::{GraphIndex, IndexEntry};

/// The entity map, as captured by history snapshots
pub type EntityMap = HashMap<LocalId, Entity>;

/// Result of creating an entity: its id plus any attribute problems found
#[derive(Clone, Debug, PartialEq)]
pub struct EntityCreated {
    pub id: LocalId,
    pub issues: Vec<AttributeIssue>,
}

impl EntityCreated {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

// ============================================================================
// EntityGraph
// ============================================================================

#[derive(Debug)]
pub struct EntityGraph {
    entities: EntityMap,
    index: GraphIndex,
    local_to_remote: HashMap<LocalId, RemoteId>,
    remote_to_local: HashMap<RemoteId, LocalId>,
    spatial: SpatialIndex,
    ghost: Option<Entity>,
    diagnostics: DiagnosticsLog,
}

impl EntityGraph {
    pub fn new(diagnostics: DiagnosticsLog) -> Self {
        Self {
            entities: HashMap::new(),
            index: GraphIndex::default(),
            local_to_remote: HashMap::new(),
            remote_to_local: HashMap::new(),
            spatial: SpatialIndex::new(),
            ghost: None,
            diagnostics,
        }
    }

    pub fn diagnostics(&self) -> &DiagnosticsLog {
        &self.diagnostics
    }

    // ========================================================================
    // Resolution helpers
    // ========================================================================

    /// Index bucket a parent reference currently resolves to
    pub fn resolve_parent(&self, parent: Option<&ParentRef>) -> ParentKey {
        match parent {
            None => ParentKey::Root,
            Some(ParentRef::Local(id)) => ParentKey::Local(id.clone()),
            Some(ParentRef::Remote(remote)) => match self.remote_to_local.get(remote) {
                Some(local) => ParentKey::Local(local.clone()),
                None => ParentKey::Unresolved(remote.clone()),
            },
        }
    }

    /// Live (non-deleted) parent entity a reference resolves to
    pub fn parent_entity(&self, parent: Option<&ParentRef>) -> Option<&Entity> {
        match self.resolve_parent(parent) {
            ParentKey::Local(id) => self.entities.get(&id).filter(|e| !e.is_deleted()),
            _ => None,
        }
    }

    /// Prefer the remote form of a local reference when the parent is committed
    fn normalize_parent(&self, parent: Option<ParentRef>) -> Option<ParentRef> {
        match parent {
            Some(ParentRef::Local(id)) => match self.local_to_remote.get(&id) {
                Some(remote) => Some(ParentRef::Remote(remote.clone())),
                None => Some(ParentRef::Local(id)),
            },
            other => other,
        }
    }

    pub(crate) fn path_for(&self, parent: Option<&ParentRef>, kind: EntityKind) -> String {
        Entity::child_path(self.parent_entity(parent).map(|p| p.path.as_str()), kind)
    }

    // ========================================================================
    // Index maintenance
    // ========================================================================

    fn index_entity(&mut self, id: &LocalId) {
        let Some(entity) = self.entities.get(id) else {
            return;
        };
        let kind = entity.kind();
        let parent = self.resolve_parent(entity.parent.as_ref());
        let entry = IndexEntry {
            kind,
            parent: parent.clone(),
            path: entity.path.clone(),
        };
        let spatial = if kind.is_spatially_indexed() && !entity.is_deleted() {
            entity.bounds().map(|bounds| SpatialEntry { kind, bounds })
        } else {
            None
        };

        self.index.insert(id, entry);
        match spatial {
            Some(s) => self.spatial.insert(id, parent, s),
            None => {
                self.spatial.remove(id);
            }
        }
    }

    fn unindex_entity(&mut self, id: &LocalId) {
        self.index.remove(id);
        self.spatial.remove(id);
    }

    fn insert_entity(&mut self, entity: Entity) -> LocalId {
        let id = entity.local_id.clone();
        self.entities.insert(id.clone(), entity);
        self.index_entity(&id);
        id
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Create a draft directly, bypassing the ghost step.
    ///
    /// `attrs` is merged over the registry defaults for `kind`. Attribute
    /// problems are logged and returned but never block creation.
    pub fn add_entity(
        &mut self,
        kind: EntityKind,
        parent: Option<ParentRef>,
        name: impl Into<String>,
        attrs: Option<&AttributePatch>,
    ) -> EntityCreated {
        let defaults = Attributes::defaults_for(kind);
        let (attributes, mut issues) = match attrs {
            Some(patch) => match defaults.apply_patch(patch) {
                Ok(merged) => (merged, Vec::new()),
                Err(rejected) => (defaults, rejected),
            },
            None => (defaults, Vec::new()),
        };
        issues.extend(attributes.validate());

        if let Some(ParentRef::Local(pid)) = &parent {
            if !self.entities.contains_key(pid) {
                self.diagnostics.warn(
                    DiagnosticCategory::Validation,
                    None,
                    format!("parent {} is not in the graph", pid),
                );
            }
        }

        let parent = self.normalize_parent(parent);
        let path = self.path_for(parent.as_ref(), kind);
        let entity = Entity::draft(parent, name, path, attributes);
        let id = self.insert_entity(entity);

        if !issues.is_empty() {
            self.diagnostics.warn(
                DiagnosticCategory::Validation,
                Some(&id),
                format!("{} created with invalid attributes: {}", kind, describe_issues(&issues)),
            );
        }
        self.diagnostics
            .info(DiagnosticCategory::Created, Some(&id), format!("{} draft created", kind));

        EntityCreated { id, issues }
    }

    /// Merge `patch` into an entity's attributes.
    ///
    /// Returns `None` when the entity is missing or deleted. A locked entity
    /// rejects every change except unlocking. An entity in `Error` returns to
    /// `Draft`, the edit being an implicit fix attempt.
    pub fn update_entity(&mut self, id: &LocalId, patch: &AttributePatch) -> Option<Vec<AttributeIssue>> {
        let Some(entity) = self.entities.get(id).filter(|e| !e.is_deleted()) else {
            self.diagnostics.warn(
                DiagnosticCategory::Updated,
                Some(id),
                "update ignored: entity not found",
            );
            return None;
        };

        // A locked fixture only accepts a change to the lock flag itself
        if entity.attributes.is_locked() && patch.as_map().keys().any(|key| key != "locked") {
            self.diagnostics
                .warn(DiagnosticCategory::Updated, Some(id), "update refused: entity is locked");
            return Some(vec![AttributeIssue::new("locked", "entity is locked")]);
        }

        let merged = match entity.attributes.apply_patch(patch) {
            Ok(merged) => merged,
            Err(issues) => {
                self.diagnostics.warn(
                    DiagnosticCategory::Validation,
                    Some(id),
                    format!("patch rejected: {}", describe_issues(&issues)),
                );
                return Some(issues);
            }
        };

        let issues = merged.validate();
        let entity = self.entities.get_mut(id)?;
        entity.attributes = merged;
        entity.dirty = true;
        let recovered = entity.status == EntityStatus::Error;
        if recovered {
            entity.status = EntityStatus::Draft;
            entity.validation_error = None;
        }
        self.index_entity(id);

        if !issues.is_empty() {
            self.diagnostics.warn(
                DiagnosticCategory::Validation,
                Some(id),
                format!("invalid attributes: {}", describe_issues(&issues)),
            );
        }
        let message = if recovered {
            "attributes updated, error cleared"
        } else {
            "attributes updated"
        };
        self.diagnostics.info(DiagnosticCategory::Updated, Some(id), message);

        Some(issues)
    }

    /// Remove an entity and its descendants.
    ///
    /// Soft removal marks the entity and every descendant deleted, reaching
    /// through descendants that were already deleted. Hard removal discards
    /// draft/error entities outright; committed ones fall back to a soft
    /// delete since they must be deleted remotely. Refused while any entity
    /// in the subtree has a commit in flight.
    pub fn remove_entity(&mut self, id: &LocalId, soft: bool) -> bool {
        let Some(entity) = self.entities.get(id) else {
            self.diagnostics
                .warn(DiagnosticCategory::Removed, Some(id), "remove ignored: entity not found");
            return false;
        };
        let status = entity.status;

        if let Some(busy) = self.pending_in_subtree(id) {
            self.diagnostics.warn(
                DiagnosticCategory::Removed,
                Some(id),
                format!("remove refused: commit in flight for {}", busy),
            );
            return false;
        }

        if !soft {
            if status.is_committable() {
                let children: Vec<LocalId> =
                    self.index.by_parent(&ParentKey::Local(id.clone())).to_vec();
                for child in children {
                    self.remove_entity(&child, false);
                }
                return self.discard_entity(id);
            }
            self.diagnostics.warn(
                DiagnosticCategory::Removed,
                Some(id),
                format!("{} entity cannot be hard-removed locally, soft-deleting", status),
            );
        }

        self.soft_delete_subtree(id) > 0
    }

    /// First entity at or below `id` whose create call is in flight
    fn pending_in_subtree(&self, id: &LocalId) -> Option<LocalId> {
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(next) = queue.pop_front() {
            if self
                .entities
                .get(&next)
                .is_some_and(|e| e.status == EntityStatus::Pending)
            {
                return Some(next);
            }
            queue.extend(self.index.by_parent(&ParentKey::Local(next)).iter().cloned());
        }
        None
    }

    /// Mark `id` and its descendants deleted. Returns how many were newly marked.
    fn soft_delete_subtree(&mut self, id: &LocalId) -> usize {
        let mut marked = 0;
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(next) = queue.pop_front() {
            let newly = match self.entities.get_mut(&next) {
                Some(entity) if !entity.is_deleted() => {
                    entity.deleted_at = Some(now_millis());
                    entity.dirty = true;
                    true
                }
                _ => false,
            };
            if newly {
                self.index_entity(&next);
                self.diagnostics
                    .info(DiagnosticCategory::Removed, Some(&next), "soft-deleted");
                marked += 1;
            }
            queue.extend(
                self.index
                    .by_parent(&ParentKey::Local(next))
                    .iter()
                    .cloned(),
            );
        }
        marked
    }

    /// Hard-remove a draft or errored entity that was never synced.
    ///
    /// Draft/error children go with it. Any other status is a no-op.
    pub fn discard_entity(&mut self, id: &LocalId) -> bool {
        let Some(entity) = self.entities.get(id) else {
            self.diagnostics
                .warn(DiagnosticCategory::Removed, Some(id), "discard ignored: entity not found");
            return false;
        };
        if !entity.status.is_committable() {
            self.diagnostics.warn(
                DiagnosticCategory::Removed,
                Some(id),
                format!("discard ignored: entity is {}", entity.status),
            );
            return false;
        }

        let children: Vec<LocalId> = self.index.by_parent(&ParentKey::Local(id.clone())).to_vec();
        for child in children {
            let discardable = self
                .entities
                .get(&child)
                .is_some_and(|c| c.status.is_committable());
            if discardable {
                self.discard_entity(&child);
            }
        }

        self.unindex_entity(id);
        self.entities.remove(id);
        self.diagnostics
            .info(DiagnosticCategory::Removed, Some(id), "discarded");
        true
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Live entity by local id
    pub fn get_entity(&self, id: &LocalId) -> Option<&Entity> {
        self.entities.get(id).filter(|e| !e.is_deleted())
    }

    /// Entity by local id, soft-deleted ones included
    pub fn get_entity_with_deleted(&self, id: &LocalId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_entity_by_remote(&self, remote: &RemoteId) -> Option<&Entity> {
        self.remote_to_local
            .get(remote)
            .and_then(|local| self.get_entity(local))
    }

    pub fn local_id_for(&self, remote: &RemoteId) -> Option<&LocalId> {
        self.remote_to_local.get(remote)
    }

    pub fn remote_id_for(&self, local: &LocalId) -> Option<&RemoteId> {
        self.local_to_remote.get(local)
    }

    fn live(&self, ids: &[LocalId]) -> Vec<&Entity> {
        ids.iter()
            .filter_map(|id| self.get_entity(id))
            .collect()
    }

    pub fn get_entities_by_type(&self, kind: EntityKind) -> Vec<&Entity> {
        self.live(self.index.by_kind(kind))
    }

    pub fn get_entities_by_path(&self, path: &str) -> Vec<&Entity> {
        self.live(self.index.by_path(path))
    }

    /// Live children filed under the parent's local id
    pub fn get_children(&self, id: &LocalId) -> Vec<&Entity> {
        self.live(self.index.by_parent(&ParentKey::Local(id.clone())))
    }

    pub fn get_roots(&self) -> Vec<&Entity> {
        self.live(self.index.by_parent(&ParentKey::Root))
    }

    /// Live entities filed under an index bucket
    pub fn get_children_by_key(&self, key: &ParentKey) -> Vec<&Entity> {
        self.live(self.index.by_parent(key))
    }

    /// Live descendants, breadth first
    pub fn get_descendants(&self, id: &LocalId) -> Vec<&Entity> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(next) = queue.pop_front() {
            for child in self.get_children(&next) {
                queue.push_back(child.local_id.clone());
                out.push(child);
            }
        }
        out
    }

    /// Children still waiting for `remote` to be mapped to a local entity
    pub fn get_unresolved_children(&self, remote: &RemoteId) -> Vec<&Entity> {
        self.live(self.index.by_parent(&ParentKey::Unresolved(remote.clone())))
    }

    pub fn get_entities_by_status(&self, status: EntityStatus) -> Vec<&Entity> {
        self.entities
            .values()
            .filter(|e| !e.is_deleted() && e.status == status)
            .collect()
    }

    pub fn get_draft_entities(&self) -> Vec<&Entity> {
        self.get_entities_by_status(EntityStatus::Draft)
    }

    /// Committed entities with local changes, deleted ones included
    pub fn get_dirty_entities(&self) -> Vec<&Entity> {
        self.entities
            .values()
            .filter(|e| e.status == EntityStatus::Committed && e.dirty)
            .collect()
    }

    /// Explicitly includes soft-deleted entities
    pub fn get_deleted_entities(&self) -> Vec<&Entity> {
        self.entities.values().filter(|e| e.is_deleted()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entities
            .values()
            .filter(|e| e.status == EntityStatus::Pending)
            .count()
    }

    pub fn parent_key_of(&self, id: &LocalId) -> Option<&ParentKey> {
        self.index.entry(id).map(|entry| &entry.parent)
    }

    pub fn identity_pairs(&self) -> impl Iterator<Item = (&LocalId, &RemoteId)> {
        self.local_to_remote.iter()
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    /// The full map, soft-deleted entities included
    pub fn entities(&self) -> &EntityMap {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // ========================================================================
    // Wholesale replacement
    // ========================================================================

    /// Replace the map and rebuild every derived structure from it
    pub fn restore(&mut self, entities: EntityMap) {
        self.entities = entities;
        self.rebuild_derived();
    }

    fn rebuild_derived(&mut self) {
        self.index.clear();
        self.spatial.clear();
        self.local_to_remote.clear();
        self.remote_to_local.clear();

        let mut bindings: Vec<(LocalId, RemoteId)> = self
            .entities
            .values()
            .filter_map(|e| e.remote_id.clone().map(|r| (e.local_id.clone(), r)))
            .collect();
        bindings.sort();
        for (local, remote) in bindings {
            if self.remote_to_local.contains_key(&remote) {
                self.diagnostics.warn(
                    DiagnosticCategory::Reconcile,
                    Some(&local),
                    format!("duplicate remote id {} during rebuild", remote),
                );
                continue;
            }
            self.local_to_remote.insert(local.clone(), remote.clone());
            self.remote_to_local.insert(remote, local);
        }

        let ids: Vec<LocalId> = self.entities.keys().cloned().collect();
        for id in ids {
            self.index_entity(&id);
        }
    }

    // ========================================================================
    // Lifecycle hooks for the bridge and commit pipeline
    // ========================================================================

    /// Wipe all state, ghost included
    pub(crate) fn clear(&mut self) {
        self.entities.clear();
        self.index.clear();
        self.spatial.clear();
        self.local_to_remote.clear();
        self.remote_to_local.clear();
        self.ghost = None;
    }

    /// Insert without indexing; callers index once parents are known
    pub(crate) fn insert_unindexed(&mut self, entity: Entity) {
        self.entities.insert(entity.local_id.clone(), entity);
    }

    pub(crate) fn reindex(&mut self, id: &LocalId) {
        self.index_entity(id);
    }

    pub(crate) fn entity_mut(&mut self, id: &LocalId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    /// Record `local <-> remote`. Refuses if `remote` is bound elsewhere.
    pub(crate) fn bind_identity(&mut self, local: &LocalId, remote: &RemoteId) -> bool {
        if let Some(owner) = self.remote_to_local.get(remote) {
            if owner != local {
                self.diagnostics.warn(
                    DiagnosticCategory::Reconcile,
                    Some(local),
                    format!("remote id {} already bound to {}", remote, owner),
                );
                return false;
            }
        }
        if let Some(previous) = self.local_to_remote.insert(local.clone(), remote.clone()) {
            if &previous != remote {
                self.remote_to_local.remove(&previous);
            }
        }
        self.remote_to_local.insert(remote.clone(), local.clone());
        if let Some(entity) = self.entities.get_mut(local) {
            entity.remote_id = Some(remote.clone());
        }

        // Children that arrived before their parent now have a home
        let from = ParentKey::Unresolved(remote.clone());
        let to = ParentKey::Local(local.clone());
        self.index.relink(&from, &to);
        self.spatial.relink(&from, &to);
        true
    }

    /// Point children holding `Local(parent)` at the parent's new remote id
    pub(crate) fn rewrite_child_refs(&mut self, parent: &LocalId, remote: &RemoteId) -> usize {
        let target = ParentRef::Local(parent.clone());
        let mut rewritten = Vec::new();
        for entity in self.entities.values_mut() {
            if entity.parent.as_ref() == Some(&target) {
                entity.parent = Some(ParentRef::Remote(remote.clone()));
                rewritten.push(entity.local_id.clone());
            }
        }
        for id in &rewritten {
            self.index_entity(id);
        }
        rewritten.len()
    }

    /// Draft/error -> pending. Returns the attributes being sent.
    pub(crate) fn begin_commit(&mut self, id: &LocalId) -> Option<Attributes> {
        let entity = self.entities.get_mut(id)?;
        if !entity.status.is_committable() {
            return None;
        }
        entity.status = EntityStatus::Pending;
        entity.validation_error = None;
        Some(entity.attributes.clone())
    }

    /// Pending -> error, keeping the message on the entity
    pub(crate) fn mark_error(&mut self, id: &LocalId, message: &str) -> bool {
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        if entity.status != EntityStatus::Pending {
            return false;
        }
        entity.status = EntityStatus::Error;
        entity.validation_error = Some(message.to_string());
        true
    }

    pub(crate) fn mark_clean(&mut self, id: &LocalId) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.dirty = false;
        }
    }

    /// Hard-remove regardless of status (after a remote delete, or a
    /// duplicate created by a racing merge)
    pub(crate) fn purge(&mut self, id: &LocalId) -> Option<Entity> {
        let entity = self.entities.remove(id)?;
        self.unindex_entity(id);
        if let Some(remote) = self.local_to_remote.remove(id) {
            self.remote_to_local.remove(&remote);
            // Surviving children fall back to waiting on the remote id
            let from = ParentKey::Local(id.clone());
            let to = ParentKey::Unresolved(remote);
            self.index.relink(&from, &to);
            self.spatial.relink(&from, &to);
        }
        Some(entity)
    }
}

#[cfg(test)]
mod tests;
