//! Identity reconciliation between remote records and local entities
//!
//! Converts records to entities and back, and folds remote snapshots into
//! the graph. The one rule that matters: a merge never touches an entity
//! whose status is draft, pending or error, nor one with a mutation in
//! flight or local changes still waiting for a sync.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::diagnostics::DiagnosticCategory;
use crate::entity::{Attributes, Entity, EntityStatus, ParentRef};
use crate::graph::EntityGraph;
use crate::ids::{LocalId, RemoteId};

/// Parent chains longer than this are treated as cyclic
const MAX_DEPTH: usize = 64;

// ============================================================================
// Record shape
// ============================================================================

/// Persisted fields of an entity, as written to the remote store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordBody {
    pub parent: Option<RemoteId>,
    pub name: String,
    #[serde(default)]
    pub path: String,
    pub attributes: Attributes,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

/// A record as delivered by a remote snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RemoteId,
    #[serde(flatten)]
    pub body: RecordBody,
}

impl RemoteRecord {
    pub fn new(id: RemoteId, body: RecordBody) -> Self {
        Self { id, body }
    }
}

/// A committed entity with a fresh local id
pub fn to_entity(record: &RemoteRecord) -> Entity {
    let body = &record.body;
    Entity {
        local_id: LocalId::new(),
        remote_id: Some(record.id.clone()),
        status: EntityStatus::Committed,
        parent: body.parent.clone().map(ParentRef::Remote),
        name: body.name.clone(),
        path: body.path.clone(),
        attributes: body.attributes.clone(),
        deleted_at: body.deleted_at,
        validation_error: None,
        dirty: false,
    }
}

/// Strip local-only fields for a write.
///
/// Fails when the parent is known only locally: a child cannot be persisted
/// before its parent.
pub fn to_record(graph: &EntityGraph, entity: &Entity) -> Result<RecordBody, String> {
    let parent = match &entity.parent {
        None => None,
        Some(ParentRef::Remote(remote)) => Some(remote.clone()),
        Some(ParentRef::Local(local)) => match graph.remote_id_for(local) {
            Some(remote) => Some(remote.clone()),
            None => return Err("parent must be committed first".to_string()),
        },
    };
    Ok(RecordBody {
        parent,
        name: entity.name.clone(),
        path: entity.path.clone(),
        attributes: entity.attributes.clone(),
        deleted_at: entity.deleted_at,
    })
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: usize,
    /// Records whose remote id was already seen in the snapshot
    pub duplicates: usize,
    /// Entities whose parent is absent from the snapshot
    pub orphans: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Local counterparts left alone because they hold unsynced work
    pub skipped: usize,
    /// Committed entities absent from the snapshot (kept as they are)
    pub missing: usize,
    pub orphans: usize,
}

// ============================================================================
// Load / merge
// ============================================================================

/// Replace the graph with an authoritative snapshot.
///
/// Two phases: insert every record and bind its identity, then resolve
/// parents once every mapping exists, so record order does not matter.
pub fn load(graph: &mut EntityGraph, records: &[RemoteRecord]) -> LoadReport {
    graph.clear();
    let mut report = LoadReport::default();

    let inserted = insert_records(graph, records.iter(), &mut report.duplicates);
    report.inserted = inserted.len();
    report.orphans = link(graph, &inserted);

    graph.diagnostics().info(
        DiagnosticCategory::Reconcile,
        None,
        format!(
            "loaded {} entities ({} duplicates, {} orphans)",
            report.inserted, report.duplicates, report.orphans
        ),
    );
    report
}

/// Fold a later snapshot into the graph.
///
/// Committed counterparts are overwritten (last write wins) unless listed in
/// `in_flight`. Unknown records are inserted and linked exactly as in
/// [`load`].
pub fn merge(
    graph: &mut EntityGraph,
    records: &[RemoteRecord],
    in_flight: &HashSet<LocalId>,
) -> MergeReport {
    let mut report = MergeReport::default();
    let mut seen: HashSet<&RemoteId> = HashSet::new();
    let mut fresh = Vec::new();

    for record in records {
        if !seen.insert(&record.id) {
            continue;
        }
        let Some(local) = graph.local_id_for(&record.id).cloned() else {
            fresh.push(record);
            continue;
        };
        match overwrite(graph, &local, &record.body, in_flight) {
            Overwrite::Updated => report.updated += 1,
            Overwrite::Unchanged => report.unchanged += 1,
            Overwrite::Skipped => report.skipped += 1,
        }
    }

    let mut duplicates = 0;
    let inserted = insert_records(graph, fresh.into_iter(), &mut duplicates);
    report.inserted = inserted.len();
    report.orphans = link(graph, &inserted);

    report.missing = graph
        .entities()
        .values()
        .filter(|e| e.status == EntityStatus::Committed)
        .filter(|e| e.remote_id.as_ref().is_some_and(|r| !seen.contains(r)))
        .count();

    graph.diagnostics().debug(
        DiagnosticCategory::Reconcile,
        None,
        format!(
            "merged snapshot: {} inserted, {} updated, {} unchanged, {} skipped, {} missing",
            report.inserted, report.updated, report.unchanged, report.skipped, report.missing
        ),
    );
    report
}

enum Overwrite {
    Updated,
    Unchanged,
    Skipped,
}

fn overwrite(
    graph: &mut EntityGraph,
    local: &LocalId,
    body: &RecordBody,
    in_flight: &HashSet<LocalId>,
) -> Overwrite {
    let Some(entity) = graph.entity_mut(local) else {
        return Overwrite::Skipped;
    };
    if entity.status.is_unsynced() || in_flight.contains(local) {
        return Overwrite::Skipped;
    }
    // Local edits and soft-deletes not yet synced win over the remote copy
    if entity.dirty {
        return Overwrite::Skipped;
    }

    let parent = body.parent.clone().map(ParentRef::Remote);
    let unchanged = entity.parent == parent
        && entity.name == body.name
        && entity.attributes == body.attributes
        && entity.deleted_at == body.deleted_at
        && (body.path.is_empty() || entity.path == body.path);

    if unchanged {
        return Overwrite::Unchanged;
    }

    entity.parent = parent;
    entity.name = body.name.clone();
    if !body.path.is_empty() {
        entity.path = body.path.clone();
    }
    entity.attributes = body.attributes.clone();
    entity.deleted_at = body.deleted_at;
    graph.reindex(local);
    graph
        .diagnostics()
        .debug(DiagnosticCategory::Reconcile, Some(local), "overwritten from remote");
    Overwrite::Updated
}

/// Phase one: insert and bind. Returns the new local ids.
fn insert_records<'a>(
    graph: &mut EntityGraph,
    records: impl Iterator<Item = &'a RemoteRecord>,
    duplicates: &mut usize,
) -> Vec<LocalId> {
    let mut inserted = Vec::new();
    for record in records {
        if graph.local_id_for(&record.id).is_some() {
            *duplicates += 1;
            graph.diagnostics().warn(
                DiagnosticCategory::Reconcile,
                None,
                format!("duplicate remote id {} in snapshot", record.id),
            );
            continue;
        }
        let entity = to_entity(record);
        let id = entity.local_id.clone();
        graph.insert_unindexed(entity);
        graph.bind_identity(&id, &record.id);
        inserted.push(id);
    }
    inserted
}

/// Phase two: derive missing paths and index against the complete mapping.
/// Returns how many entities still wait on an unknown parent.
fn link(graph: &mut EntityGraph, inserted: &[LocalId]) -> usize {
    let mut orphans = 0;
    for id in inserted {
        let needs_path = graph.get_entity_with_deleted(id).is_some_and(|e| e.path.is_empty());
        if needs_path {
            let path = derive_path(graph, id);
            if let Some(entity) = graph.entity_mut(id) {
                entity.path = path;
            }
        }
        graph.reindex(id);

        let orphaned = graph
            .get_entity_with_deleted(id)
            .and_then(|e| e.parent.as_ref())
            .and_then(ParentRef::remote)
            .is_some_and(|remote| graph.local_id_for(remote).is_none());
        if orphaned {
            orphans += 1;
        }
    }
    orphans
}

/// Path from the kinds along the resolved parent chain
fn derive_path(graph: &EntityGraph, id: &LocalId) -> String {
    let mut kinds = Vec::new();
    let mut current = graph.get_entity_with_deleted(id);
    while let Some(entity) = current {
        if kinds.len() >= MAX_DEPTH {
            graph.diagnostics().warn(
                DiagnosticCategory::Reconcile,
                Some(id),
                "parent chain too deep, path truncated",
            );
            break;
        }
        kinds.push(entity.kind().as_str());
        current = entity
            .parent
            .as_ref()
            .and_then(ParentRef::remote)
            .and_then(|remote| graph.local_id_for(remote))
            .and_then(|local| graph.get_entity_with_deleted(local));
    }
    kinds.reverse();
    kinds.join(".")
}

// ============================================================================
// Commit finalization
// ============================================================================

/// Bind `remote` to a pending entity and flip it to committed.
///
/// If a merge already inserted the same record under another local id, that
/// duplicate is dropped and the identity goes to the original entity.
pub fn finalize_commit(
    graph: &mut EntityGraph,
    id: &LocalId,
    remote: &RemoteId,
    sent: &Attributes,
) -> bool {
    let pending = graph
        .get_entity_with_deleted(id)
        .is_some_and(|e| e.status == EntityStatus::Pending);
    if !pending {
        graph.diagnostics().warn(
            DiagnosticCategory::Committed,
            Some(id),
            "commit result ignored: entity is no longer pending",
        );
        return false;
    }

    if let Some(duplicate) = graph.local_id_for(remote).cloned() {
        if &duplicate != id {
            graph.purge(&duplicate);
            graph.diagnostics().warn(
                DiagnosticCategory::Reconcile,
                Some(id),
                format!("dropped merge-inserted duplicate {} of {}", duplicate, remote),
            );
        }
    }

    if let Some(entity) = graph.entity_mut(id) {
        entity.status = EntityStatus::Committed;
        entity.validation_error = None;
        // Edits made while the create was in flight still need a sync
        entity.dirty = entity.attributes != *sent;
    }
    graph.bind_identity(id, remote);
    let children = graph.rewrite_child_refs(id, remote);
    if children > 0 {
        graph.diagnostics().debug(
            DiagnosticCategory::Reconcile,
            Some(id),
            format!("{} children now reference {}", children, remote),
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticsLog;
    use crate::entity::{AttributePatch, EntityKind};
    use serde_json::json;

    fn record(id: &str, parent: Option<&str>, kind: EntityKind) -> RemoteRecord {
        RemoteRecord::new(
            RemoteId::from_string(id),
            RecordBody {
                parent: parent.map(RemoteId::from_string),
                name: id.to_string(),
                path: String::new(),
                attributes: Attributes::defaults_for(kind),
                deleted_at: None,
            },
        )
    }

    fn graph() -> EntityGraph {
        EntityGraph::new(DiagnosticsLog::default())
    }

    #[test]
    fn test_load_is_order_independent() {
        let mut g = graph();
        let report = load(
            &mut g,
            &[
                record("r3", Some("r2"), EntityKind::Bin),
                record("r2", Some("r1"), EntityKind::Shelf),
                record("r1", None, EntityKind::Rack),
            ],
        );
        assert_eq!(report.inserted, 3);
        assert_eq!(report.orphans, 0);

        let rack = g.get_entity_by_remote(&RemoteId::from_string("r1")).unwrap().local_id.clone();
        let children = g.get_children(&rack);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].remote_id, Some(RemoteId::from_string("r2")));

        let bin = g.get_entity_by_remote(&RemoteId::from_string("r3")).unwrap();
        assert_eq!(bin.path, "rack.shelf.bin");
        assert_eq!(g.get_descendants(&rack).len(), 2);
    }

    #[test]
    fn test_load_skips_duplicate_remote_ids() {
        let mut g = graph();
        let report = load(
            &mut g,
            &[record("r1", None, EntityKind::Rack), record("r1", None, EntityKind::Rack)],
        );
        assert_eq!(report.duplicates, 1);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_merge_leaves_unsynced_work_alone() {
        let mut g = graph();
        load(&mut g, &[record("r1", None, EntityKind::Floor)]);
        let floor = g.get_entity_by_remote(&RemoteId::from_string("r1")).unwrap().local_id.clone();
        let draft = g
            .add_entity(
                EntityKind::Rack,
                Some(floor.into()),
                "A",
                Some(&AttributePatch::from_value(json!({ "levels": 7 })).unwrap()),
            )
            .id;
        let before = g.get_entity(&draft).unwrap().clone();

        let mut changed = record("r1", None, EntityKind::Floor);
        changed.body.name = "Hall B".into();
        let report = merge(&mut g, &[changed, record("r9", None, EntityKind::Obstacle)], &HashSet::new());

        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(g.get_entity(&draft).unwrap(), &before);
    }

    #[test]
    fn test_merge_skips_in_flight_entities() {
        let mut g = graph();
        load(&mut g, &[record("r1", None, EntityKind::Rack)]);
        let rack = g.local_id_for(&RemoteId::from_string("r1")).unwrap().clone();

        let mut changed = record("r1", None, EntityKind::Rack);
        changed.body.name = "renamed".into();
        let busy = HashSet::from([rack.clone()]);
        let report = merge(&mut g, &[changed], &busy);

        assert_eq!(report.skipped, 1);
        assert_eq!(g.get_entity(&rack).unwrap().name, "r1");
    }

    #[test]
    fn test_merge_keeps_unsynced_soft_delete() {
        let mut g = graph();
        load(&mut g, &[record("r1", None, EntityKind::Rack)]);
        let rack = g.local_id_for(&RemoteId::from_string("r1")).unwrap().clone();
        assert!(g.remove_entity(&rack, true));

        let report = merge(&mut g, &[record("r1", None, EntityKind::Rack)], &HashSet::new());

        assert_eq!(report.skipped, 1);
        let e = g.get_entity_with_deleted(&rack).unwrap();
        assert!(e.is_deleted());
        assert!(e.dirty);
        assert_eq!(g.get_dirty_entities().len(), 1);
    }

    #[test]
    fn test_merge_keeps_unsynced_edit() {
        let mut g = graph();
        load(&mut g, &[record("r1", None, EntityKind::Rack)]);
        let rack = g.local_id_for(&RemoteId::from_string("r1")).unwrap().clone();
        g.update_entity(&rack, &AttributePatch::from_value(json!({ "levels": 9 })).unwrap())
            .unwrap();
        let edited = g.get_entity(&rack).unwrap().attributes.clone();

        let mut changed = record("r1", None, EntityKind::Rack);
        changed.body.name = "renamed remotely".into();
        merge(&mut g, &[changed], &HashSet::new());

        let e = g.get_entity(&rack).unwrap();
        assert_eq!(e.attributes, edited);
        assert_eq!(e.name, "r1");
        assert!(e.dirty);
    }

    #[test]
    fn test_merge_leaves_pending_entity_alone() {
        let mut g = graph();
        let rack = g.add_entity(EntityKind::Rack, None, "A", None).id;
        g.begin_commit(&rack).unwrap();
        let before = g.get_entity(&rack).unwrap().clone();

        // The snapshot already holds the record the create call will return
        let mut remote = record("r1", None, EntityKind::Rack);
        remote.body.name = "A (remote)".into();
        remote.body.attributes = AttributePatch::from_value(json!({ "levels": 2 }))
            .and_then(|p| before.attributes.apply_patch(&p).ok())
            .unwrap();
        merge(&mut g, &[remote, record("r2", None, EntityKind::Obstacle)], &HashSet::new());

        let after = g.get_entity(&rack).unwrap();
        assert_eq!(after.local_id, before.local_id);
        assert_eq!(after.status, EntityStatus::Pending);
        assert_eq!(after.attributes, before.attributes);
        assert_eq!(after, &before);
    }

    #[test]
    fn test_merge_links_late_parent() {
        let mut g = graph();
        load(&mut g, &[record("r2", Some("r1"), EntityKind::Shelf)]);
        assert_eq!(g.get_unresolved_children(&RemoteId::from_string("r1")).len(), 1);

        merge(&mut g, &[record("r1", None, EntityKind::Rack)], &HashSet::new());
        let rack = g.local_id_for(&RemoteId::from_string("r1")).unwrap().clone();
        assert_eq!(g.get_children(&rack).len(), 1);
        assert!(g.get_unresolved_children(&RemoteId::from_string("r1")).is_empty());
    }

    #[test]
    fn test_to_record_requires_committed_parent() {
        let mut g = graph();
        let rack = g.add_entity(EntityKind::Rack, None, "R", None).id;
        let shelf = g.add_entity(EntityKind::Shelf, Some(rack.into()), "S", None).id;
        let err = to_record(&g, g.get_entity(&shelf).unwrap()).unwrap_err();
        assert!(err.contains("parent must be committed first"));
    }

    #[test]
    fn test_record_wire_shape() {
        let value = serde_json::to_value(record("r2", Some("r1"), EntityKind::Shelf)).unwrap();
        assert_eq!(value["id"], "r2");
        assert_eq!(value["parent"], "r1");
        assert_eq!(value["attributes"]["kind"], "shelf");
    }

    #[test]
    fn test_finalize_drops_duplicate_from_merge() {
        let mut g = graph();
        let rack = g.add_entity(EntityKind::Rack, None, "A", None).id;
        let sent = g.begin_commit(&rack).unwrap();

        // Snapshot arrives before the create call returns
        merge(&mut g, &[record("r1", None, EntityKind::Rack)], &HashSet::new());
        assert_eq!(g.len(), 2);

        assert!(finalize_commit(&mut g, &rack, &RemoteId::from_string("r1"), &sent));
        assert_eq!(g.len(), 1);
        let e = g.get_entity(&rack).unwrap();
        assert_eq!(e.status, EntityStatus::Committed);
        assert_eq!(g.local_id_for(&RemoteId::from_string("r1")), Some(&rack));
        assert!(!e.dirty);
    }
}
