//! Tests for EntityGraph

use super::*;
use crate::diagnostics::DiagnosticFilter;
use crate::entity::{Dimensions, Vec3};
use serde_json::json;

fn make_test_graph() -> EntityGraph {
    EntityGraph::new(DiagnosticsLog::default())
}

fn patch(value: serde_json::Value) -> AttributePatch {
    AttributePatch::from_value(value).unwrap()
}

/// Commit `id` as `remote` the way the pipeline does
fn make_committed(graph: &mut EntityGraph, id: &LocalId, remote: &str) {
    graph.begin_commit(id).unwrap();
    let remote = RemoteId::from_string(remote);
    graph.entity_mut(id).unwrap().status = EntityStatus::Committed;
    graph.bind_identity(id, &remote);
    graph.rewrite_child_refs(id, &remote);
}

#[test]
fn test_add_entity_merges_over_defaults() {
    let mut g = make_test_graph();
    let created = g.add_entity(
        EntityKind::Rack,
        None,
        "A1",
        Some(&patch(json!({ "levels": 6, "geometry": { "rotation_deg": 90.0 } }))),
    );
    assert!(created.is_valid());

    let rack = g.get_entity(&created.id).unwrap();
    assert_eq!(rack.status, EntityStatus::Draft);
    assert_eq!(rack.path, "rack");
    let Attributes::Rack(attrs) = &rack.attributes else {
        panic!("wrong kind");
    };
    assert_eq!(attrs.levels, 6);
    assert_eq!(attrs.max_load_kg, 1000.0);
    assert_eq!(g.get_entities_by_type(EntityKind::Rack).len(), 1);
    assert_eq!(g.get_entities_by_path("rack").len(), 1);
    assert_eq!(g.spatial().len(), 1);
}

#[test]
fn test_add_entity_with_invalid_attributes_still_creates() {
    let mut g = make_test_graph();
    let created = g.add_entity(
        EntityKind::Bin,
        None,
        "B",
        Some(&AttributePatch::new().dimensions(Dimensions::new(0.0, 1.0, 1.0))),
    );
    assert_eq!(created.issues[0].path, "geometry.dimensions.width");
    assert!(g.get_entity(&created.id).is_some());

    let warnings = g
        .diagnostics()
        .count(&DiagnosticFilter::new().category(DiagnosticCategory::Validation));
    assert_eq!(warnings, 1);
}

#[test]
fn test_rejected_patch_leaves_defaults() {
    let mut g = make_test_graph();
    let created = g.add_entity(EntityKind::Bin, None, "B", Some(&patch(json!({ "kind": "rack" }))));
    assert_eq!(created.issues.len(), 1);
    assert_eq!(
        g.get_entity(&created.id).unwrap().attributes,
        Attributes::defaults_for(EntityKind::Bin)
    );
}

#[test]
fn test_update_moves_spatial_entry() {
    let mut g = make_test_graph();
    let id = g.add_entity(EntityKind::Obstacle, None, "pillar", None).id;
    let issues = g
        .update_entity(&id, &AttributePatch::new().position(EntityKind::Obstacle, Vec3::new(4.0, 0.0, 2.0)))
        .unwrap();
    assert!(issues.is_empty());
    assert_eq!(g.spatial().get(&id).unwrap().bounds.min.x, 4.0);
    assert!(g.get_entity(&id).unwrap().dirty);

    assert!(g.update_entity(&LocalId::from_string("missing"), &AttributePatch::new()).is_none());
}

#[test]
fn test_children_follow_parent_commit() {
    let mut g = make_test_graph();
    let rack = g.add_entity(EntityKind::Rack, None, "R", None).id;
    let shelf = g.add_entity(EntityKind::Shelf, Some(rack.clone().into()), "S", None).id;
    assert_eq!(g.get_entity(&shelf).unwrap().path, "rack.shelf");
    assert_eq!(g.get_children(&rack).len(), 1);

    make_committed(&mut g, &rack, "r1");

    let child = g.get_entity(&shelf).unwrap();
    assert_eq!(child.parent, Some(ParentRef::Remote(RemoteId::from_string("r1"))));
    assert_eq!(g.get_children(&rack).len(), 1);
    assert_eq!(g.parent_key_of(&shelf), Some(&ParentKey::Local(rack.clone())));

    // New children of a committed parent get the remote form straight away
    let bin = g.add_entity(EntityKind::Bin, Some(shelf.clone().into()), "B", None).id;
    assert_eq!(g.get_entity(&bin).unwrap().path, "rack.shelf.bin");
    let late = g.add_entity(EntityKind::Shelf, Some(rack.clone().into()), "S2", None).id;
    assert_eq!(
        g.get_entity(&late).unwrap().parent,
        Some(ParentRef::Remote(RemoteId::from_string("r1")))
    );
}

#[test]
fn test_soft_delete_skips_pending() {
    let mut g = make_test_graph();
    let rack = g.add_entity(EntityKind::Rack, None, "R", None).id;
    g.begin_commit(&rack).unwrap();
    assert!(!g.remove_entity(&rack, true));
    assert!(g.get_entity(&rack).is_some());
}

#[test]
fn test_hard_remove_discards_drafts_and_soft_deletes_committed() {
    let mut g = make_test_graph();
    let floor = g.add_entity(EntityKind::Floor, None, "F", None).id;
    make_committed(&mut g, &floor, "f1");
    let rack = g.add_entity(EntityKind::Rack, Some(floor.clone().into()), "R", None).id;

    assert!(g.remove_entity(&rack, false));
    assert!(g.get_entity_with_deleted(&rack).is_none());

    assert!(g.remove_entity(&floor, false));
    let floor_entity = g.get_entity_with_deleted(&floor).unwrap();
    assert!(floor_entity.is_deleted());
    assert_eq!(g.get_deleted_entities().len(), 1);
}

#[test]
fn test_discard_cascades_to_draft_children() {
    let mut g = make_test_graph();
    let rack = g.add_entity(EntityKind::Rack, None, "R", None).id;
    let shelf = g.add_entity(EntityKind::Shelf, Some(rack.clone().into()), "S", None).id;

    assert!(g.discard_entity(&rack));
    assert!(g.get_entity_with_deleted(&shelf).is_none());
    assert!(g.is_empty());
    assert!(g.spatial().is_empty());
    assert!(g.get_entities_by_type(EntityKind::Shelf).is_empty());
}

#[test]
fn test_discard_committed_is_refused() {
    let mut g = make_test_graph();
    let rack = g.add_entity(EntityKind::Rack, None, "R", None).id;
    make_committed(&mut g, &rack, "r1");
    assert!(!g.discard_entity(&rack));
    assert_eq!(g.len(), 1);
}

#[test]
fn test_descendants_and_dirty() {
    let mut g = make_test_graph();
    let rack = g.add_entity(EntityKind::Rack, None, "R", None).id;
    let shelf = g.add_entity(EntityKind::Shelf, Some(rack.clone().into()), "S", None).id;
    g.add_entity(EntityKind::Bin, Some(shelf.into()), "B", None);

    assert_eq!(g.get_descendants(&rack).len(), 2);
    assert!(g.get_dirty_entities().is_empty());

    make_committed(&mut g, &rack, "r1");
    assert_eq!(g.get_dirty_entities().len(), 1);
    g.mark_clean(&rack);
    assert!(g.get_dirty_entities().is_empty());
}

#[test]
fn test_restore_rebuilds_everything() {
    let mut g = make_test_graph();
    let rack = g.add_entity(EntityKind::Rack, None, "R", None).id;
    make_committed(&mut g, &rack, "r1");
    let shelf = g.add_entity(EntityKind::Shelf, Some(rack.clone().into()), "S", None).id;
    let saved = g.entities().clone();

    g.clear();
    assert!(g.is_empty());
    assert!(g.get_entity_by_remote(&RemoteId::from_string("r1")).is_none());

    g.restore(saved);
    assert_eq!(g.get_entity_by_remote(&RemoteId::from_string("r1")).unwrap().local_id, rack);
    assert_eq!(g.get_children(&rack)[0].local_id, shelf);
    assert_eq!(g.spatial().len(), 1);
}

#[test]
fn test_purge_returns_children_to_unresolved() {
    let mut g = make_test_graph();
    let rack = g.add_entity(EntityKind::Rack, None, "R", None).id;
    make_committed(&mut g, &rack, "r1");
    let shelf = g.add_entity(EntityKind::Shelf, Some(rack.clone().into()), "S", None).id;

    assert!(g.purge(&rack).is_some());
    let unresolved = g.get_unresolved_children(&RemoteId::from_string("r1"));
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].local_id, shelf);
    assert!(g.remote_id_for(&rack).is_none());
}

#[test]
fn test_bind_refuses_second_owner() {
    let mut g = make_test_graph();
    let a = g.add_entity(EntityKind::Marker, None, "a", None).id;
    let b = g.add_entity(EntityKind::Marker, None, "b", None).id;
    let remote = RemoteId::from_string("r1");
    assert!(g.bind_identity(&a, &remote));
    assert!(!g.bind_identity(&b, &remote));
    assert_eq!(g.local_id_for(&remote), Some(&a));
    assert!(g.get_entity(&b).unwrap().remote_id.is_none());
}

#[test]
fn test_ghost_is_outside_the_map() {
    let mut g = make_test_graph();
    let ghost = g.begin_ghost(EntityKind::Rack, None);
    assert!(g.is_empty());
    assert!(g.get_entity(&ghost).is_none());
    assert_eq!(g.ghost().unwrap().status, EntityStatus::Ghost);

    assert!(g.move_ghost(Vec3::new(3.0, 0.0, 3.0)));
    let issues = g.patch_ghost(&patch(json!({ "levels": 2 }))).unwrap();
    assert!(issues.is_empty());

    let id = g.confirm_ghost().unwrap();
    assert_eq!(id, ghost);
    let rack = g.get_entity(&id).unwrap();
    assert_eq!(rack.status, EntityStatus::Draft);
    assert_eq!(rack.attributes.position(), Vec3::new(3.0, 0.0, 3.0));
    assert_eq!(g.spatial().len(), 1);

    g.begin_ghost(EntityKind::Bin, None);
    assert!(g.cancel_ghost());
    assert!(!g.cancel_ghost());
    assert!(!g.move_ghost(Vec3::default()));
}

#[test]
fn test_locked_entity_only_accepts_unlock() {
    let mut g = make_test_graph();
    let rack = g.add_entity(EntityKind::Rack, None, "R", Some(&patch(json!({ "locked": true })))).id;

    let issues = g
        .update_entity(&rack, &AttributePatch::new().position(EntityKind::Rack, Vec3::new(9.0, 0.0, 0.0)))
        .unwrap();
    assert_eq!(issues[0].path, "locked");
    assert_eq!(g.get_entity(&rack).unwrap().attributes.position(), Vec3::default());

    assert!(g.update_entity(&rack, &patch(json!({ "locked": false }))).unwrap().is_empty());
    assert!(g
        .update_entity(&rack, &AttributePatch::new().position(EntityKind::Rack, Vec3::new(9.0, 0.0, 0.0)))
        .unwrap()
        .is_empty());
    assert_eq!(g.get_entity(&rack).unwrap().attributes.position().x, 9.0);
}

#[test]
fn test_soft_delete_refused_with_pending_descendant() {
    let mut g = make_test_graph();
    let rack = g.add_entity(EntityKind::Rack, None, "R", None).id;
    make_committed(&mut g, &rack, "r1");
    let shelf = g.add_entity(EntityKind::Shelf, Some(rack.clone().into()), "S", None).id;
    g.begin_commit(&shelf).unwrap();

    assert!(!g.remove_entity(&rack, true));
    assert!(g.get_deleted_entities().is_empty());
}
