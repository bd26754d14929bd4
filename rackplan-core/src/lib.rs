//! Layout engine for the rackplan warehouse editor
//!
//! This crate provides:
//! - **Graph**: `EntityGraph`, the indexed store of floors, racks, shelves, bins
//! - **Placement**: `PlacementValidator` for bounds, overlap and hierarchy checks
//! - **Reconciliation**: record conversion plus `load`/`merge` of remote snapshots
//! - **Commit**: `CommitPipeline` driving draft -> pending -> committed|error
//! - **History**: `HistoryManager` for snapshot undo/redo
//! - **Diagnostics**: `DiagnosticsLog`, a bounded, filterable event log
//! - **Editor**: `LayoutEditor`, composing all of the above over a `RemoteStore`
//!
//! # Example
//!
//! ```ignore
//! use rackplan_core::{EditorOptions, EntityKind, LayoutEditor, MemoryRemoteStore};
//!
//! let editor = LayoutEditor::new(Arc::new(MemoryRemoteStore::new()), EditorOptions::default());
//! editor.connect(ScopeId::from_string("site-1")).await?;
//! let rack = editor.add_entity(EntityKind::Rack, None, "A1", None).id;
//! editor.commit_entity(&rack).await?;
//! ```
pub mod commit;
pub mod diagnostics;
pub mod editor;
pub mod entity;
pub mod error;
pub mod graph;
pub mod history;
pub mod ids;
pub mod placement;
pub mod reconcile;
pub mod remote;
pub mod state;
pub mod tickets;

pub use commit::CommitPipeline;
pub use diagnostics::{
    DiagnosticCategory, DiagnosticEvent, DiagnosticFilter, DiagnosticLevel, DiagnosticsLog,
};
pub use editor::{EditorOptions, LayoutEditor, SnapshotOutcome};
pub use entity::{
    AttributeIssue, AttributePatch, Attributes, Dimensions, Entity, EntityKind, EntityStatus,
    Geometry, ParentRef, Vec3,
};
pub use error::CommitError;
pub use graph::{EntityCreated, EntityGraph, EntityMap, ParentKey};
pub use history::HistoryManager;
pub use ids::{LocalId, RemoteId, ScopeId, TicketId};
pub use placement::{PlacementCandidate, PlacementValidator, PlacementVerdict, Violation};
pub use reconcile::{LoadReport, MergeReport, RecordBody, RemoteRecord};
pub use remote::{MemoryRemoteStore, RemoteStore};
pub use tickets::{MutationOp, MutationTicket, TicketLedger, TicketOutcome};
