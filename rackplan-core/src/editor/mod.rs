//! LayoutEditor - the layout engine as one explicitly constructed object
//!
//! Owns the shared state (graph, history, tickets, scope) and exposes the
//! placement-intent API to the UI. Local intents are synchronous; commit and
//! sync are async and release the state lock while the remote store works.
//! A background task feeds remote snapshots in while connected.

use futures::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

use crate::commit::CommitPipeline;
use crate::diagnostics::{DiagnosticCategory, DiagnosticsLog, DEFAULT_DIAGNOSTICS_CAPACITY};
use crate::entity::{AttributeIssue, AttributePatch, Entity, EntityKind, ParentRef, Vec3};
use crate::error::CommitError;
use crate::graph::{EntityCreated, EntityGraph, EntityMap};
use crate::history::DEFAULT_HISTORY_DEPTH;
use crate::ids::{LocalId, ScopeId};
use crate::placement::{
    PlacementCandidate, PlacementValidator, PlacementVerdict, DEFAULT_OVERLAP_TOLERANCE,
};
use crate::reconcile::{self, LoadReport, MergeReport, RemoteRecord};
use crate::remote::{RemoteStore, SnapshotStream};
use crate::state::{lock, LayoutState, SharedLayout};
use crate::tickets::{MutationTicket, DEFAULT_SETTLED_CAPACITY};

// ============================================================================
// Options
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct EditorOptions {
    pub history_depth: usize,
    pub diagnostics_capacity: usize,
    pub overlap_tolerance: f64,
    pub settled_ticket_capacity: usize,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
            overlap_tolerance: DEFAULT_OVERLAP_TOLERANCE,
            settled_ticket_capacity: DEFAULT_SETTLED_CAPACITY,
        }
    }
}

impl From<&config::LayoutSettings> for EditorOptions {
    fn from(settings: &config::LayoutSettings) -> Self {
        Self {
            history_depth: settings.history_depth,
            diagnostics_capacity: settings.diagnostics_capacity,
            overlap_tolerance: settings.overlap_tolerance,
            settled_ticket_capacity: settings.settled_ticket_capacity,
        }
    }
}

/// What applying one subscription value did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// No scope bound, or the value belongs to a previous scope
    Ignored,
    /// The store is still loading
    Loading,
    /// First authoritative snapshot: the graph was rebuilt
    Loaded(LoadReport),
    /// Later snapshot folded into the graph
    Merged(MergeReport),
}

/// Apply a subscription value for `scope` to the shared state
fn apply_snapshot_to(
    shared: &SharedLayout,
    scope: &ScopeId,
    snapshot: Option<Vec<RemoteRecord>>,
) -> SnapshotOutcome {
    let mut guard = lock(shared);
    let state = &mut *guard;
    if state.scope.as_ref() != Some(scope) {
        return SnapshotOutcome::Ignored;
    }
    let Some(records) = snapshot else {
        state
            .graph
            .diagnostics()
            .debug(DiagnosticCategory::Reconcile, None, "remote store still loading");
        return SnapshotOutcome::Loading;
    };

    if state.loaded {
        let in_flight = state.tickets.in_flight();
        SnapshotOutcome::Merged(reconcile::merge(&mut state.graph, &records, &in_flight))
    } else {
        let report = reconcile::load(&mut state.graph, &records);
        state.loaded = true;
        // Whatever was in flight belonged to the wiped graph
        state.tickets.clear();
        state.history.reset(state.graph.entities());
        SnapshotOutcome::Loaded(report)
    }
}

async fn subscription_loop(shared: SharedLayout, scope: ScopeId, mut stream: SnapshotStream) {
    while let Some(snapshot) = stream.next().await {
        if apply_snapshot_to(&shared, &scope, snapshot) == SnapshotOutcome::Ignored {
            break;
        }
    }
    tracing::debug!(scope = %scope, "subscription loop finished");
}

// ============================================================================
// LayoutEditor
// ============================================================================

pub struct LayoutEditor<R: RemoteStore> {
    state: SharedLayout,
    remote: Arc<R>,
    pipeline: CommitPipeline<R>,
    diagnostics: DiagnosticsLog,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RemoteStore> LayoutEditor<R> {
    pub fn new(remote: Arc<R>, options: EditorOptions) -> Self {
        let diagnostics = DiagnosticsLog::new(options.diagnostics_capacity);
        let state = LayoutState::new(
            diagnostics.clone(),
            options.history_depth,
            options.settled_ticket_capacity,
        );
        let validator = PlacementValidator::new(options.overlap_tolerance);
        let pipeline = CommitPipeline::new(Arc::clone(&remote), validator, diagnostics.clone());

        Self {
            state: Arc::new(Mutex::new(state)),
            remote,
            pipeline,
            diagnostics,
            subscription: Mutex::new(None),
        }
    }

    pub fn diagnostics(&self) -> &DiagnosticsLog {
        &self.diagnostics
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Run a read-only closure against the graph
    pub fn with_graph<T>(&self, f: impl FnOnce(&EntityGraph) -> T) -> T {
        f(&lock(&self.state).graph)
    }

    /// Run a mutating closure against the state, then record history
    fn mutate<T>(&self, f: impl FnOnce(&mut EntityGraph) -> T) -> T {
        let mut guard = lock(&self.state);
        let result = f(&mut guard.graph);
        guard.record_history();
        result
    }

    // ========================================================================
    // Scope lifecycle
    // ========================================================================

    /// Bind to `scope` and start applying its snapshots in the background.
    ///
    /// The first authoritative snapshot after connecting is a full load.
    pub async fn connect(&self, scope: ScopeId) -> anyhow::Result<()> {
        self.disconnect();
        self.bind_scope(scope.clone());

        let stream = match self.remote.subscribe(&scope).await {
            Ok(stream) => stream,
            Err(err) => {
                self.diagnostics.error(
                    DiagnosticCategory::Lifecycle,
                    None,
                    format!("subscribe to {} failed: {:#}", scope, err),
                );
                self.disconnect();
                return Err(err);
            }
        };
        let state_clone = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            subscription_loop(state_clone, scope, stream).await;
        });
        *self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Bind to `scope` without subscribing; feed it with [`Self::apply_snapshot`]
    pub fn bind_scope(&self, scope: ScopeId) {
        let mut guard = lock(&self.state);
        self.diagnostics.info(
            DiagnosticCategory::Lifecycle,
            None,
            format!("bound to scope {}", scope),
        );
        guard.scope = Some(scope);
        guard.loaded = false;
    }

    /// Stop the subscription. The next connect performs a full load.
    pub fn disconnect(&self) {
        let handle = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }

        let mut guard = lock(&self.state);
        if let Some(scope) = guard.scope.take() {
            self.diagnostics.info(
                DiagnosticCategory::Lifecycle,
                None,
                format!("disconnected from scope {}", scope),
            );
        }
        guard.loaded = false;
    }

    pub fn scope(&self) -> Option<ScopeId> {
        lock(&self.state).scope.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).scope.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.state).loaded
    }

    /// Apply one subscription value for the bound scope
    pub fn apply_snapshot(&self, snapshot: Option<Vec<RemoteRecord>>) -> SnapshotOutcome {
        let Some(scope) = self.scope() else {
            return SnapshotOutcome::Ignored;
        };
        apply_snapshot_to(&self.state, &scope, snapshot)
    }

    // ========================================================================
    // Placement intents
    // ========================================================================

    pub fn begin_ghost(&self, kind: EntityKind, parent: Option<ParentRef>) -> LocalId {
        lock(&self.state).graph.begin_ghost(kind, parent)
    }

    pub fn move_ghost(&self, position: Vec3) -> bool {
        lock(&self.state).graph.move_ghost(position)
    }

    pub fn patch_ghost(&self, patch: &AttributePatch) -> Option<Vec<AttributeIssue>> {
        lock(&self.state).graph.patch_ghost(patch)
    }

    pub fn confirm_ghost(&self) -> Option<LocalId> {
        self.mutate(|graph| graph.confirm_ghost())
    }

    pub fn cancel_ghost(&self) -> bool {
        lock(&self.state).graph.cancel_ghost()
    }

    pub fn ghost(&self) -> Option<Entity> {
        lock(&self.state).graph.ghost().cloned()
    }

    /// Live placement feedback for the current ghost
    pub fn validate_ghost(&self) -> Option<PlacementVerdict> {
        let guard = lock(&self.state);
        let ghost = guard.graph.ghost()?;
        let candidate = PlacementCandidate {
            id: None,
            attributes: &ghost.attributes,
            parent: ghost.parent.as_ref(),
        };
        Some(self.pipeline.validator().validate(&guard.graph, &candidate))
    }

    pub fn add_entity(
        &self,
        kind: EntityKind,
        parent: Option<ParentRef>,
        name: impl Into<String>,
        attrs: Option<&AttributePatch>,
    ) -> EntityCreated {
        self.mutate(|graph| graph.add_entity(kind, parent, name, attrs))
    }

    pub fn update_entity(&self, id: &LocalId, patch: &AttributePatch) -> Option<Vec<AttributeIssue>> {
        self.mutate(|graph| graph.update_entity(id, patch))
    }

    pub fn remove_entity(&self, id: &LocalId, soft: bool) -> bool {
        self.mutate(|graph| graph.remove_entity(id, soft))
    }

    pub fn discard_entity(&self, id: &LocalId) -> bool {
        self.mutate(|graph| graph.discard_entity(id))
    }

    pub fn validate_placement(&self, id: &LocalId) -> Option<PlacementVerdict> {
        let guard = lock(&self.state);
        self.pipeline.validator().validate_entity(&guard.graph, id)
    }

    // ========================================================================
    // Commit / sync
    // ========================================================================

    pub async fn commit_entity(&self, id: &LocalId) -> Result<(), CommitError> {
        self.pipeline.commit(&self.state, id).await
    }

    pub async fn sync_entity(&self, id: &LocalId) -> Result<(), CommitError> {
        self.pipeline.sync(&self.state, id).await
    }

    /// Commit every draft and errored entity, parents before children.
    /// Returns the failures; the rest were committed.
    pub async fn commit_all(&self) -> Vec<(LocalId, CommitError)> {
        let mut ids: Vec<(usize, LocalId)> = self.with_graph(|graph| {
            graph
                .entities()
                .values()
                .filter(|e| !e.is_deleted() && e.status.is_committable())
                .map(|e| (e.path.matches('.').count(), e.local_id.clone()))
                .collect()
        });
        ids.sort();

        let mut failures = Vec::new();
        for (_, id) in ids {
            if let Err(err) = self.commit_entity(&id).await {
                failures.push((id, err));
            }
        }
        failures
    }

    /// Sync every dirty committed entity. Updates run parents first, deletes
    /// children first.
    pub async fn sync_dirty(&self) -> Vec<(LocalId, CommitError)> {
        let (mut updates, mut deletes) = self.with_graph(|graph| {
            let mut updates = Vec::new();
            let mut deletes = Vec::new();
            for e in graph.get_dirty_entities() {
                let depth = e.path.matches('.').count();
                if e.is_deleted() {
                    deletes.push((depth, e.local_id.clone()));
                } else {
                    updates.push((depth, e.local_id.clone()));
                }
            }
            (updates, deletes)
        });
        updates.sort();
        deletes.sort_by(|a, b| b.cmp(a));

        let mut failures = Vec::new();
        for (_, id) in updates.into_iter().chain(deletes) {
            if let Err(err) = self.sync_entity(&id).await {
                failures.push((id, err));
            }
        }
        failures
    }

    // ========================================================================
    // History
    // ========================================================================

    pub fn undo(&self) -> bool {
        self.step_history(true)
    }

    pub fn redo(&self) -> bool {
        self.step_history(false)
    }

    fn step_history(&self, back: bool) -> bool {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let verb = if back { "undo" } else { "redo" };

        let in_flight = state.tickets.open_count();
        if in_flight > 0 {
            self.diagnostics.warn(
                DiagnosticCategory::History,
                None,
                format!("{} refused: {} mutations in flight", verb, in_flight),
            );
            return false;
        }

        let target = if back {
            state.history.undo()
        } else {
            state.history.redo()
        };
        match target {
            Some(snapshot) => {
                let dropped = state
                    .graph
                    .identity_pairs()
                    .filter(|(local, _)| {
                        snapshot
                            .get(*local)
                            .and_then(|e| e.remote_id.as_ref())
                            .is_none()
                    })
                    .count();
                if dropped > 0 {
                    self.diagnostics.warn(
                        DiagnosticCategory::History,
                        None,
                        format!(
                            "{} drops {} remote bindings; the next snapshot re-adds them as new entities",
                            verb, dropped
                        ),
                    );
                }
                state.graph.restore(EntityMap::clone(&snapshot));
                self.diagnostics
                    .info(DiagnosticCategory::History, None, format!("{} applied", verb));
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        lock(&self.state).history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        lock(&self.state).history.can_redo()
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub fn get_entity(&self, id: &LocalId) -> Option<Entity> {
        self.with_graph(|g| g.get_entity(id).cloned())
    }

    pub fn get_children(&self, id: &LocalId) -> Vec<Entity> {
        self.with_graph(|g| g.get_children(id).into_iter().cloned().collect())
    }

    pub fn get_entities_by_type(&self, kind: EntityKind) -> Vec<Entity> {
        self.with_graph(|g| g.get_entities_by_type(kind).into_iter().cloned().collect())
    }

    pub fn get_draft_entities(&self) -> Vec<Entity> {
        self.with_graph(|g| g.get_draft_entities().into_iter().cloned().collect())
    }

    pub fn get_dirty_entities(&self) -> Vec<Entity> {
        self.with_graph(|g| g.get_dirty_entities().into_iter().cloned().collect())
    }

    /// Copy of the full entity map, soft-deleted entities included
    pub fn snapshot(&self) -> EntityMap {
        self.with_graph(|g| g.entities().clone())
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.state).tickets.open_count()
    }

    pub fn settled_tickets(&self) -> Vec<MutationTicket> {
        lock(&self.state).tickets.settled().cloned().collect()
    }
}

impl<R: RemoteStore> Drop for LayoutEditor<R> {
    fn drop(&mut self) {
        let handle = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
