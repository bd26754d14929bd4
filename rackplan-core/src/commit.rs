//! Commit pipeline
//!
//! Drives one entity through `draft/error -> pending -> committed|error`, and
//! pushes later changes of committed entities (update or delete). Each call
//! takes the state lock twice: once to check and mark the entity and open a
//! ticket, once to apply the reply. The remote call runs in between with the
//! lock released, so snapshots and other commits proceed meanwhile.

use std::sync::Arc;

use crate::diagnostics::{DiagnosticCategory, DiagnosticsLog};
use crate::entity::{describe_issues, Attributes, EntityStatus};
use crate::error::CommitError;
use crate::ids::{LocalId, RemoteId, ScopeId, TicketId};
use crate::placement::{PlacementCandidate, PlacementValidator, PlacementVerdict, Violation};
use crate::reconcile::{self, RecordBody};
use crate::remote::RemoteStore;
use crate::state::{lock, LayoutState, SharedLayout};
use crate::tickets::{MutationOp, TicketOutcome};

pub struct CommitPipeline<R: RemoteStore> {
    remote: Arc<R>,
    validator: PlacementValidator,
    diagnostics: DiagnosticsLog,
}

/// Everything captured under the lock before a create call
struct PreparedCreate {
    scope: ScopeId,
    body: RecordBody,
    sent: Attributes,
    ticket: TicketId,
}

/// Everything captured under the lock before an update or delete call
struct PreparedSync {
    remote: RemoteId,
    body: Option<RecordBody>,
    ticket: TicketId,
}

impl<R: RemoteStore> CommitPipeline<R> {
    pub fn new(remote: Arc<R>, validator: PlacementValidator, diagnostics: DiagnosticsLog) -> Self {
        Self {
            remote,
            validator,
            diagnostics,
        }
    }

    pub fn validator(&self) -> &PlacementValidator {
        &self.validator
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Persist a draft or errored entity.
    ///
    /// Missing entities and wrong states are a logged no-op. Placement
    /// failures leave the entity untouched. Remote failures put it in
    /// `error` and are returned after bookkeeping.
    pub async fn commit(&self, shared: &SharedLayout, id: &LocalId) -> Result<(), CommitError> {
        let prepared = {
            let mut guard = lock(shared);
            match self.prepare_create(&mut guard, id)? {
                Some(prepared) => prepared,
                None => return Ok(()),
            }
        };

        let result = self.remote.create(&prepared.scope, prepared.body).await;

        let mut guard = lock(shared);
        let state = &mut *guard;
        match result {
            Ok(remote) => {
                let finalized =
                    reconcile::finalize_commit(&mut state.graph, id, &remote, &prepared.sent);
                state
                    .tickets
                    .settle(&prepared.ticket, TicketOutcome::Succeeded(remote.clone()));
                if finalized {
                    self.diagnostics.info(
                        DiagnosticCategory::Committed,
                        Some(id),
                        format!("committed as {}", remote),
                    );
                    state.record_history();
                }
                Ok(())
            }
            Err(err) => {
                let message = format!("{:#}", err);
                state.graph.mark_error(id, &message);
                state
                    .tickets
                    .settle(&prepared.ticket, TicketOutcome::Failed(message.clone()));
                self.diagnostics.error(
                    DiagnosticCategory::Error,
                    Some(id),
                    format!("commit failed: {}", message),
                );
                state.record_history();
                Err(CommitError::Remote { message })
            }
        }
    }

    fn prepare_create(
        &self,
        state: &mut LayoutState,
        id: &LocalId,
    ) -> Result<Option<PreparedCreate>, CommitError> {
        let Some(entity) = state.graph.get_entity(id) else {
            self.diagnostics
                .warn(DiagnosticCategory::Committed, Some(id), "commit ignored: entity not found");
            return Ok(None);
        };
        if !entity.status.is_committable() {
            self.diagnostics.warn(
                DiagnosticCategory::Committed,
                Some(id),
                format!("commit ignored: entity is {}", entity.status),
            );
            return Ok(None);
        }
        let Some(scope) = state.scope.clone() else {
            self.diagnostics
                .warn(DiagnosticCategory::Committed, Some(id), "commit refused: not connected");
            return Err(CommitError::Disconnected);
        };

        let issues = entity.attributes.validate();
        if !issues.is_empty() {
            let reason = format!("invalid attributes: {}", describe_issues(&issues));
            self.diagnostics
                .warn(DiagnosticCategory::Validation, Some(id), reason.clone());
            return Err(CommitError::placement(reason));
        }

        if entity.kind().is_collidable() {
            let verdict = self
                .validator
                .validate(&state.graph, &PlacementCandidate::from_entity(entity));
            self.check_verdict(id, verdict)?;
        }

        let body = reconcile::to_record(&state.graph, entity).map_err(|reason| {
            self.diagnostics
                .warn(DiagnosticCategory::Validation, Some(id), reason.clone());
            CommitError::placement(reason)
        })?;

        let Some(sent) = state.graph.begin_commit(id) else {
            return Ok(None);
        };
        let ticket = state.tickets.open(id, MutationOp::Create, Some(sent.clone()));
        self.diagnostics
            .debug(DiagnosticCategory::Lifecycle, Some(id), "commit started");

        Ok(Some(PreparedCreate {
            scope,
            body,
            sent,
            ticket,
        }))
    }

    fn check_verdict(&self, id: &LocalId, verdict: PlacementVerdict) -> Result<(), CommitError> {
        match verdict {
            PlacementVerdict::Allowed => Ok(()),
            PlacementVerdict::Rejected { violation, reason } => {
                let category = match violation {
                    Violation::Overlap => DiagnosticCategory::Collision,
                    Violation::OutOfBounds | Violation::Hierarchy => DiagnosticCategory::Validation,
                };
                self.diagnostics.warn(category, Some(id), reason.clone());
                Err(CommitError::Placement { reason })
            }
        }
    }

    // ========================================================================
    // Sync existing
    // ========================================================================

    /// Push a committed entity's local changes: update if live, delete if
    /// soft-deleted (purging it locally once the store confirms).
    ///
    /// A no-op when the entity has no remote identifier yet. On failure the
    /// entity stays committed and dirty so the sync can be retried.
    pub async fn sync(&self, shared: &SharedLayout, id: &LocalId) -> Result<(), CommitError> {
        let prepared = {
            let mut guard = lock(shared);
            match self.prepare_sync(&mut guard, id)? {
                Some(prepared) => prepared,
                None => return Ok(()),
            }
        };

        let is_delete = prepared.body.is_none();
        let sent = prepared.body.as_ref().map(|b| b.attributes.clone());
        let result = match prepared.body {
            Some(body) => self.remote.update(&prepared.remote, body).await,
            None => self.remote.delete(&prepared.remote).await,
        };

        let mut guard = lock(shared);
        let state = &mut *guard;
        match result {
            Ok(()) => {
                state.tickets.settle(
                    &prepared.ticket,
                    TicketOutcome::Succeeded(prepared.remote.clone()),
                );
                if is_delete {
                    state.graph.purge(id);
                    self.diagnostics
                        .info(DiagnosticCategory::Synced, Some(id), "deleted remotely");
                } else {
                    let unchanged = state
                        .graph
                        .get_entity_with_deleted(id)
                        .is_some_and(|e| !e.is_deleted() && Some(&e.attributes) == sent.as_ref());
                    if unchanged {
                        state.graph.mark_clean(id);
                    }
                    self.diagnostics
                        .info(DiagnosticCategory::Synced, Some(id), "updated remotely");
                }
                state.record_history();
                Ok(())
            }
            Err(err) => {
                let message = format!("{:#}", err);
                state
                    .tickets
                    .settle(&prepared.ticket, TicketOutcome::Failed(message.clone()));
                self.diagnostics.error(
                    DiagnosticCategory::Error,
                    Some(id),
                    format!("sync failed: {}", message),
                );
                Err(CommitError::Remote { message })
            }
        }
    }

    fn prepare_sync(
        &self,
        state: &mut LayoutState,
        id: &LocalId,
    ) -> Result<Option<PreparedSync>, CommitError> {
        let Some(entity) = state.graph.get_entity_with_deleted(id) else {
            self.diagnostics
                .warn(DiagnosticCategory::Synced, Some(id), "sync ignored: entity not found");
            return Ok(None);
        };
        if entity.status != EntityStatus::Committed {
            self.diagnostics.warn(
                DiagnosticCategory::Synced,
                Some(id),
                format!("sync ignored: entity is {}", entity.status),
            );
            return Ok(None);
        }
        let Some(remote) = entity.remote_id.clone() else {
            self.diagnostics.warn(
                DiagnosticCategory::Synced,
                Some(id),
                "sync ignored: no remote identifier, commit first",
            );
            return Ok(None);
        };
        if state.tickets.is_in_flight(id) {
            self.diagnostics
                .warn(DiagnosticCategory::Synced, Some(id), "sync ignored: already in flight");
            return Ok(None);
        }
        if state.scope.is_none() {
            self.diagnostics
                .warn(DiagnosticCategory::Synced, Some(id), "sync refused: not connected");
            return Err(CommitError::Disconnected);
        }

        let (op, body) = if entity.is_deleted() {
            (MutationOp::Delete, None)
        } else {
            if entity.kind().is_collidable() {
                let verdict = self
                    .validator
                    .validate(&state.graph, &PlacementCandidate::from_entity(entity));
                self.check_verdict(id, verdict)?;
            }
            let body = reconcile::to_record(&state.graph, entity).map_err(CommitError::placement)?;
            (MutationOp::Update, Some(body))
        };

        let previous = Some(entity.attributes.clone());
        let ticket = state.tickets.open(id, op, previous);
        self.diagnostics.debug(
            DiagnosticCategory::Lifecycle,
            Some(id),
            format!("sync started ({:?})", op),
        );

        Ok(Some(PreparedSync {
            remote,
            body,
            ticket,
        }))
    }
}
