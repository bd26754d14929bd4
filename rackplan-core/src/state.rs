//! Mutable layout state shared by the editor, the commit pipeline and the
//! subscription task
//!
//! Guarded by a std mutex that is only ever held for synchronous sections;
//! every remote call happens with the lock released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::diagnostics::{DiagnosticCategory, DiagnosticsLog};
use crate::graph::EntityGraph;
use crate::history::{HistoryManager, RecordOutcome};
use crate::ids::ScopeId;
use crate::tickets::TicketLedger;

#[derive(Debug)]
pub struct LayoutState {
    pub graph: EntityGraph,
    pub history: HistoryManager,
    pub tickets: TicketLedger,
    /// Scope currently bound, if any
    pub scope: Option<ScopeId>,
    /// Whether the first authoritative snapshot for `scope` has been loaded
    pub loaded: bool,
}

impl LayoutState {
    pub fn new(diagnostics: DiagnosticsLog, history_depth: usize, settled_tickets: usize) -> Self {
        let graph = EntityGraph::new(diagnostics);
        let mut history = HistoryManager::new(history_depth);
        history.reset(graph.entities());
        Self {
            graph,
            history,
            tickets: TicketLedger::new(settled_tickets),
            scope: None,
            loaded: false,
        }
    }

    /// Snapshot the entity map into history after a settled mutation
    pub fn record_history(&mut self) -> RecordOutcome {
        let outcome = self.history.record(self.graph.entities());
        if outcome == RecordOutcome::Collapsed {
            self.graph.diagnostics().debug(
                DiagnosticCategory::History,
                None,
                "inverse mutation folded into previous history entry",
            );
        }
        outcome
    }
}

pub type SharedLayout = Arc<Mutex<LayoutState>>;

pub(crate) fn lock(shared: &SharedLayout) -> MutexGuard<'_, LayoutState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}
