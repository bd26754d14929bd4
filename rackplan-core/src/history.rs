//! Linear undo/redo over the entity map
//!
//! Snapshots are whole entity maps behind `Arc`, compared structurally so
//! no-op mutations never create an entry.
//!
//! ```text
//! record(s1), record(s2)      undo: [s0, s1, s2]   redo: []
//! undo()                      undo: [s0, s1]       redo: [s2]    -> s1
//! record(s3)                  undo: [s0, s1, s3]   redo: []
//! record(s1)   (inverse)      undo: [s0, s1]       redo: []
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use crate::graph::EntityMap;

/// Default number of snapshots retained, the baseline included
pub const DEFAULT_HISTORY_DEPTH: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Equal to the current snapshot
    Unchanged,
    /// New entry pushed
    Recorded,
    /// Equal to the previous snapshot: the last entry was its inverse and
    /// both were folded away
    Collapsed,
}

#[derive(Debug)]
pub struct HistoryManager {
    /// Back is the current state
    undo_stack: VecDeque<Arc<EntityMap>>,
    /// Back is the most recently undone state
    redo_stack: Vec<Arc<EntityMap>>,
    max_depth: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}

impl HistoryManager {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Drop all entries and start over from `baseline`
    pub fn reset(&mut self, baseline: &EntityMap) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.undo_stack.push_back(Arc::new(baseline.clone()));
    }

    /// Capture `state` after a settled mutation
    pub fn record(&mut self, state: &EntityMap) -> RecordOutcome {
        if self.undo_stack.back().is_some_and(|current| **current == *state) {
            return RecordOutcome::Unchanged;
        }

        let len = self.undo_stack.len();
        if len >= 2 && *self.undo_stack[len - 2] == *state {
            self.undo_stack.pop_back();
            self.redo_stack.clear();
            return RecordOutcome::Collapsed;
        }

        self.redo_stack.clear();
        self.undo_stack.push_back(Arc::new(state.clone()));
        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
        RecordOutcome::Recorded
    }

    /// Step back; returns the state to restore
    pub fn undo(&mut self) -> Option<Arc<EntityMap>> {
        if self.undo_stack.len() < 2 {
            return None;
        }
        let current = self.undo_stack.pop_back()?;
        self.redo_stack.push(current);
        self.undo_stack.back().cloned()
    }

    /// Step forward; returns the state to restore
    pub fn redo(&mut self) -> Option<Arc<EntityMap>> {
        let next = self.redo_stack.pop()?;
        self.undo_stack.push_back(next);
        self.undo_stack.back().cloned()
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack.len() >= 2
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Steps available to undo
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len().saturating_sub(1)
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}
