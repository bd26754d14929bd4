//! Diagnostics log for the layout engine
//!
//! An append-only, bounded event log shared by every component. Each event is
//! also mirrored to `tracing` so it lands in the regular log file; the buffer
//! itself exists so the editor UI can show entity-level history independently
//! of the process log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ids::LocalId;

/// Default number of events retained before the oldest are evicted
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 1000;

// ============================================================================
// Level / Category
// ============================================================================

/// Severity of a diagnostic event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticLevel::Debug => "debug",
            DiagnosticLevel::Info => "info",
            DiagnosticLevel::Warn => "warn",
            DiagnosticLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// What kind of occurrence an event describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCategory {
    Created,
    Updated,
    Removed,
    Committed,
    Synced,
    Error,
    Collision,
    Validation,
    Reconcile,
    History,
    Lifecycle,
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticCategory::Created => "created",
            DiagnosticCategory::Updated => "updated",
            DiagnosticCategory::Removed => "removed",
            DiagnosticCategory::Committed => "committed",
            DiagnosticCategory::Synced => "synced",
            DiagnosticCategory::Error => "error",
            DiagnosticCategory::Collision => "collision",
            DiagnosticCategory::Validation => "validation",
            DiagnosticCategory::Reconcile => "reconcile",
            DiagnosticCategory::History => "history",
            DiagnosticCategory::Lifecycle => "lifecycle",
        };
        f.write_str(s)
    }
}

// ============================================================================
// DiagnosticEvent
// ============================================================================

/// A single structured diagnostic event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub level: DiagnosticLevel,
    pub category: DiagnosticCategory,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Entity the event is about, if any
    pub entity: Option<LocalId>,
}

/// Filter for querying the log. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticFilter {
    pub min_level: Option<DiagnosticLevel>,
    pub category: Option<DiagnosticCategory>,
    pub entity: Option<LocalId>,
    pub since: Option<DateTime<Utc>>,
}

impl DiagnosticFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_level(mut self, level: DiagnosticLevel) -> Self {
        self.min_level = Some(level);
        self
    }

    pub fn category(mut self, category: DiagnosticCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn entity(mut self, id: LocalId) -> Self {
        self.entity = Some(id);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, event: &DiagnosticEvent) -> bool {
        self.min_level.is_none_or(|min| event.level >= min)
            && self.category.is_none_or(|c| event.category == c)
            && self
                .entity
                .as_ref()
                .is_none_or(|id| event.entity.as_ref() == Some(id))
            && self.since.is_none_or(|t| event.timestamp >= t)
    }
}

// ============================================================================
// DiagnosticsLog
// ============================================================================

#[derive(Debug)]
struct Buffer {
    events: VecDeque<DiagnosticEvent>,
    capacity: usize,
    evicted: u64,
}

/// Cloneable handle to the shared diagnostics buffer
#[derive(Clone, Debug)]
pub struct DiagnosticsLog {
    inner: Arc<Mutex<Buffer>>,
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new(DEFAULT_DIAGNOSTICS_CAPACITY)
    }
}

impl DiagnosticsLog {
    /// Create a log retaining at most `capacity` events (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Buffer {
                events: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                evicted: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event and mirror it to tracing
    pub fn record(
        &self,
        level: DiagnosticLevel,
        category: DiagnosticCategory,
        entity: Option<&LocalId>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let entity_str = entity.map(|id| id.as_str()).unwrap_or("-");
        match level {
            DiagnosticLevel::Debug => {
                tracing::debug!(category = %category, entity = entity_str, "{}", message)
            }
            DiagnosticLevel::Info => {
                tracing::info!(category = %category, entity = entity_str, "{}", message)
            }
            DiagnosticLevel::Warn => {
                tracing::warn!(category = %category, entity = entity_str, "{}", message)
            }
            DiagnosticLevel::Error => {
                tracing::error!(category = %category, entity = entity_str, "{}", message)
            }
        }

        let event = DiagnosticEvent {
            level,
            category,
            message,
            timestamp: Utc::now(),
            entity: entity.cloned(),
        };

        let mut buffer = self.lock();
        if buffer.events.len() >= buffer.capacity {
            buffer.events.pop_front();
            buffer.evicted += 1;
        }
        buffer.events.push_back(event);
    }

    pub fn debug(&self, category: DiagnosticCategory, entity: Option<&LocalId>, message: impl Into<String>) {
        self.record(DiagnosticLevel::Debug, category, entity, message);
    }

    pub fn info(&self, category: DiagnosticCategory, entity: Option<&LocalId>, message: impl Into<String>) {
        self.record(DiagnosticLevel::Info, category, entity, message);
    }

    pub fn warn(&self, category: DiagnosticCategory, entity: Option<&LocalId>, message: impl Into<String>) {
        self.record(DiagnosticLevel::Warn, category, entity, message);
    }

    pub fn error(&self, category: DiagnosticCategory, entity: Option<&LocalId>, message: impl Into<String>) {
        self.record(DiagnosticLevel::Error, category, entity, message);
    }

    /// All retained events, oldest first
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Retained events matching `filter`, oldest first
    pub fn query(&self, filter: &DiagnosticFilter) -> Vec<DiagnosticEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Number of matching events (cheaper than `query(..).len()`)
    pub fn count(&self, filter: &DiagnosticFilter) -> usize {
        self.lock().events.iter().filter(|e| filter.matches(e)).count()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    /// Number of events dropped because the buffer was full
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    /// Serialize matching events as JSON lines
    pub fn to_json_lines(&self, filter: &DiagnosticFilter) -> String {
        let mut out = String::new();
        for event in self.query(filter) {
            let line = serde_json::to_string(&event)
                .unwrap_or_else(|_| "<serialization error>".to_string());
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}
