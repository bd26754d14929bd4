//! Placeable warehouse fixtures
//!
//! An [`Entity`] is one node of the layout graph: floor, rack, shelf, bin,
//! obstacle or marker. The local id is the primary key for the whole session;
//! the remote id appears only once the remote store has accepted the entity.

pub mod attributes;
pub mod geometry;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{LocalId, RemoteId};

pub use attributes::{
    describe_issues, AttributeIssue, AttributePatch, Attributes, BinAttributes, EntityKind,
    FloorAttributes, MarkerAttributes, ObstacleAttributes, RackAttributes, ShelfAttributes,
};
pub use geometry::{Aabb, Dimensions, Geometry, Vec3};

/// Current time as unix milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// EntityStatus
// ============================================================================

/// Lifecycle state of an entity
///
/// ```text
/// ghost --confirm--> draft --begin commit--> pending --ok--> committed
///                      ^                        |--fail--> error
///                      |__________retry_________|
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Placement preview, lives outside the main map
    Ghost,
    /// Created locally, never persisted
    Draft,
    /// Create call in flight
    Pending,
    /// Persisted, has a remote id
    Committed,
    /// Last create call failed
    Error,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Ghost => "ghost",
            EntityStatus::Draft => "draft",
            EntityStatus::Pending => "pending",
            EntityStatus::Committed => "committed",
            EntityStatus::Error => "error",
        }
    }

    /// Draft, pending or error: local work a remote push must not touch
    pub fn is_unsynced(&self) -> bool {
        matches!(
            self,
            EntityStatus::Draft | EntityStatus::Pending | EntityStatus::Error
        )
    }

    /// States from which a commit may start (also the discardable states)
    pub fn is_committable(&self) -> bool {
        matches!(self, EntityStatus::Draft | EntityStatus::Error)
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ParentRef
// ============================================================================

/// Reference from a child to its parent
///
/// Children of committed parents hold the parent's remote id. A child placed
/// under a parent that is still a draft holds the parent's local id until the
/// parent is committed, at which point it is rewritten to the remote id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ParentRef {
    Remote(RemoteId),
    Local(LocalId),
}

impl ParentRef {
    pub fn remote(&self) -> Option<&RemoteId> {
        match self {
            ParentRef::Remote(id) => Some(id),
            ParentRef::Local(_) => None,
        }
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentRef::Remote(id) => write!(f, "remote:{}", id),
            ParentRef::Local(id) => write!(f, "local:{}", id),
        }
    }
}

impl From<RemoteId> for ParentRef {
    fn from(id: RemoteId) -> Self {
        ParentRef::Remote(id)
    }
}

impl From<LocalId> for ParentRef {
    fn from(id: LocalId) -> Self {
        ParentRef::Local(id)
    }
}

// ============================================================================
// Entity
// ============================================================================

/// A placeable warehouse fixture
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub local_id: LocalId,
    pub remote_id: Option<RemoteId>,
    pub status: EntityStatus,
    pub parent: Option<ParentRef>,
    pub name: String,
    /// Dotted ancestry of kinds, e.g. `floor.rack.shelf`
    pub path: String,
    pub attributes: Attributes,
    /// Soft-delete timestamp (unix ms); `Some` means deleted
    pub deleted_at: Option<i64>,
    /// Set only while `status` is `Error`
    pub validation_error: Option<String>,
    /// Local changes not yet pushed to the remote store
    pub dirty: bool,
}

impl Entity {
    /// A placement preview with registry defaults for `kind`
    pub fn ghost(kind: EntityKind, parent: Option<ParentRef>, path: String) -> Self {
        Self {
            local_id: LocalId::new(),
            remote_id: None,
            status: EntityStatus::Ghost,
            parent,
            name: String::new(),
            path,
            attributes: Attributes::defaults_for(kind),
            deleted_at: None,
            validation_error: None,
            dirty: false,
        }
    }

    /// A new local draft
    pub fn draft(
        parent: Option<ParentRef>,
        name: impl Into<String>,
        path: String,
        attributes: Attributes,
    ) -> Self {
        Self {
            local_id: LocalId::new(),
            remote_id: None,
            status: EntityStatus::Draft,
            parent,
            name: name.into(),
            path,
            attributes,
            deleted_at: None,
            validation_error: None,
            dirty: true,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.attributes.kind()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.attributes.bounds()
    }

    /// Derive a child path from a parent path
    pub fn child_path(parent_path: Option<&str>, kind: EntityKind) -> String {
        match parent_path {
            Some(p) if !p.is_empty() => format!("{}.{}", p, kind.as_str()),
            _ => kind.as_str().to_string(),
        }
    }
}
