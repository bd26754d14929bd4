//! Remote store seam
//!
//! The persistent store is an external collaborator. The layout engine only
//! needs a live subscription to every record in a scope plus three mutations.

mod memory;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::ids::{RemoteId, ScopeId};
use crate::reconcile::{RecordBody, RemoteRecord};

pub use memory::MemoryRemoteStore;

/// Stream of scope snapshots. `None` means the store is still loading; any
/// `Some`, empty included, is authoritative.
pub type SnapshotStream = BoxStream<'static, Option<Vec<RemoteRecord>>>;

/// Trait for the remote persistent store
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Subscribe to every record in `scope`
    async fn subscribe(&self, scope: &ScopeId) -> Result<SnapshotStream>;

    /// Persist a new record, returning its permanent id
    async fn create(&self, scope: &ScopeId, body: RecordBody) -> Result<RemoteId>;

    /// Replace the persisted fields of an existing record
    async fn update(&self, id: &RemoteId, body: RecordBody) -> Result<()>;

    /// Delete a record permanently
    async fn delete(&self, id: &RemoteId) -> Result<()>;
}
