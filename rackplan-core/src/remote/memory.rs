//! In-memory RemoteStore implementation
//!
//! Publishes a fresh snapshot on a `watch` channel per scope after every
//! mutation. Tests can queue failures and make the store push the new
//! snapshot before the create call returns, which reproduces the race
//! between a commit reply and a live-query push.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::{RemoteStore, SnapshotStream};
use crate::ids::{RemoteId, ScopeId};
use crate::reconcile::{RecordBody, RemoteRecord};

type Snapshot = Option<Vec<RemoteRecord>>;

#[derive(Debug)]
struct Scope {
    records: Vec<RemoteRecord>,
    tx: watch::Sender<Snapshot>,
    ready: bool,
}

impl Scope {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            records: Vec::new(),
            tx,
            ready: false,
        }
    }

    fn publish(&mut self) {
        self.ready = true;
        self.tx.send_replace(Some(self.records.clone()));
    }
}

#[derive(Debug, Default)]
struct State {
    scopes: HashMap<ScopeId, Scope>,
    owner: HashMap<RemoteId, ScopeId>,
    next_id: u64,
    failures: VecDeque<String>,
    mutations: usize,
}

impl State {
    fn scope(&mut self, scope: &ScopeId) -> &mut Scope {
        self.scopes.entry(scope.clone()).or_insert_with(Scope::new)
    }

    fn take_failure(&mut self) -> Result<()> {
        match self.failures.pop_front() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }
}

/// In-memory remote store for tests and headless replay
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    state: Mutex<State>,
    push_before_reply: bool,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the snapshot and yield before `create` returns
    pub fn with_push_before_reply(mut self) -> Self {
        self.push_before_reply = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next subscribe or mutation fail with `message`. Calls queue up.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().failures.push_back(message.into());
    }

    /// Replace a scope's contents and publish them as authoritative
    pub fn seed(&self, scope: &ScopeId, records: Vec<RemoteRecord>) {
        let mut state = self.lock();
        for record in &records {
            state.owner.insert(record.id.clone(), scope.clone());
        }
        let scope = state.scope(scope);
        scope.records = records;
        scope.publish();
    }

    /// Write a record as another client would, publishing the result
    pub fn push_external(&self, scope: &ScopeId, record: RemoteRecord) {
        let mut state = self.lock();
        state.owner.insert(record.id.clone(), scope.clone());
        let scope = state.scope(scope);
        match scope.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => scope.records.push(record),
        }
        scope.publish();
    }

    /// Current records in `scope`
    pub fn records(&self, scope: &ScopeId) -> Vec<RemoteRecord> {
        self.lock()
            .scopes
            .get(scope)
            .map(|s| s.records.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &RemoteId) -> Option<RemoteRecord> {
        let state = self.lock();
        let scope = state.owner.get(id)?;
        state
            .scopes
            .get(scope)?
            .records
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    /// Number of mutation calls received, failed ones included
    pub fn mutation_count(&self) -> usize {
        self.lock().mutations
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn subscribe(&self, scope: &ScopeId) -> Result<SnapshotStream> {
        let mut state = self.lock();
        state.take_failure()?;
        let scope = state.scope(scope);
        // An untouched scope is empty, not loading
        if !scope.ready {
            scope.publish();
        }
        let rx = scope.tx.subscribe();
        Ok(WatchStream::new(rx).boxed())
    }

    async fn create(&self, scope: &ScopeId, body: RecordBody) -> Result<RemoteId> {
        let id = {
            let mut state = self.lock();
            state.mutations += 1;
            state.take_failure()?;
            state.next_id += 1;
            let id = RemoteId::from_string(format!("rec-{}", state.next_id));
            state.owner.insert(id.clone(), scope.clone());
            let target = state.scope(scope);
            target.records.push(RemoteRecord::new(id.clone(), body));
            target.publish();
            id
        };
        if self.push_before_reply {
            tokio::task::yield_now().await;
        }
        Ok(id)
    }

    async fn update(&self, id: &RemoteId, body: RecordBody) -> Result<()> {
        let mut state = self.lock();
        state.mutations += 1;
        state.take_failure()?;
        let scope = state
            .owner
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("record {} not found", id))?;
        let target = state.scope(&scope);
        let record = target
            .records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| anyhow!("record {} not found", id))?;
        record.body = body;
        target.publish();
        Ok(())
    }

    async fn delete(&self, id: &RemoteId) -> Result<()> {
        let mut state = self.lock();
        state.mutations += 1;
        state.take_failure()?;
        let scope = state
            .owner
            .remove(id)
            .ok_or_else(|| anyhow!("record {} not found", id))?;
        let target = state.scope(&scope);
        target.records.retain(|r| &r.id != id);
        target.publish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Attributes, EntityKind};

    fn body(name: &str) -> RecordBody {
        RecordBody {
            parent: None,
            name: name.to_string(),
            path: "rack".to_string(),
            attributes: Attributes::defaults_for(EntityKind::Rack),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_subscribe_sees_mutations() {
        let store = MemoryRemoteStore::new();
        let scope = ScopeId::from_string("site-1");
        let mut stream = store.subscribe(&scope).await.unwrap();
        assert_eq!(stream.next().await, Some(Some(vec![])));

        let id = store.create(&scope, body("A")).await.unwrap();
        let snapshot = stream.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);

        store.update(&id, body("B")).await.unwrap();
        assert_eq!(store.get(&id).unwrap().body.name, "B");

        store.delete(&id).await.unwrap();
        assert!(store.records(&scope).is_empty());
        assert!(store.delete(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let store = MemoryRemoteStore::new();
        let scope = ScopeId::from_string("site-1");
        store.fail_next("network down");

        let err = store.create(&scope, body("A")).await.unwrap_err();
        assert_eq!(err.to_string(), "network down");
        assert!(store.create(&scope, body("A")).await.is_ok());
        assert_eq!(store.mutation_count(), 2);
    }
}
