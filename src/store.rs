//! Canonical request store.
//!
//! Holds the deduplicated set of requests known to the client. Writers are
//! the sync scheduler (full snapshot per poll) and optimistic local editors;
//! readers always get value snapshots, never live references.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use crate::models::{RequestPatch, ServiceRequest};

/// Shared, cloneable handle to the canonical request set.
///
/// A `replace_all` installs the server snapshot atomically: a reader never
/// observes a partially applied snapshot. Optimistic edits applied between
/// polls are overwritten by the next `replace_all` unless the change is also
/// visible server-side.
#[derive(Clone)]
pub struct RequestStore {
    requests: Arc<RwLock<Vec<ServiceRequest>>>,
    generation: Arc<watch::Sender<u64>>,
}

impl RequestStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            requests: Arc::new(RwLock::new(Vec::new())),
            generation: Arc::new(tx),
        }
    }

    /// Install a full snapshot, deduplicated by id (first occurrence wins),
    /// preserving the given order.
    pub async fn replace_all(&self, list: Vec<ServiceRequest>) {
        let mut seen = HashSet::with_capacity(list.len());
        let deduped: Vec<ServiceRequest> =
            list.into_iter().filter(|r| seen.insert(r.id)).collect();
        *self.requests.write().await = deduped;
        self.bump();
    }

    /// Merge a partial update into a single request in place. Used for
    /// optimistic local edits; a no-op if the id is unknown.
    pub async fn apply(&self, id: i64, patch: &RequestPatch) -> bool {
        let mut requests = self.requests.write().await;
        match requests.iter_mut().find(|r| r.id == id) {
            Some(request) => {
                patch.apply_to(request);
                drop(requests);
                self.bump();
                true
            }
            None => false,
        }
    }

    /// Value snapshot of all requests in store order.
    pub async fn snapshot(&self) -> Vec<ServiceRequest> {
        self.requests.read().await.clone()
    }

    /// Value snapshot of a single request.
    pub async fn get(&self, id: i64) -> Option<ServiceRequest> {
        self.requests.read().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }

    /// Receiver that resolves whenever the store contents change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

impl Default for RequestStore {
    fn default() -> Self {
        Self::new()
    }
}
