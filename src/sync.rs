//! Periodic pull against the authoritative request list.
//!
//! Each list view runs its own scheduler: pull, filter, sort, install into
//! the store. A failed pull keeps the previous contents; stale beats empty.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::RemoteApi;
use crate::error::Result;
use crate::models::{RequestStatus, ServiceRequest};
use crate::store::RequestStore;

/// Requests farther than this are never shown, regardless of preference.
pub const HARD_DISTANCE_CEILING: f64 = 100.0;

/// Default user-adjustable ceiling for the "available" projection.
pub const DEFAULT_DISTANCE_CEILING: f64 = 50.0;

/// Clamp a user-supplied distance ceiling to `[0, HARD_DISTANCE_CEILING]`.
pub fn clamp_distance_ceiling(value: f64) -> f64 {
    value.clamp(0.0, HARD_DISTANCE_CEILING)
}

/// Which projection of the request list a view wants.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewFilter {
    /// Everything the server returns.
    All,
    /// Unclaimed pending requests within distance range, for fulfillers
    /// browsing work. `max_distance` is the user's soft ceiling.
    Available { max_distance: f64 },
    /// Requests created by this requester.
    CreatedBy(i64),
    /// Requests assigned to this fulfiller.
    AssignedTo(i64),
}

/// Apply a view filter to a pulled list.
pub fn apply_view_filter(list: Vec<ServiceRequest>, filter: &ViewFilter) -> Vec<ServiceRequest> {
    match filter {
        ViewFilter::All => list,
        ViewFilter::Available { max_distance } => {
            let ceiling = clamp_distance_ceiling(*max_distance);
            list.into_iter()
                .filter(|r| r.status == RequestStatus::Pending)
                .filter(|r| r.fulfiller_id.is_none())
                .filter(|r| match r.distance {
                    // Requests without a computed distance stay visible.
                    None => true,
                    Some(d) => d <= HARD_DISTANCE_CEILING && d <= ceiling,
                })
                .collect()
        }
        ViewFilter::CreatedBy(requester_id) => list
            .into_iter()
            .filter(|r| r.requester_id == *requester_id)
            .collect(),
        ViewFilter::AssignedTo(fulfiller_id) => list
            .into_iter()
            .filter(|r| r.fulfiller_id == Some(*fulfiller_id))
            .collect(),
    }
}

/// Sort newest first; ties broken by id descending for determinism.
pub fn sort_newest_first(list: &mut [ServiceRequest]) {
    list.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Recurring pull for one list view.
pub struct SyncScheduler {
    api: Arc<dyn RemoteApi>,
    store: RequestStore,
    viewer_id: Option<i64>,
    filter: ViewFilter,
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: RequestStore,
        viewer_id: Option<i64>,
        filter: ViewFilter,
        period: Duration,
    ) -> Self {
        Self {
            api,
            store,
            viewer_id,
            filter,
            period,
            task: None,
        }
    }

    /// Run one pull cycle: fetch, filter, sort, install. Returns the number
    /// of requests installed.
    pub async fn sync_once(&self) -> Result<usize> {
        let pulled = self.api.list_requests(self.viewer_id).await?;
        let mut filtered = apply_view_filter(pulled, &self.filter);
        sort_newest_first(&mut filtered);
        let count = filtered.len();
        self.store.replace_all(filtered).await;
        debug!(count, "installed request snapshot");
        Ok(count)
    }

    /// Start the recurring pull in the background. The first pull happens
    /// immediately.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let api = Arc::clone(&self.api);
        let store = self.store.clone();
        let viewer_id = self.viewer_id;
        let filter = self.filter.clone();
        let period = self.period;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match api.list_requests(viewer_id).await {
                    Ok(pulled) => {
                        let mut filtered = apply_view_filter(pulled, &filter);
                        sort_newest_first(&mut filtered);
                        store.replace_all(filtered).await;
                    }
                    Err(e) => {
                        // Keep last-known-good contents; next tick retries.
                        warn!(error = %e, "request pull failed, keeping stale view");
                    }
                }
            }
        }));
    }

    /// Stop the recurring pull. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
