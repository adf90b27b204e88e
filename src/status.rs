//! Status transition rules and reward estimation.
//!
//! Pure functions; nothing here talks to the network. An illegal transition
//! is rejected locally and never reaches the remote API.

use crate::api::RemoteApi;
use crate::error::{Result, SyncError};
use crate::models::{Priority, RequestStatus, StatusUpdateOutcome};
use crate::store::RequestStore;

/// Side effects that accompany a legal transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEffect {
    /// Release transitions clear the fulfiller reference and assignment time.
    pub clears_fulfiller: bool,
    /// Estimated reward offered to the caller when completing a request.
    /// Acceptance is forwarded to the server; the store only reflects the
    /// reward after the next poll confirms it.
    pub estimated_reward: Option<f64>,
}

/// Allowed next statuses for a given current status.
pub fn allowed_transitions(from: RequestStatus) -> &'static [RequestStatus] {
    use RequestStatus::*;
    match from {
        Pending => &[Assigned, Cancelled],
        Assigned => &[InProgress, Completed, Pending, Cancelled],
        InProgress => &[Completed, Pending, Cancelled],
        Completed | Cancelled => &[],
    }
}

/// Validate a requested status change.
///
/// Returns the transition's side effects, or `InvalidTransition` if the pair
/// is not in the table. `category` feeds the reward estimate on completion.
pub fn validate_transition(
    from: RequestStatus,
    to: RequestStatus,
    priority: Priority,
    category: &str,
) -> Result<TransitionEffect> {
    if from == to || !allowed_transitions(from).contains(&to) {
        return Err(SyncError::InvalidTransition { from, to });
    }
    Ok(TransitionEffect {
        clears_fulfiller: to == RequestStatus::Pending,
        estimated_reward: (to == RequestStatus::Completed)
            .then(|| estimate_reward(priority, category)),
    })
}

/// Base reward by priority tier.
fn base_reward(priority: Priority) -> f64 {
    match priority {
        Priority::Urgent => 50.0,
        Priority::High => 30.0,
        Priority::Medium => 20.0,
        Priority::Normal => 10.0,
    }
}

/// Complexity multiplier by category label.
fn category_multiplier(category: &str) -> f64 {
    match category {
        "Medical Assistance" => 1.5,
        "House Shifting" => 1.4,
        "Home Maintenance" => 1.3,
        "Transportation" => 1.2,
        "Technology Help" => 1.1,
        "Companionship" => 0.9,
        _ => 1.0,
    }
}

/// Estimated reward for completing a request: `base(priority) x
/// multiplier(category)`, rounded to 2 decimal places.
pub fn estimate_reward(priority: Priority, category: &str) -> f64 {
    let amount = base_reward(priority) * category_multiplier(category);
    (amount * 100.0).round() / 100.0
}

/// Submit a status change: validate against the store's copy of the request,
/// then forward to the remote API. An illegal transition fails here and never
/// goes over the wire. The store is reconciled by the next poll, not by this
/// call.
pub async fn submit_status_update(
    api: &dyn RemoteApi,
    store: &RequestStore,
    id: i64,
    to: RequestStatus,
    accept_reward: bool,
) -> Result<StatusUpdateOutcome> {
    let current = store
        .get(id)
        .await
        .ok_or_else(|| SyncError::Validation(format!("unknown request {id}")))?;
    validate_transition(current.status, to, current.priority, &current.category)?;
    api.update_status(id, to, accept_reward).await
}
