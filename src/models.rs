//! Entity and wire types shared across the engine.
//!
//! Field names match the remote API's JSON shapes; the engine never invents
//! its own wire vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    /// Terminal statuses permit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Assigned => "assigned",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Priority tier assigned to a request by the remote classification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    #[default]
    Normal,
    Medium,
    High,
    Urgent,
}

/// The two participant roles in a service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Requester,
    Fulfiller,
}

/// Identity of the local user, injected into components that need to know
/// which side of a request they are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub id: i64,
    pub role: SenderRole,
}

impl Viewer {
    pub fn new(id: i64, role: SenderRole) -> Self {
        Self { id, role }
    }
}

/// Canonical service request entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: i64,
    pub requester_id: i64,
    #[serde(default)]
    pub fulfiller_id: Option<i64>,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reward: Option<f64>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub rating_comment: Option<String>,
    /// Computed by the server for "available" projections only.
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub requester_name: Option<String>,
    #[serde(default)]
    pub fulfiller_name: Option<String>,
}

impl ServiceRequest {
    /// Whether the viewer is a party to this request: its requester, or the
    /// fulfiller currently assigned to it.
    pub fn involves(&self, viewer: &Viewer) -> bool {
        match viewer.role {
            SenderRole::Requester => self.requester_id == viewer.id,
            SenderRole::Fulfiller => self.fulfiller_id == Some(viewer.id),
        }
    }
}

/// Body for creating a new request.
#[derive(Debug, Clone, Serialize)]
pub struct NewRequest {
    pub requester_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Partial update for an existing request; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl RequestPatch {
    /// Merge this patch into a request in place.
    pub fn apply_to(&self, request: &mut ServiceRequest) {
        if let Some(description) = &self.description {
            request.description = description.clone();
        }
        if let Some(address) = &self.address {
            request.address = Some(address.clone());
        }
        if let Some(category) = &self.category {
            request.category = category.clone();
        }
        if let Some(priority) = self.priority {
            request.priority = priority;
        }
    }
}

/// Server response to a status update.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateOutcome {
    pub id: i64,
    pub status: RequestStatus,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reward_amount: Option<f64>,
    #[serde(default)]
    pub reward_assigned: bool,
}

/// A chat message in a per-request thread.
///
/// Locally originated messages carry a negative provisional id until the
/// server assigns a real one; the server-assigned id is the duplicate
/// suppression key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub request_id: i64,
    pub sender_id: i64,
    pub sender_role: SenderRole,
    #[serde(rename = "message")]
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Whether this message was sent by the given viewer.
    pub fn is_from(&self, viewer: &Viewer) -> bool {
        self.sender_id == viewer.id && self.sender_role == viewer.role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_snake_case() {
        let json = serde_json::to_string(&RequestStatus::InProgress).unwrap();
        assert_eq!(json, r#""in_progress""#);
        let back: RequestStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RequestStatus::InProgress);
    }

    #[test]
    fn chat_message_wire_shape() {
        let json = r#"{
            "id": 55,
            "request_id": 7,
            "sender_id": 3,
            "sender_role": "fulfiller",
            "message": "on my way",
            "timestamp": "2024-04-02T10:00:00Z"
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, 55);
        assert_eq!(msg.sender_role, SenderRole::Fulfiller);
        assert_eq!(msg.body, "on my way");
    }

    #[test]
    fn request_deserializes_with_optional_fields_missing() {
        let json = r#"{
            "id": 1,
            "requester_id": 2,
            "category": "Groceries",
            "status": "pending",
            "created_at": "2024-04-02T10:00:00Z"
        }"#;
        let req: ServiceRequest = serde_json::from_str(json).unwrap();
        assert!(req.fulfiller_id.is_none());
        assert!(req.distance.is_none());
        assert_eq!(req.priority, Priority::Normal);
    }

    #[test]
    fn involves_checks_the_right_side() {
        let req: ServiceRequest = serde_json::from_str(
            r#"{
                "id": 1,
                "requester_id": 2,
                "fulfiller_id": 9,
                "category": "Groceries",
                "status": "assigned",
                "created_at": "2024-04-02T10:00:00Z"
            }"#,
        )
        .unwrap();
        assert!(req.involves(&Viewer::new(2, SenderRole::Requester)));
        assert!(req.involves(&Viewer::new(9, SenderRole::Fulfiller)));
        assert!(!req.involves(&Viewer::new(9, SenderRole::Requester)));
        assert!(!req.involves(&Viewer::new(2, SenderRole::Fulfiller)));
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut req: ServiceRequest = serde_json::from_str(
            r#"{
                "id": 1,
                "requester_id": 2,
                "category": "Groceries",
                "description": "milk and bread",
                "status": "pending",
                "created_at": "2024-04-02T10:00:00Z"
            }"#,
        )
        .unwrap();
        let patch = RequestPatch {
            description: Some("milk, bread and eggs".into()),
            priority: Some(Priority::High),
            ..Default::default()
        };
        patch.apply_to(&mut req);
        assert_eq!(req.description, "milk, bread and eggs");
        assert_eq!(req.priority, Priority::High);
        assert_eq!(req.category, "Groceries");
        assert!(req.address.is_none());
    }
}
