//! Remote API client.
//!
//! The engine consumes the marketplace backend as an opaque API. Components
//! take an `Arc<dyn RemoteApi>` so tests can substitute doubles.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::models::{
    ChatMessage, NewRequest, RequestPatch, RequestStatus, ServiceRequest, StatusUpdateOutcome,
    Viewer,
};

/// Remote marketplace API surface consumed by the engine.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// List requests, optionally annotated with distances for the viewer.
    async fn list_requests(&self, viewer_id: Option<i64>) -> Result<Vec<ServiceRequest>>;

    /// Create a new request on behalf of a requester.
    async fn create_request(&self, new: &NewRequest) -> Result<ServiceRequest>;

    /// Update mutable fields of an existing request.
    async fn update_request(&self, id: i64, patch: &RequestPatch) -> Result<ServiceRequest>;

    /// Change a request's status, optionally accepting the offered reward.
    async fn update_status(
        &self,
        id: i64,
        status: RequestStatus,
        accept_reward: bool,
    ) -> Result<StatusUpdateOutcome>;

    /// Claim a pending request as its fulfiller.
    async fn accept_request(&self, id: i64, fulfiller_id: i64) -> Result<()>;

    /// Rate a completed request, 1-5 stars with an optional comment.
    async fn rate_request(&self, id: i64, rating: u8, comment: Option<&str>) -> Result<()>;

    /// Full message history for a request.
    async fn list_messages(&self, request_id: i64) -> Result<Vec<ChatMessage>>;

    /// Send a chat message; the response carries the server-assigned id.
    async fn send_message(
        &self,
        request_id: i64,
        sender: &Viewer,
        body: &str,
    ) -> Result<ChatMessage>;
}

/// Shared trait-object handle used throughout the engine.
pub type ApiHandle = Arc<dyn RemoteApi>;

/// reqwest-backed implementation of [`RemoteApi`].
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpRemoteApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-success response to the engine error taxonomy: 4xx with an
    /// `{"error": ...}` payload becomes `Validation` carrying the server's
    /// message verbatim, everything else is a transient `Network` failure.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        debug!(%status, body = %text, "remote API rejected request");
        if status.is_client_error() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or_else(|_| format!("request failed with status {status}"));
            return Err(SyncError::Validation(message));
        }
        Err(SyncError::Network(format!(
            "server returned {status}: {text}"
        )))
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn list_requests(&self, viewer_id: Option<i64>) -> Result<Vec<ServiceRequest>> {
        let mut request = self.client.get(self.url("/requests"));
        if let Some(viewer_id) = viewer_id {
            request = request.query(&[("viewer_id", viewer_id)]);
        }
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn create_request(&self, new: &NewRequest) -> Result<ServiceRequest> {
        let response = self.client.post(self.url("/request")).json(new).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn update_request(&self, id: i64, patch: &RequestPatch) -> Result<ServiceRequest> {
        let response = self
            .client
            .put(self.url(&format!("/request/{id}")))
            .json(patch)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn update_status(
        &self,
        id: i64,
        status: RequestStatus,
        accept_reward: bool,
    ) -> Result<StatusUpdateOutcome> {
        let response = self
            .client
            .put(self.url(&format!("/request/{id}/status")))
            .json(&json!({ "status": status, "wants_reward": accept_reward }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn accept_request(&self, id: i64, fulfiller_id: i64) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/request/{id}/accept")))
            .json(&json!({ "fulfiller_id": fulfiller_id }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn rate_request(&self, id: i64, rating: u8, comment: Option<&str>) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/request/{id}/rate")))
            .json(&json!({
                "rating": rating,
                "rating_comment": comment.unwrap_or(""),
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_messages(&self, request_id: i64) -> Result<Vec<ChatMessage>> {
        let response = self
            .client
            .get(self.url(&format!("/chat/{request_id}/messages")))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn send_message(
        &self,
        request_id: i64,
        sender: &Viewer,
        body: &str,
    ) -> Result<ChatMessage> {
        let response = self
            .client
            .post(self.url(&format!("/chat/{request_id}/send")))
            .json(&json!({
                "sender_id": sender.id,
                "sender_role": sender.role,
                "message": body,
            }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
