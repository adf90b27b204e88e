//! Push event routing.
//!
//! Keeps the push-channel interest set equal to the requests the viewer is a
//! party to, and dispatches inbound events either to the active chat session
//! for the request or to a passive, single-slot notification surface.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};

use crate::models::{ChatMessage, RequestStatus, SenderRole, ServiceRequest, Viewer};
use crate::push::{PushEvent, PushHandle, ReassignedNotice};
use crate::store::RequestStore;

/// Passive notification shown when a message arrives for a request whose
/// chat is not currently open. The surface holds one slot; a newer notice
/// replaces an older one.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageNotice {
    pub request_id: i64,
    pub sender_name: String,
    pub body: String,
}

/// Request ids the viewer should hold push subscriptions for: requests they
/// are a party to that are currently assigned or in progress.
pub fn desired_subscriptions(viewer: &Viewer, requests: &[ServiceRequest]) -> HashSet<i64> {
    requests
        .iter()
        .filter(|r| matches!(r.status, RequestStatus::Assigned | RequestStatus::InProgress))
        .filter(|r| r.fulfiller_id.is_some())
        .filter(|r| r.involves(viewer))
        .map(|r| r.id)
        .collect()
}

struct RouterInner {
    viewer: Viewer,
    store: RequestStore,
    push: PushHandle,
    /// Inbound delivery channels for open chat sessions, keyed by request id.
    sessions: RwLock<HashMap<i64, mpsc::UnboundedSender<ChatMessage>>>,
    notice_tx: watch::Sender<Option<MessageNotice>>,
    alerts_tx: mpsc::UnboundedSender<ReassignedNotice>,
}

/// Routes push events and maintains the subscription set.
#[derive(Clone)]
pub struct NotificationRouter {
    inner: Arc<RouterInner>,
}

/// Receiving side of the router's UI-facing surfaces.
pub struct RouterOutputs {
    /// One-shot reassignment alerts.
    pub alerts: mpsc::UnboundedReceiver<ReassignedNotice>,
    /// Single-slot passive message notice; `None` when the slot is empty.
    pub notices: watch::Receiver<Option<MessageNotice>>,
}

impl NotificationRouter {
    pub fn new(viewer: Viewer, store: RequestStore, push: PushHandle) -> (Self, RouterOutputs) {
        let (notice_tx, notices) = watch::channel(None);
        let (alerts_tx, alerts) = mpsc::unbounded_channel();
        let router = Self {
            inner: Arc::new(RouterInner {
                viewer,
                store,
                push,
                sessions: RwLock::new(HashMap::new()),
                notice_tx,
                alerts_tx,
            }),
        };
        (router, RouterOutputs { alerts, notices })
    }

    /// Consume push events and store changes until the event stream ends.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<PushEvent>) {
        let mut store_rx = self.inner.store.subscribe();
        self.sync_subscriptions().await;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                changed = store_rx.changed() => match changed {
                    Ok(()) => self.sync_subscriptions().await,
                    Err(_) => break,
                },
            }
        }
        debug!("notification router stopped");
    }

    /// Reconcile the push interest set with the current store contents.
    /// Requests with an open chat session keep their interest regardless of
    /// status; the session withdraws it when it closes.
    pub async fn sync_subscriptions(&self) {
        let snapshot = self.inner.store.snapshot().await;
        let want = desired_subscriptions(&self.inner.viewer, &snapshot);
        let sessions: HashSet<i64> =
            self.inner.sessions.read().await.keys().copied().collect();
        let have = self.inner.push.interests();
        for id in want.difference(&have) {
            self.inner.push.join(*id);
        }
        for id in have.difference(&want) {
            if !sessions.contains(id) {
                self.inner.push.leave(*id);
            }
        }
    }

    /// Dispatch one inbound push event.
    pub async fn handle_event(&self, event: PushEvent) {
        match event {
            PushEvent::RequestReassigned(notice) => {
                // Presentation-only; the next poll reflects the assignment.
                if self.inner.alerts_tx.send(notice).is_err() {
                    warn!("reassignment alert dropped: no listener");
                }
            }
            PushEvent::NewMessage(message) => self.route_message(message).await,
        }
    }

    async fn route_message(&self, mut message: ChatMessage) {
        // A live session owns delivery (and id-based dedup) for its request.
        if let Some(tx) = self.inner.sessions.read().await.get(&message.request_id) {
            match tx.send(message) {
                Ok(()) => return,
                // Session receiver is gone; take the message back and fall
                // through to the passive surface.
                Err(mpsc::error::SendError(returned)) => message = returned,
            }
        }

        if !self.inner.push.interests().contains(&message.request_id) {
            debug!(request_id = message.request_id, "message for unsubscribed request ignored");
            return;
        }
        if message.is_from(&self.inner.viewer) {
            return;
        }

        let sender_name = self.sender_display_name(&message).await;
        // Single slot: a new notice replaces whatever was there.
        let _ = self.inner.notice_tx.send(Some(MessageNotice {
            request_id: message.request_id,
            sender_name,
            body: message.body,
        }));
    }

    /// Display name for the counterparty, from the store's annotations.
    async fn sender_display_name(&self, message: &ChatMessage) -> String {
        let fallback = match message.sender_role {
            SenderRole::Requester => "Requester",
            SenderRole::Fulfiller => "Fulfiller",
        };
        match self.inner.store.get(message.request_id).await {
            Some(request) => match message.sender_role {
                SenderRole::Requester => request.requester_name,
                SenderRole::Fulfiller => request.fulfiller_name,
            }
            .unwrap_or_else(|| fallback.to_string()),
            None => fallback.to_string(),
        }
    }

    /// Clear the passive notification slot.
    pub fn clear_notice(&self) {
        let _ = self.inner.notice_tx.send(None);
    }

    /// Register an open chat session; inbound messages for the request are
    /// forwarded on the returned channel. Declares push interest.
    pub async fn register_session(&self, request_id: i64) -> mpsc::UnboundedReceiver<ChatMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.sessions.write().await.insert(request_id, tx);
        self.inner.push.join(request_id);
        rx
    }

    /// Remove a closed chat session and withdraw push interest.
    pub async fn unregister_session(&self, request_id: i64) {
        self.inner.sessions.write().await.remove(&request_id);
        self.inner.push.leave(request_id);
    }
}
