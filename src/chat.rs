//! Per-request chat session.
//!
//! An open session owns the message thread for one request: it loads history,
//! receives pushed messages through the router, refetches periodically as a
//! backstop, and sends with optimistic local echo. Messages are keyed by
//! server id; locally originated messages carry a negative provisional id
//! until the server confirms them.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::ApiHandle;
use crate::error::{Result, SyncError};
use crate::models::{ChatMessage, Viewer};
use crate::router::NotificationRouter;

/// Delivery state of one thread entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryState {
    /// Optimistic local echo, not yet acknowledged by the server.
    PendingLocal,
    /// Known to the server.
    Confirmed,
}

#[derive(Debug, Clone)]
struct SessionMessage {
    message: ChatMessage,
    delivery: DeliveryState,
}

/// A send that did not reach the server. Carries the draft back so the
/// caller can restore it to the input box.
#[derive(Debug)]
pub struct SendFailure {
    pub draft: String,
    pub error: SyncError,
}

/// Sort by timestamp, ties broken by id so the order is stable across
/// merges. Provisional (negative) ids sort before server ids within a tie,
/// which keeps a local echo where the user saw it appear.
fn sort_thread(thread: &mut [SessionMessage]) {
    thread.sort_by(|a, b| {
        a.message
            .timestamp
            .cmp(&b.message.timestamp)
            .then_with(|| a.message.id.cmp(&b.message.id))
    });
}

/// Insert a pushed message unless its id is already present.
fn insert_if_absent(thread: &mut Vec<SessionMessage>, message: ChatMessage) {
    if thread.iter().any(|m| m.message.id == message.id) {
        debug!(id = message.id, "duplicate pushed message ignored");
        return;
    }
    thread.push(SessionMessage {
        message,
        delivery: DeliveryState::Confirmed,
    });
    sort_thread(thread);
}

/// Replace the confirmed portion of the thread with an authoritative fetch.
/// Pending local echoes survive the merge; they are resolved by their own
/// send completing, not by refetch.
fn merge_authoritative(thread: &mut Vec<SessionMessage>, fetched: Vec<ChatMessage>) {
    thread.retain(|m| m.delivery == DeliveryState::PendingLocal);
    for message in fetched {
        if thread.iter().any(|m| m.message.id == message.id) {
            continue;
        }
        thread.push(SessionMessage {
            message,
            delivery: DeliveryState::Confirmed,
        });
    }
    sort_thread(thread);
}

/// An open chat thread for one request.
pub struct ChatSession {
    api: ApiHandle,
    router: NotificationRouter,
    viewer: Viewer,
    request_id: i64,
    thread: Arc<Mutex<Vec<SessionMessage>>>,
    closed: Arc<AtomicBool>,
    next_provisional_id: AtomicI64,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl ChatSession {
    /// Open the session: load history, register for pushed messages, and
    /// start the periodic refetch backstop.
    pub async fn open(
        api: ApiHandle,
        router: NotificationRouter,
        viewer: Viewer,
        request_id: i64,
        refetch_period: Duration,
    ) -> Result<Self> {
        let mut history = api.list_messages(request_id).await?;
        history.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        let thread = Arc::new(Mutex::new(
            history
                .into_iter()
                .map(|message| SessionMessage {
                    message,
                    delivery: DeliveryState::Confirmed,
                })
                .collect::<Vec<_>>(),
        ));
        let closed = Arc::new(AtomicBool::new(false));

        let mut inbound = router.register_session(request_id).await;

        let inbound_task = {
            let thread = Arc::clone(&thread);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                while let Some(message) = inbound.recv().await {
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    insert_if_absent(&mut *thread.lock().await, message);
                }
            })
        };

        let refetch_task = {
            let api = Arc::clone(&api);
            let thread = Arc::clone(&thread);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(refetch_period);
                // The open() call itself did the first fetch.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match api.list_messages(request_id).await {
                        Ok(fetched) => {
                            if closed.load(Ordering::SeqCst) {
                                break;
                            }
                            merge_authoritative(&mut *thread.lock().await, fetched);
                        }
                        Err(e) => {
                            // Pushed delivery still works; try again next tick.
                            warn!(request_id, error = %e, "chat refetch failed");
                        }
                    }
                }
            })
        };

        Ok(Self {
            api,
            router,
            viewer,
            request_id,
            thread,
            closed,
            next_provisional_id: AtomicI64::new(-1),
            tasks: StdMutex::new(vec![inbound_task, refetch_task]),
        })
    }

    /// Send a message with optimistic local echo.
    ///
    /// The message appears in the thread immediately under a provisional id.
    /// On confirmation it is swapped for the server's copy; on failure it is
    /// removed and the draft comes back in the [`SendFailure`].
    pub async fn send(&self, text: &str) -> std::result::Result<ChatMessage, SendFailure> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendFailure {
                draft: text.to_string(),
                error: SyncError::SessionClosed,
            });
        }

        let provisional_id = self.next_provisional_id.fetch_sub(1, Ordering::SeqCst);
        let provisional = ChatMessage {
            id: provisional_id,
            request_id: self.request_id,
            sender_id: self.viewer.id,
            sender_role: self.viewer.role,
            body: text.to_string(),
            timestamp: Utc::now(),
        };
        self.thread.lock().await.push(SessionMessage {
            message: provisional,
            delivery: DeliveryState::PendingLocal,
        });

        let outcome = self
            .api
            .send_message(self.request_id, &self.viewer, text)
            .await;

        if self.closed.load(Ordering::SeqCst) {
            // The thread is gone from the user's point of view; report the
            // outcome but leave the state alone.
            return outcome.map_err(|error| SendFailure {
                draft: text.to_string(),
                error,
            });
        }

        let mut thread = self.thread.lock().await;
        thread.retain(|m| m.message.id != provisional_id);
        match outcome {
            Ok(confirmed) => {
                // A refetch may have landed the server copy already.
                insert_if_absent(&mut thread, confirmed.clone());
                Ok(confirmed)
            }
            Err(error) => {
                sort_thread(&mut thread);
                Err(SendFailure {
                    draft: text.to_string(),
                    error,
                })
            }
        }
    }

    /// Snapshot of the thread, oldest first.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.thread
            .lock()
            .await
            .iter()
            .map(|m| m.message.clone())
            .collect()
    }

    /// Whether any local echo is still awaiting confirmation.
    pub async fn has_pending(&self) -> bool {
        self.thread
            .lock()
            .await
            .iter()
            .any(|m| m.delivery == DeliveryState::PendingLocal)
    }

    pub fn request_id(&self) -> i64 {
        self.request_id
    }

    /// Close the session: stop background work and withdraw from the router.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.router.unregister_session(self.request_id).await;
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockRemoteApi;
    use crate::models::SenderRole;
    use crate::push::{PushClient, PushConfig, PushEvent};
    use crate::store::RequestStore;
    use chrono::{TimeZone, Utc};

    fn message(id: i64, ts: i64, sender_id: i64, role: SenderRole) -> ChatMessage {
        ChatMessage {
            id,
            request_id: 7,
            sender_id,
            sender_role: role,
            body: format!("msg {id}"),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    fn entry(message: ChatMessage, delivery: DeliveryState) -> SessionMessage {
        SessionMessage { message, delivery }
    }

    async fn open_session(
        api: Arc<MockRemoteApi>,
    ) -> (ChatSession, NotificationRouter) {
        let (_client, push, _events) = PushClient::new(PushConfig::new("ws://localhost:1"));
        let store = RequestStore::new();
        let viewer = Viewer::new(9, SenderRole::Fulfiller);
        let (router, _outputs) = NotificationRouter::new(viewer, store, push);
        let session = ChatSession::open(
            api as ApiHandle,
            router.clone(),
            viewer,
            7,
            Duration::from_secs(3),
        )
        .await
        .unwrap();
        (session, router)
    }

    #[test]
    fn duplicate_push_id_is_ignored() {
        let mut thread = vec![entry(
            message(55, 100, 2, SenderRole::Requester),
            DeliveryState::Confirmed,
        )];
        let mut duplicate = message(55, 100, 2, SenderRole::Requester);
        duplicate.body = "different text, same id".into();
        insert_if_absent(&mut thread, duplicate);
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].message.body, "msg 55");
    }

    #[test]
    fn authoritative_merge_keeps_pending_echoes() {
        let mut thread = vec![
            entry(message(1, 100, 2, SenderRole::Requester), DeliveryState::Confirmed),
            entry(message(-1, 150, 9, SenderRole::Fulfiller), DeliveryState::PendingLocal),
        ];
        // Refetch sees messages 1 and 2 but not the still-pending send.
        merge_authoritative(
            &mut thread,
            vec![
                message(1, 100, 2, SenderRole::Requester),
                message(2, 120, 2, SenderRole::Requester),
            ],
        );
        let ids: Vec<i64> = thread.iter().map(|m| m.message.id).collect();
        assert_eq!(ids, vec![1, 2, -1]);
    }

    #[test]
    fn thread_order_is_by_timestamp_then_id() {
        let mut thread = vec![
            entry(message(3, 200, 2, SenderRole::Requester), DeliveryState::Confirmed),
            entry(message(1, 100, 2, SenderRole::Requester), DeliveryState::Confirmed),
            entry(message(2, 100, 9, SenderRole::Fulfiller), DeliveryState::Confirmed),
        ];
        sort_thread(&mut thread);
        let ids: Vec<i64> = thread.iter().map(|m| m.message.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn open_loads_history_oldest_first() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_messages(vec![
            message(2, 200, 2, SenderRole::Requester),
            message(1, 100, 9, SenderRole::Fulfiller),
        ]);
        let (session, _router) = open_session(api).await;
        let ids: Vec<i64> = session.messages().await.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
        session.close().await;
    }

    #[tokio::test]
    async fn pushed_message_lands_in_open_session() {
        let api = Arc::new(MockRemoteApi::new());
        let (session, router) = open_session(api).await;

        router
            .handle_event(PushEvent::NewMessage(message(55, 100, 2, SenderRole::Requester)))
            .await;
        // Give the inbound task a chance to drain the channel.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ids: Vec<i64> = session.messages().await.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![55]);
        session.close().await;
    }

    #[tokio::test]
    async fn send_swaps_provisional_for_server_copy() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_send_result(Ok(message(55, 300, 9, SenderRole::Fulfiller)));
        let (session, _router) = open_session(Arc::clone(&api)).await;

        let confirmed = session.send("on my way").await.unwrap();
        assert_eq!(confirmed.id, 55);

        let ids: Vec<i64> = session.messages().await.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![55]);
        assert!(!session.has_pending().await);
        assert_eq!(api.sent_bodies.lock().unwrap().as_slice(), ["on my way"]);
        session.close().await;
    }

    #[tokio::test]
    async fn failed_send_rolls_back_and_returns_the_draft() {
        let api = Arc::new(MockRemoteApi::new());
        api.set_send_result(Err(SyncError::Validation(
            "Chat is closed for this request".into(),
        )));
        let (session, _router) = open_session(api).await;

        let failure = session.send("hello?").await.unwrap_err();
        assert_eq!(failure.draft, "hello?");
        assert!(matches!(failure.error, SyncError::Validation(_)));
        assert!(session.messages().await.is_empty());
        assert!(!session.has_pending().await);
        session.close().await;
    }

    #[tokio::test]
    async fn send_after_close_is_rejected_without_a_network_call() {
        let api = Arc::new(MockRemoteApi::new());
        let (session, _router) = open_session(Arc::clone(&api)).await;
        session.close().await;

        let failure = session.send("too late").await.unwrap_err();
        assert!(matches!(failure.error, SyncError::SessionClosed));
        assert!(api.sent_bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_withdraws_push_interest() {
        let api = Arc::new(MockRemoteApi::new());
        let (_client, push, _events) = PushClient::new(PushConfig::new("ws://localhost:1"));
        let store = RequestStore::new();
        let viewer = Viewer::new(9, SenderRole::Fulfiller);
        let (router, _outputs) = NotificationRouter::new(viewer, store, push.clone());

        let session = ChatSession::open(
            api as ApiHandle,
            router,
            viewer,
            7,
            Duration::from_secs(3),
        )
        .await
        .unwrap();
        assert!(push.interests().contains(&7));
        session.close().await;
        assert!(!push.interests().contains(&7));
    }
}
