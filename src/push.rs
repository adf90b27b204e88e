//! Push channel client.
//!
//! Maintains a WebSocket connection to the marketplace push endpoint with
//! automatic reconnection (bounded exponential backoff, unlimited attempts)
//! and re-declares the full interest set after every reconnect. Commands are
//! queued through a channel, so REST-based functionality never blocks on the
//! connection being up.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::models::ChatMessage;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Push channel configuration
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// WebSocket URL of the push endpoint
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Initial reconnection delay
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
}

impl PushConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Client-to-server commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PushCommand {
    Join { request_id: i64 },
    Leave { request_id: i64 },
}

/// Payload of a `request_reassigned` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassignedNotice {
    pub request_id: i64,
    pub fulfiller_id: i64,
    pub fulfiller_name: String,
    #[serde(default)]
    pub fulfiller_address: Option<String>,
    #[serde(default)]
    pub match_score: Option<f64>,
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    RequestReassigned(ReassignedNotice),
    NewMessage(ChatMessage),
}

/// Parse one text frame from the push channel.
///
/// Unknown event kinds are skipped (`Ok(None)`) so the server can grow its
/// vocabulary without breaking older clients; frames that are not JSON
/// objects with an `event` tag are protocol errors.
fn parse_push_event(text: &str) -> Result<Option<PushEvent>> {
    let value: Value = serde_json::from_str(text)?;
    let tag = value
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Protocol("frame missing event tag".into()))?;
    match tag {
        "request_reassigned" | "new_message" => Ok(Some(serde_json::from_value(value)?)),
        other => {
            debug!(event = other, "ignoring unknown push event kind");
            Ok(None)
        }
    }
}

enum Control {
    Command(PushCommand),
    Shutdown,
}

/// Cloneable handle for declaring interest and shutting the channel down.
///
/// `join`/`leave` update the interest set immediately and enqueue the wire
/// command; if the connection is down the set is re-declared wholesale on
/// the next reconnect.
#[derive(Clone)]
pub struct PushHandle {
    ctrl_tx: mpsc::UnboundedSender<Control>,
    interests: Arc<Mutex<HashSet<i64>>>,
    state: Arc<RwLock<ConnectionState>>,
}

impl PushHandle {
    /// Declare interest in a request id. Idempotent.
    pub fn join(&self, request_id: i64) {
        let inserted = self.interests.lock().unwrap().insert(request_id);
        if inserted {
            let _ = self
                .ctrl_tx
                .send(Control::Command(PushCommand::Join { request_id }));
        }
    }

    /// Withdraw interest in a request id. Idempotent.
    pub fn leave(&self, request_id: i64) {
        let removed = self.interests.lock().unwrap().remove(&request_id);
        if removed {
            let _ = self
                .ctrl_tx
                .send(Control::Command(PushCommand::Leave { request_id }));
        }
    }

    /// Current interest set.
    pub fn interests(&self) -> HashSet<i64> {
        self.interests.lock().unwrap().clone()
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Ask the connection task to close and stop reconnecting.
    pub fn shutdown(&self) {
        let _ = self.ctrl_tx.send(Control::Shutdown);
    }
}

/// Connection task for the push channel. Created together with its handle
/// and event receiver; `run()` consumes it.
pub struct PushClient {
    config: PushConfig,
    ctrl_rx: mpsc::UnboundedReceiver<Control>,
    events_tx: mpsc::UnboundedSender<PushEvent>,
    interests: Arc<Mutex<HashSet<i64>>>,
    state: Arc<RwLock<ConnectionState>>,
}

impl PushClient {
    /// Create the client, its handle, and the inbound event stream.
    pub fn new(
        config: PushConfig,
    ) -> (Self, PushHandle, mpsc::UnboundedReceiver<PushEvent>) {
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let interests = Arc::new(Mutex::new(HashSet::new()));
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let handle = PushHandle {
            ctrl_tx,
            interests: Arc::clone(&interests),
            state: Arc::clone(&state),
        };
        let client = Self {
            config,
            ctrl_rx,
            events_tx,
            interests,
            state,
        };
        (client, handle, events_rx)
    }

    /// Drive the connection until shutdown: connect, forward frames, and
    /// reconnect with backoff on any failure.
    pub async fn run(mut self) {
        let mut backoff = Backoff::new(
            self.config.reconnect_delay,
            self.config.max_reconnect_delay,
        );
        let mut first_attempt = true;

        loop {
            *self.state.write().await = if first_attempt {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };

            let ws = match timeout(
                self.config.connect_timeout,
                connect_async(&self.config.url),
            )
            .await
            {
                Ok(Ok((stream, _))) => Some(stream),
                Ok(Err(e)) => {
                    warn!(url = %self.config.url, error = %e, "push connect failed");
                    None
                }
                Err(_) => {
                    warn!(url = %self.config.url, "push connect timed out");
                    None
                }
            };
            first_attempt = false;

            let Some(ws) = ws else {
                let delay = backoff.next_delay();
                debug!(?delay, "waiting before reconnecting to push channel");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    ctrl = self.ctrl_rx.recv() => match ctrl {
                        // Interest-set commands queued while offline are
                        // covered by the re-declaration after connect.
                        Some(Control::Command(_)) => continue,
                        Some(Control::Shutdown) | None => {
                            *self.state.write().await = ConnectionState::Disconnected;
                            return;
                        }
                    },
                }
            };

            info!(url = %self.config.url, "push channel connected");
            *self.state.write().await = ConnectionState::Connected;
            backoff.reset();

            let (mut sink, mut stream) = ws.split();

            // Re-declare the full interest set after every (re)connect.
            let interests: Vec<i64> = self.interests.lock().unwrap().iter().copied().collect();
            let mut send_failed = false;
            for request_id in interests {
                if Self::send_command(&mut sink, &PushCommand::Join { request_id })
                    .await
                    .is_err()
                {
                    send_failed = true;
                    break;
                }
            }
            if send_failed {
                continue;
            }

            loop {
                tokio::select! {
                    ctrl = self.ctrl_rx.recv() => match ctrl {
                        Some(Control::Command(cmd)) => {
                            if Self::send_command(&mut sink, &cmd).await.is_err() {
                                break;
                            }
                        }
                        Some(Control::Shutdown) | None => {
                            let _ = sink.send(Message::Close(None)).await;
                            *self.state.write().await = ConnectionState::Disconnected;
                            info!("push channel shut down");
                            return;
                        }
                    },
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => match parse_push_event(&text) {
                            Ok(Some(event)) => {
                                let _ = self.events_tx.send(event);
                            }
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "bad frame on push channel"),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("push channel closed by server");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "push channel error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }
            // Fall through to reconnect.
        }
    }

    async fn send_command<S>(sink: &mut S, cmd: &PushCommand) -> Result<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        let text = serde_json::to_string(cmd)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| SyncError::WebSocket(e.to_string()))
    }
}

/// Exponential backoff with a delay cap and no attempt limit.
struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_command_wire_format() {
        let text = serde_json::to_string(&PushCommand::Join { request_id: 7 }).unwrap();
        assert_eq!(text, r#"{"command":"join","request_id":7}"#);
        let text = serde_json::to_string(&PushCommand::Leave { request_id: 7 }).unwrap();
        assert_eq!(text, r#"{"command":"leave","request_id":7}"#);
    }

    #[test]
    fn parse_new_message_event() {
        let text = r#"{
            "event": "new_message",
            "id": 55,
            "request_id": 7,
            "sender_id": 3,
            "sender_role": "requester",
            "message": "are you close?",
            "timestamp": "2024-04-02T10:00:00Z"
        }"#;
        match parse_push_event(text).unwrap() {
            Some(PushEvent::NewMessage(msg)) => {
                assert_eq!(msg.id, 55);
                assert_eq!(msg.request_id, 7);
                assert_eq!(msg.body, "are you close?");
            }
            other => panic!("expected NewMessage, got {other:?}"),
        }
    }

    #[test]
    fn parse_reassigned_event_with_and_without_optionals() {
        let text = r#"{
            "event": "request_reassigned",
            "request_id": 7,
            "fulfiller_id": 3,
            "fulfiller_name": "Sam",
            "fulfiller_address": "12 Elm St",
            "match_score": 0.82
        }"#;
        match parse_push_event(text).unwrap() {
            Some(PushEvent::RequestReassigned(notice)) => {
                assert_eq!(notice.fulfiller_name, "Sam");
                assert_eq!(notice.match_score, Some(0.82));
            }
            other => panic!("expected RequestReassigned, got {other:?}"),
        }

        let text = r#"{
            "event": "request_reassigned",
            "request_id": 7,
            "fulfiller_id": 3,
            "fulfiller_name": "Sam"
        }"#;
        match parse_push_event(text).unwrap() {
            Some(PushEvent::RequestReassigned(notice)) => {
                assert!(notice.fulfiller_address.is_none());
                assert!(notice.match_score.is_none());
            }
            other => panic!("expected RequestReassigned, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_kind_is_skipped() {
        let text = r#"{"event": "request_created", "request_id": 1}"#;
        assert!(parse_push_event(text).unwrap().is_none());
    }

    #[test]
    fn frame_without_event_tag_is_a_protocol_error() {
        let result = parse_push_event(r#"{"request_id": 1}"#);
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn handle_tracks_interests_and_dedupes_commands() {
        let (mut client, handle, _events) = PushClient::new(PushConfig::new("ws://localhost:1"));

        handle.join(7);
        handle.join(7);
        handle.join(9);
        handle.leave(9);
        handle.leave(9);

        assert_eq!(handle.interests(), HashSet::from([7]));

        let mut sent = Vec::new();
        while let Ok(ctrl) = client.ctrl_rx.try_recv() {
            if let Control::Command(cmd) = ctrl {
                sent.push(cmd);
            }
        }
        assert_eq!(
            sent,
            vec![
                PushCommand::Join { request_id: 7 },
                PushCommand::Join { request_id: 9 },
                PushCommand::Leave { request_id: 9 },
            ]
        );
    }

    #[tokio::test]
    async fn initial_state_is_disconnected() {
        let (_client, handle, _events) = PushClient::new(PushConfig::new("ws://localhost:1"));
        assert_eq!(handle.state().await, ConnectionState::Disconnected);
    }
}
