//! Client-side synchronization engine for a two-sided service-request
//! marketplace.
//!
//! The engine keeps a local mirror of the viewer's request list by periodic
//! pull ([`sync`]), maintains a push channel for real-time chat and
//! reassignment events ([`push`]), routes those events to open chat sessions
//! or a passive notification surface ([`router`]), and runs optimistic
//! per-request chat threads ([`chat`]). Status transitions and reward
//! estimation are validated locally ([`status`]) before being submitted
//! through the remote API ([`api`]).

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod push;
pub mod router;
pub mod status;
pub mod store;
pub mod sync;

pub use api::{ApiHandle, HttpRemoteApi, RemoteApi};
pub use chat::{ChatSession, SendFailure};
pub use config::EngineConfig;
pub use error::{Result, SyncError};
pub use models::{
    ChatMessage, NewRequest, Priority, RequestPatch, RequestStatus, SenderRole, ServiceRequest,
    StatusUpdateOutcome, Viewer,
};
pub use push::{ConnectionState, PushClient, PushConfig, PushEvent, PushHandle, ReassignedNotice};
pub use router::{MessageNotice, NotificationRouter, RouterOutputs};
pub use status::{submit_status_update, validate_transition, TransitionEffect};
pub use store::RequestStore;
pub use sync::{SyncScheduler, ViewFilter, DEFAULT_DISTANCE_CEILING, HARD_DISTANCE_CEILING};
