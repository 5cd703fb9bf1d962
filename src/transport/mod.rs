// src/transport/mod.rs
// The transport seam: event types and the operations the native client exposes
//
// The actual Meta client is an external collaborator; this module defines the
// contract the adapter consumes, plus the built-in `loopback` dev backend and
// the scriptable mock used by tests.

pub mod loopback;
pub mod mock;

use crate::config::Config;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// An attachment riding on an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: String,
    pub url: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTo {
    pub message_id: String,
    pub sender_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub user_id: i64,
    pub offset: usize,
    pub length: usize,
}

/// An inbound message, plain or E2EE. Platform ids are 64-bit integers and
/// must never pass through a float representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub thread_id: i64,
    pub sender_id: i64,
    pub text: Option<String>,
    pub timestamp_ms: i64,
    pub is_e2ee: bool,
    /// E2EE addressing, present only on the encrypted channel.
    pub chat_jid: Option<String>,
    pub thread_name: Option<String>,
    pub sender_name: Option<String>,
    pub is_group: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<ReplyTo>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub message_id: String,
    pub thread_id: i64,
    pub sender_id: i64,
    pub reaction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptEvent {
    pub thread_id: i64,
    pub reader_id: i64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    pub thread_id: i64,
    pub user_id: i64,
    pub is_typing: bool,
}

/// Everything the transport can hand us, as a tagged sum so dispatch match
/// is exhaustive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Ready { user_id: i64 },
    Reconnected,
    Disconnected { reason: Option<String> },
    Error { message: String, code: Option<i32> },
    Message(InboundMessage),
    MessageEdit { message_id: String, thread_id: i64, new_text: String },
    MessageUnsend { message_id: String, thread_id: i64 },
    Reaction(ReactionEvent),
    Typing(TypingEvent),
    ReadReceipt(ReceiptEvent),
    E2eeConnected,
    E2eeMessage(InboundMessage),
    E2eeReaction(ReactionEvent),
    E2eeReceipt(ReceiptEvent),
    DeviceDataChanged { blob: String },
    Raw { payload: String },
}

impl TransportEvent {
    /// The key used to recognise already-processed events: the message id
    /// when the event carries one, otherwise the event's own identifier.
    pub fn dedup_key(&self) -> Option<String> {
        match self {
            TransportEvent::Message(m) | TransportEvent::E2eeMessage(m) => Some(m.id.clone()),
            TransportEvent::Reaction(r) | TransportEvent::E2eeReaction(r) => {
                Some(format!("react:{}:{}:{}", r.message_id, r.sender_id, r.reaction))
            }
            TransportEvent::MessageEdit { message_id, .. } => Some(format!("edit:{message_id}")),
            TransportEvent::MessageUnsend { message_id, .. } => {
                Some(format!("unsend:{message_id}"))
            }
            _ => None,
        }
    }

    /// Message-like events are queued until the session is fully ready.
    pub fn is_queueable(&self) -> bool {
        matches!(
            self,
            TransportEvent::Message(_)
                | TransportEvent::E2eeMessage(_)
                | TransportEvent::Reaction(_)
                | TransportEvent::E2eeReaction(_)
                | TransportEvent::MessageEdit { .. }
                | TransportEvent::MessageUnsend { .. }
                | TransportEvent::ReadReceipt(_)
                | TransportEvent::E2eeReceipt(_)
        )
    }
}

/// Options for an outbound send beyond plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub reply_to_message_id: Option<String>,
    pub mentions: Vec<Mention>,
}

/// A media payload for the send paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Voice,
    File,
    Sticker,
}

/// Basic profile data from `get_user_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub name: Option<String>,
    pub username: Option<String>,
    pub profile_picture: Option<String>,
}

/// Thread metadata from the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: i64,
    pub name: Option<String>,
    pub is_group: bool,
    #[serde(default)]
    pub participant_ids: Vec<i64>,
}

/// Result of a successful connect.
#[derive(Debug, Clone)]
pub struct ConnectInfo {
    pub user_id: i64,
    /// Opaque initial payload from the platform (threads, presence, ...).
    pub initial_data: serde_json::Value,
}

/// The native client surface the adapter wraps. Send operations resolve when
/// the platform acknowledges the send.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<ConnectInfo>;

    /// Idempotent teardown.
    async fn disconnect(&self) -> Result<()>;

    /// The inbound event stream. Each call returns the receiver half of the
    /// connection's event channel; only one receiver is active at a time.
    async fn events(&self) -> mpsc::Receiver<TransportEvent>;

    async fn send_message(&self, thread_id: i64, text: &str, options: SendOptions) -> Result<()>;

    async fn send_e2ee_message(
        &self,
        chat_jid: &str,
        text: &str,
        options: SendOptions,
    ) -> Result<()>;

    async fn send_reaction(&self, thread_id: i64, message_id: &str, reaction: &str) -> Result<()>;

    async fn send_media(&self, thread_id: i64, blob: MediaBlob) -> Result<()>;

    async fn send_typing_indicator(&self, thread_id: i64, typing: bool) -> Result<()>;

    async fn mark_as_read(&self, thread_id: i64) -> Result<()>;

    async fn get_user_info(&self, user_id: i64) -> Result<Option<UserInfo>>;

    async fn search_users(&self, query: &str) -> Result<Vec<UserInfo>>;

    async fn get_thread_info(&self, thread_id: i64) -> Result<Option<ThreadInfo>>;

    async fn set_thread_name(&self, thread_id: i64, name: &str) -> Result<()>;

    async fn leave_thread(&self, thread_id: i64) -> Result<()>;

    async fn get_cookies(&self) -> Result<String>;

    async fn get_device_data(&self) -> Result<Option<String>>;

    /// Pass-through registration; the delivery path lives in the platform.
    async fn register_push_notifications(&self, endpoint: &str) -> Result<()>;
}

/// Resolve the configured transport backend.
///
/// The native Meta client is linked in by downstream builds; this crate
/// ships `loopback` (stdin-driven dev backend) so the full engine can be
/// exercised locally, the same way the pack's timing stack ships a reader
/// emulator.
pub fn create(config: &Config) -> Result<Box<dyn Transport>> {
    match config.transport.as_str() {
        "loopback" => Ok(Box::new(loopback::LoopbackTransport::new(
            config.self_user_id()?,
        ))),
        other => Err(BotError::Config(format!(
            "unknown transport backend {other:?} (available: loopback)"
        ))),
    }
}
