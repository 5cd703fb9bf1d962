// src/transport/mock.rs
// Scriptable in-memory transport for tests

use super::{
    ConnectInfo, InboundMessage, MediaBlob, SendOptions, ThreadInfo, Transport, TransportEvent,
    UserInfo,
};
use crate::error::{BotError, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Outbound calls the mock has observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentItem {
    Message { thread_id: i64, text: String },
    E2eeMessage { chat_jid: String, text: String },
    Reaction { thread_id: i64, message_id: String, reaction: String },
    Media { thread_id: i64, file_name: String },
    Typing { thread_id: i64, typing: bool },
    MarkRead { thread_id: i64 },
    ThreadRename { thread_id: i64, name: String },
    LeaveThread { thread_id: i64 },
}

/// In-memory transport double. Tests push events into it and inspect what
/// the engine sent back.
pub struct MockTransport {
    self_id: i64,
    sent: Mutex<Vec<SentItem>>,
    event_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    pending: Mutex<Vec<TransportEvent>>,
    connect_count: AtomicUsize,
    fail_connect: Mutex<Option<BotError>>,
}

impl MockTransport {
    pub fn new(self_id: i64) -> Self {
        Self {
            self_id,
            sent: Mutex::new(Vec::new()),
            event_tx: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            connect_count: AtomicUsize::new(0),
            fail_connect: Mutex::new(None),
        }
    }

    /// Queue events to be emitted as soon as `events()` is called; events
    /// pushed after that go straight down the channel.
    pub async fn push_event(&self, event: TransportEvent) {
        let tx = self
            .event_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match tx {
            Some(tx) => {
                let _ = tx.send(event).await;
            }
            None => {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(event);
            }
        }
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|item| match item {
                SentItem::Message { text, .. } => Some(text),
                SentItem::E2eeMessage { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Make the next `connect()` fail with the given error.
    pub fn fail_next_connect(&self, err: BotError) {
        *self.fail_connect.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
    }

    fn record(&self, item: SentItem) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(item);
    }

    /// Convenience constructor for a plain inbound text message.
    pub fn text_message(id: &str, thread_id: i64, sender_id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            id: id.to_string(),
            thread_id,
            sender_id,
            text: Some(text.to_string()),
            timestamp_ms: 1_700_000_000_000,
            is_e2ee: false,
            chat_jid: None,
            thread_name: None,
            sender_name: None,
            is_group: false,
            attachments: Vec::new(),
            reply_to: None,
            mentions: Vec::new(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<ConnectInfo> {
        if let Some(err) = self
            .fail_connect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            return Err(err);
        }
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectInfo {
            user_id: self.self_id,
            initial_data: serde_json::json!({}),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.event_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        Ok(())
    }

    async fn events(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(256);
        let backlog: Vec<TransportEvent> = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for event in backlog {
            let _ = tx.send(event).await;
        }
        *self.event_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    async fn send_message(&self, thread_id: i64, text: &str, _options: SendOptions) -> Result<()> {
        self.record(SentItem::Message {
            thread_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_e2ee_message(
        &self,
        chat_jid: &str,
        text: &str,
        _options: SendOptions,
    ) -> Result<()> {
        self.record(SentItem::E2eeMessage {
            chat_jid: chat_jid.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_reaction(&self, thread_id: i64, message_id: &str, reaction: &str) -> Result<()> {
        self.record(SentItem::Reaction {
            thread_id,
            message_id: message_id.to_string(),
            reaction: reaction.to_string(),
        });
        Ok(())
    }

    async fn send_media(&self, thread_id: i64, blob: MediaBlob) -> Result<()> {
        self.record(SentItem::Media {
            thread_id,
            file_name: blob.file_name,
        });
        Ok(())
    }

    async fn send_typing_indicator(&self, thread_id: i64, typing: bool) -> Result<()> {
        self.record(SentItem::Typing { thread_id, typing });
        Ok(())
    }

    async fn mark_as_read(&self, thread_id: i64) -> Result<()> {
        self.record(SentItem::MarkRead { thread_id });
        Ok(())
    }

    async fn get_user_info(&self, user_id: i64) -> Result<Option<UserInfo>> {
        Ok(Some(UserInfo {
            id: user_id,
            name: Some(format!("user-{user_id}")),
            username: None,
            profile_picture: None,
        }))
    }

    async fn search_users(&self, _query: &str) -> Result<Vec<UserInfo>> {
        Ok(Vec::new())
    }

    async fn get_thread_info(&self, thread_id: i64) -> Result<Option<ThreadInfo>> {
        Ok(Some(ThreadInfo {
            id: thread_id,
            name: Some(format!("thread-{thread_id}")),
            is_group: false,
            participant_ids: Vec::new(),
        }))
    }

    async fn set_thread_name(&self, thread_id: i64, name: &str) -> Result<()> {
        self.record(SentItem::ThreadRename {
            thread_id,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn leave_thread(&self, thread_id: i64) -> Result<()> {
        self.record(SentItem::LeaveThread { thread_id });
        Ok(())
    }

    async fn get_cookies(&self) -> Result<String> {
        Ok("c_user=1; xs=mock".to_string())
    }

    async fn get_device_data(&self) -> Result<Option<String>> {
        Ok(Some("{\"device\":\"mock\"}".to_string()))
    }

    async fn register_push_notifications(&self, _endpoint: &str) -> Result<()> {
        Ok(())
    }
}
