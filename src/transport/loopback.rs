// src/transport/loopback.rs
// Stdin-driven dev backend: each line becomes an inbound message event

use super::{
    ConnectInfo, InboundMessage, MediaBlob, SendOptions, ThreadInfo, Transport, TransportEvent,
    UserInfo,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::info;

/// Sender id assigned to the operator typing at the terminal.
const OPERATOR_ID: i64 = 1_000_001;

/// Thread id for the loopback conversation.
const LOOPBACK_THREAD: i64 = 1;

/// Development transport: reads lines from stdin, emits them as messages in
/// a single loopback thread, and logs every outbound send. Lets the whole
/// engine (dispatch, handlers, pipeline, rate limiting) run without the
/// native client.
pub struct LoopbackTransport {
    self_id: i64,
    connected: AtomicBool,
    next_id: AtomicI64,
    sender: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl LoopbackTransport {
    pub fn new(self_id: i64) -> Self {
        Self {
            self_id,
            connected: AtomicBool::new(false),
            next_id: AtomicI64::new(1),
            sender: Mutex::new(None),
        }
    }

    fn spawn_stdin_reader(&self, tx: mpsc::Sender<TransportEvent>) {
        let mut counter = self.next_id.load(Ordering::Relaxed);
        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut lines = stdin.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let text = line.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                counter += 1;
                let event = TransportEvent::Message(InboundMessage {
                    id: format!("loop.{counter}"),
                    thread_id: LOOPBACK_THREAD,
                    sender_id: OPERATOR_ID,
                    text: Some(text),
                    timestamp_ms: chrono::Utc::now().timestamp_millis(),
                    is_e2ee: false,
                    chat_jid: None,
                    thread_name: Some("loopback".to_string()),
                    sender_name: Some("operator".to_string()),
                    is_group: false,
                    attachments: Vec::new(),
                    reply_to: None,
                    mentions: Vec::new(),
                });
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<ConnectInfo> {
        self.connected.store(true, Ordering::SeqCst);
        info!("Loopback transport connected - type a line to send a message");
        Ok(ConnectInfo {
            user_id: self.self_id,
            initial_data: serde_json::json!({ "backend": "loopback" }),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        Ok(())
    }

    async fn events(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(64);
        let _ = tx.send(TransportEvent::Ready { user_id: self.self_id }).await;
        let _ = tx.send(TransportEvent::E2eeConnected).await;
        self.spawn_stdin_reader(tx.clone());
        if let Ok(mut sender) = self.sender.lock() {
            *sender = Some(tx);
        }
        rx
    }

    async fn send_message(&self, thread_id: i64, text: &str, _options: SendOptions) -> Result<()> {
        info!(thread_id, "loopback send: {}", text);
        Ok(())
    }

    async fn send_e2ee_message(
        &self,
        chat_jid: &str,
        text: &str,
        _options: SendOptions,
    ) -> Result<()> {
        info!(chat_jid, "loopback e2ee send: {}", text);
        Ok(())
    }

    async fn send_reaction(&self, thread_id: i64, message_id: &str, reaction: &str) -> Result<()> {
        info!(thread_id, message_id, "loopback reaction: {}", reaction);
        Ok(())
    }

    async fn send_media(&self, thread_id: i64, blob: MediaBlob) -> Result<()> {
        info!(thread_id, size = blob.bytes.len(), "loopback media send: {}", blob.file_name);
        Ok(())
    }

    async fn send_typing_indicator(&self, _thread_id: i64, _typing: bool) -> Result<()> {
        Ok(())
    }

    async fn mark_as_read(&self, _thread_id: i64) -> Result<()> {
        Ok(())
    }

    async fn get_user_info(&self, user_id: i64) -> Result<Option<UserInfo>> {
        if user_id == OPERATOR_ID {
            Ok(Some(UserInfo {
                id: OPERATOR_ID,
                name: Some("operator".to_string()),
                username: None,
                profile_picture: None,
            }))
        } else {
            Ok(None)
        }
    }

    async fn search_users(&self, _query: &str) -> Result<Vec<UserInfo>> {
        Ok(Vec::new())
    }

    async fn get_thread_info(&self, thread_id: i64) -> Result<Option<ThreadInfo>> {
        if thread_id == LOOPBACK_THREAD {
            Ok(Some(ThreadInfo {
                id: LOOPBACK_THREAD,
                name: Some("loopback".to_string()),
                is_group: false,
                participant_ids: vec![self.self_id, OPERATOR_ID],
            }))
        } else {
            Ok(None)
        }
    }

    async fn set_thread_name(&self, thread_id: i64, name: &str) -> Result<()> {
        info!(thread_id, "loopback thread rename: {}", name);
        Ok(())
    }

    async fn leave_thread(&self, thread_id: i64) -> Result<()> {
        info!(thread_id, "loopback leave thread");
        Ok(())
    }

    async fn get_cookies(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn get_device_data(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn register_push_notifications(&self, _endpoint: &str) -> Result<()> {
        Ok(())
    }
}
