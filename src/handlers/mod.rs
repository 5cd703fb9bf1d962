// src/handlers/mod.rs
// The handler contract and the built-in chain

pub mod ai_chat;
pub mod command;
pub mod media_link;
pub mod ping;

use crate::adapter::MessengerAdapter;
use crate::error::Result;
use crate::transport::{InboundMessage, SendOptions};
use async_trait::async_trait;

/// A message handler. Handlers are plain values wired at startup; the
/// dispatcher walks the ordered chain and the first `matches` wins.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap, synchronous predicate; must not touch the network.
    fn matches(&self, message: &InboundMessage) -> bool;

    async fn handle(&self, message: &InboundMessage, adapter: &MessengerAdapter) -> Result<()>;
}

/// Send a reply on whichever channel the inbound message used.
///
/// E2EE messages must be answered on the encrypted channel, addressed by
/// JID; everything else goes out as a plain thread send.
pub async fn reply(
    adapter: &MessengerAdapter,
    message: &InboundMessage,
    text: &str,
) -> Result<()> {
    if message.is_e2ee {
        let jid = message
            .chat_jid
            .clone()
            .unwrap_or_else(|| format!("{}@msgr.fb", message.thread_id));
        adapter
            .send_e2ee_message(&jid, text, SendOptions::default())
            .await
    } else {
        adapter
            .send_message(message.thread_id, text, SendOptions::default())
            .await
    }
}
