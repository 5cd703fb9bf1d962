// src/handlers/command.rs
// Prefix-triggered command execution

use super::{Handler, reply};
use crate::adapter::MessengerAdapter;
use crate::commands::{CommandContext, CommandRegistry};
use crate::error::Result;
use crate::store::Store;
use crate::transport::InboundMessage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct CommandHandler {
    store: Arc<Store>,
    registry: CommandRegistry,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>, registry: CommandRegistry) -> Self {
        Self { store, registry }
    }

    /// The thread's configured prefix, defaulting to "!" for threads the
    /// store hasn't seen yet.
    fn prefix_for(&self, thread_id: i64) -> String {
        self.store
            .get_thread(thread_id)
            .ok()
            .flatten()
            .map(|t| t.prefix)
            .unwrap_or_else(|| "!".to_string())
    }

    fn parse<'a>(&self, message: &'a InboundMessage) -> Option<(String, Vec<&'a str>)> {
        let text = message.text.as_deref()?.trim();
        let prefix = self.prefix_for(message.thread_id);
        let rest = text.strip_prefix(&prefix)?;
        let mut parts = rest.split_whitespace();
        let name = parts.next()?.to_lowercase();
        Some((name, parts.collect()))
    }
}

#[async_trait]
impl Handler for CommandHandler {
    fn name(&self) -> &'static str {
        "command"
    }

    fn matches(&self, message: &InboundMessage) -> bool {
        self.parse(message).is_some()
    }

    async fn handle(&self, message: &InboundMessage, adapter: &MessengerAdapter) -> Result<()> {
        let Some((name, args)) = self.parse(message) else {
            return Ok(());
        };
        let sender_is_admin = self
            .store
            .get_user(message.sender_id)?
            .map(|u| u.is_admin)
            .unwrap_or(false);
        debug!(command = %name, sender = message.sender_id, admin = sender_is_admin, "Executing command");

        let ctx = CommandContext {
            store: &self.store,
            message,
            sender_is_admin,
        };
        let text = match self.registry.dispatch(&ctx, &name, &args).await {
            Ok(text) => text,
            Err(e) => format!("⚠️ {e}"),
        };
        reply(adapter, message, &text).await
    }
}
