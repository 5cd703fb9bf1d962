// src/handlers/ai_chat.rs
// Catch-all conversational handler backed by the AI pipeline

use super::{Handler, reply};
use crate::adapter::MessengerAdapter;
use crate::error::Result;
use crate::pipeline::{AiPipeline, GatingDecision};
use crate::store::Store;
use crate::transport::{InboundMessage, SendOptions};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct AiChatHandler {
    pipeline: Arc<AiPipeline>,
    store: Arc<Store>,
}

impl AiChatHandler {
    pub fn new(pipeline: Arc<AiPipeline>, store: Arc<Store>) -> Self {
        Self { pipeline, store }
    }

    fn thread_enabled(&self, thread_id: i64) -> bool {
        self.store
            .get_thread(thread_id)
            .ok()
            .flatten()
            .map(|t| t.enabled)
            .unwrap_or(true)
    }
}

#[async_trait]
impl Handler for AiChatHandler {
    fn name(&self) -> &'static str {
        "ai-chat"
    }

    /// Catch-all, but only when there is something to reply to and an LLM
    /// to reply with. Disabled threads stay silent.
    fn matches(&self, message: &InboundMessage) -> bool {
        if !self.pipeline.llm_enabled() {
            return false;
        }
        let has_text = message
            .text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        has_text && self.thread_enabled(message.thread_id)
    }

    async fn handle(&self, message: &InboundMessage, adapter: &MessengerAdapter) -> Result<()> {
        let result = self
            .pipeline
            .respond(message, GatingDecision::default())
            .await?;

        if result.thread_id == message.thread_id {
            reply(adapter, message, &result.text).await?;
        } else {
            // Cross-thread replies always go out on the plain channel; the
            // resolver never targets an E2EE chat it can't address
            debug!(
                from = message.thread_id,
                to = result.thread_id,
                "Posting reply to referenced thread"
            );
            adapter
                .send_message(result.thread_id, &result.text, SendOptions::default())
                .await?;
        }
        // The reply changes the target conversation; next load re-renders
        self.pipeline.context_loader().invalidate(result.thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::pipeline::context::ContextLoader;
    use crate::transport::mock::MockTransport;

    fn handler_with_llm(enabled: bool) -> AiChatHandler {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let context = Arc::new(ContextLoader::new(store.clone()));
        let llm = if enabled {
            let config = crate::config::GeminiConfig {
                enabled: true,
                api_key: Some("test-key".to_string()),
                model: "gemini-2.0-flash".to_string(),
            };
            crate::llm::GeminiClient::from_config(&config).map(Arc::new)
        } else {
            None
        };
        let pipeline = Arc::new(AiPipeline::new(
            store.clone(),
            llm,
            context,
            Arc::new(Metrics::new()),
        ));
        AiChatHandler::new(pipeline, store)
    }

    #[test]
    fn test_no_llm_never_matches() {
        let handler = handler_with_llm(false);
        assert!(!handler.matches(&MockTransport::text_message("m.1", 1, 2, "hello")));
    }

    #[test]
    fn test_llm_matches_text_messages() {
        let handler = handler_with_llm(true);
        assert!(handler.matches(&MockTransport::text_message("m.1", 1, 2, "hello")));

        let mut empty = MockTransport::text_message("m.2", 1, 2, "   ");
        assert!(!handler.matches(&empty));
        empty.text = None;
        assert!(!handler.matches(&empty));
    }

    #[test]
    fn test_disabled_thread_does_not_match() {
        let handler = handler_with_llm(true);
        handler.store.ensure_thread(5, None, false).unwrap();
        handler.store.set_thread_enabled(5, false).unwrap();
        assert!(!handler.matches(&MockTransport::text_message("m.1", 5, 2, "hello")));
        assert!(handler.matches(&MockTransport::text_message("m.2", 6, 2, "hello")));
    }
}
