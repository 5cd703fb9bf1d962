// src/pipeline/mod.rs
// The six-stage AI reply pipeline
//
// thread-resolver → context-loader → conversation-analyzer → reply-planner
// → message-composer → safety-gate

pub mod analyzer;
pub mod composer;
pub mod context;
pub mod planner;
pub mod resolver;
pub mod safety;

use crate::error::Result;
use crate::llm::GeminiClient;
use crate::metrics::Metrics;
use crate::store::Store;
use crate::transport::InboundMessage;
use context::ContextLoader;
pub use planner::GatingDecision;
use resolver::ThreadResolution;
use std::sync::Arc;
use tracing::debug;

/// A finished pipeline run: what to send and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReply {
    pub thread_id: i64,
    pub text: String,
}

pub struct AiPipeline {
    store: Arc<Store>,
    llm: Option<Arc<GeminiClient>>,
    context: Arc<ContextLoader>,
    metrics: Arc<Metrics>,
}

impl AiPipeline {
    pub fn new(
        store: Arc<Store>,
        llm: Option<Arc<GeminiClient>>,
        context: Arc<ContextLoader>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            llm,
            context,
            metrics,
        }
    }

    pub fn llm_enabled(&self) -> bool {
        self.llm.is_some()
    }

    /// The context loader, for pressure-callback registration at wiring time.
    pub fn context_loader(&self) -> &Arc<ContextLoader> {
        &self.context
    }

    /// Run all six stages for one inbound message. Returns the reply to
    /// send, already safety-screened.
    pub async fn respond(
        &self,
        message: &InboundMessage,
        gating: GatingDecision,
    ) -> Result<PipelineReply> {
        let text = message.text.as_deref().unwrap_or_default();

        // 1. Which thread is the user talking about?
        let target_thread = match resolver::resolve(&self.store, message.thread_id, text)? {
            ThreadResolution::Resolved { thread_id, .. } => thread_id,
            ThreadResolution::Ambiguous { prompt } => {
                // Ask instead of guessing; the prompt is the reply
                return Ok(PipelineReply {
                    thread_id: message.thread_id,
                    text: prompt,
                });
            }
        };

        // 2. Conversation window
        let context = self.context.load(target_thread, message)?;

        // 3-4. Understand, then decide
        let analysis = analyzer::analyze(&context, text, self.llm.as_deref()).await;
        debug!(
            intent = analysis.intent.as_str(),
            confidence = analysis.confidence,
            "Conversation analyzed"
        );
        let plan = planner::plan(&analysis, gating, text, context.message_count);

        // 5. Compose (search results are resolved by the gating layer and
        // arrive pre-rendered; none here means skip the section)
        let reply_text =
            composer::compose(self.llm.as_deref(), &context.rendered, None, &plan).await?;

        // 6. Safety gate; rejected output becomes the fixed alternative
        let verdict = safety::check(&reply_text);
        let final_text = if verdict.allowed {
            reply_text
        } else {
            self.metrics.increment("safety.blocks");
            debug!(reason = ?verdict.reason, "Reply rejected by safety gate");
            safety::SAFE_ALTERNATIVE.to_string()
        };

        Ok(PipelineReply {
            thread_id: target_thread,
            text: final_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn pipeline() -> AiPipeline {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let context = Arc::new(ContextLoader::new(store.clone()));
        AiPipeline::new(store, None, context, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn test_no_llm_means_compose_unavailable() {
        let p = pipeline();
        let message = MockTransport::text_message("m.1", 1, 2, "hello there");
        let result = p.respond(&message, GatingDecision::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ambiguous_resolution_short_circuits_to_prompt() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.ensure_thread(1, Some("general"), true).unwrap();
        store.ensure_thread(2, Some("team alpha"), true).unwrap();
        store.ensure_thread(3, Some("team beta"), true).unwrap();
        let context = Arc::new(ContextLoader::new(store.clone()));
        let p = AiPipeline::new(store, None, context, Arc::new(Metrics::new()));

        let message =
            MockTransport::text_message("m.1", 1, 2, "send it to that group, the team one");
        let reply = p.respond(&message, GatingDecision::default()).await.unwrap();
        // No LLM needed: the disambiguation prompt is produced before compose
        assert_eq!(reply.thread_id, 1);
        assert!(reply.text.contains("Which conversation"));
    }
}
