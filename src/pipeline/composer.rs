// src/pipeline/composer.rs
// Stage 5: prompt assembly and the actual reply generation

use super::planner::ReplyPlan;
use crate::error::{BotError, Result};
use crate::llm::GeminiClient;

/// Composition runs warm: replies should read human, not deterministic.
const COMPOSE_TEMPERATURE: f32 = 0.8;

const COMPOSER_SYSTEM_PROMPT: &str = "You are a friendly assistant replying inside a Messenger \
conversation. Match the conversation's language (English or Vietnamese). Write like a person \
texting: no markdown headings, no bullet lists unless asked, no signatures.";

/// Build the fixed prompt template for a planned reply.
pub fn build_prompt(context: &str, search_results: Option<&str>, plan: &ReplyPlan) -> String {
    let mut prompt = String::new();
    prompt.push_str("Conversation so far (oldest first, `[senderId]: text`):\n");
    prompt.push_str(context);
    prompt.push_str("\n\n");

    if let Some(results) = search_results {
        prompt.push_str("Relevant search results:\n");
        prompt.push_str(results);
        prompt.push_str("\n\n");
    }

    prompt.push_str("Reply plan:\n");
    prompt.push_str(&format!("- action: {}\n", plan.action.as_str()));
    prompt.push_str(&format!("- tone: {}\n", plan.tone.as_str()));
    prompt.push_str(&format!("- length: {}\n", plan.length.as_str()));
    if !plan.key_points.is_empty() {
        prompt.push_str(&format!("- key points: {}\n", plan.key_points.join("; ")));
    }
    if !plan.avoid_repeating.is_empty() {
        prompt.push_str(&format!(
            "- do not repeat: {}\n",
            plan.avoid_repeating.join("; ")
        ));
    }
    prompt.push_str(&format!(
        "- open with a greeting: {}\n",
        if plan.include_greeting { "yes" } else { "no" }
    ));

    prompt.push_str(
        "\nWrite ONLY the message body to send. No preamble, no labels, no quotes around it, \
         no explanation of what you did.",
    );
    prompt
}

/// Generate the reply text. `Unavailable` when no LLM is configured; the
/// AI handler never matches in that case, so hitting this means a wiring bug
/// upstream.
pub async fn compose(
    llm: Option<&GeminiClient>,
    context: &str,
    search_results: Option<&str>,
    plan: &ReplyPlan,
) -> Result<String> {
    let client = llm.ok_or_else(|| {
        BotError::Unavailable("message composer requires a configured LLM".to_string())
    })?;
    let prompt = build_prompt(context, search_results, plan);
    let reply = client
        .generate(Some(COMPOSER_SYSTEM_PROMPT), &prompt, COMPOSE_TEMPERATURE)
        .await?;
    Ok(reply.trim().to_string())
}
