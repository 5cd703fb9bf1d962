// src/llm/mod.rs
// Gemini API client (non-streaming)

pub mod json;

use crate::config::GeminiConfig;
use crate::error::{BotError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Maximum retry attempts for transient API failures
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff between retries (doubles each attempt)
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Per-request ceiling. A chat reply capped at 2048 output tokens finishes
/// well inside a minute even on a slow day; anything beyond that is a hung
/// request, and the handler timeout upstream must see it fail, not wait.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A connect that takes longer than this is a dead route; fail fast and let
/// the retry loop take over.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

/// Gemini text-generation client. Owns its reqwest client, sized for chat
/// replies (one pooled connection to a single host, 60 s ceiling).
pub struct GeminiClient {
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl GeminiClient {
    /// Build from config; None when Gemini is disabled, has no key, or the
    /// HTTP client cannot be constructed (the bot then runs LLM-free rather
    /// than dying at startup).
    pub fn from_config(config: &GeminiConfig) -> Option<Self> {
        if !config.is_enabled() {
            return None;
        }
        let http = match reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!("Gemini HTTP client construction failed, AI replies disabled: {}", e);
                return None;
            }
        };
        Some(Self {
            api_key: config.api_key.clone()?,
            model: config.model.clone(),
            http,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// One-shot generation. Returns the trimmed text of the first candidate.
    pub async fn generate(
        &self,
        system: Option<&str>,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String> {
        let request_id = Uuid::new_v4().to_string();
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: user_prompt.to_string(),
                }],
            }],
            system_instruction: system.map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            }),
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: 2048,
            },
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        );
        let body = serde_json::to_string(&request)?;
        debug!(request_id = %request_id, model = %self.model, "Gemini request");

        let response_body = self.execute_with_retry(&request_id, &url, body).await?;
        let data: GeminiResponse = serde_json::from_str(&response_body)
            .map_err(|e| BotError::Llm(format!("failed to parse Gemini response: {e}")))?;

        let text = data
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(BotError::Llm("Gemini returned no candidates".to_string()));
        }
        Ok(text.trim().to_string())
    }

    /// POST with retry on 429/5xx/network errors, doubled backoff.
    async fn execute_with_retry(
        &self,
        request_id: &str,
        url: &str,
        body: String,
    ) -> Result<String> {
        let mut attempts = 0;
        let mut backoff = BASE_BACKOFF;

        loop {
            let response = self
                .http
                .post(url)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.text().await?);
                    }
                    let error_body = response.text().await.unwrap_or_default();
                    if attempts < MAX_ATTEMPTS
                        && (status.as_u16() == 429 || status.is_server_error())
                    {
                        warn!(
                            request_id = %request_id,
                            status = %status,
                            "Transient Gemini error, retrying in {:?}",
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        backoff *= 2;
                        continue;
                    }
                    return Err(BotError::Llm(format!("Gemini API {status}: {error_body}")));
                }
                Err(e) => {
                    if attempts < MAX_ATTEMPTS {
                        warn!(
                            request_id = %request_id,
                            error = %e,
                            "Gemini request failed, retrying in {:?}",
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        backoff *= 2;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_config_yields_no_client() {
        let config = GeminiConfig {
            enabled: false,
            api_key: Some("key".to_string()),
            model: "gemini-2.0-flash".to_string(),
        };
        assert!(GeminiClient::from_config(&config).is_none());
    }

    #[test]
    fn test_enabled_config_builds_client() {
        let config = GeminiConfig {
            enabled: true,
            api_key: Some("key".to_string()),
            model: "gemini-2.0-flash".to_string(),
        };
        let client = GeminiClient::from_config(&config).unwrap();
        assert_eq!(client.model_name(), "gemini-2.0-flash");
    }

    #[test]
    fn test_response_text_extraction() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"hello "},{"text":"there"}]}}]}"#;
        let data: GeminiResponse = serde_json::from_str(raw).unwrap();
        let text: String = data
            .candidates
            .unwrap()
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap();
        assert_eq!(text, "hello there");
    }
}
