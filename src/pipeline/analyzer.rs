// src/pipeline/analyzer.rs
// Stage 3: conversation analysis - LLM with a heuristic floor

use super::context::ThreadContext;
use crate::llm::GeminiClient;
use crate::llm::json::parse_json_lenient;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Contexts at or below this size skip the LLM entirely.
const HEURISTIC_CUTOFF: usize = 3;

/// Analysis temperature: structured extraction wants determinism.
const ANALYSIS_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Question,
    Request,
    Discussion,
    Greeting,
    Other,
}

impl Intent {
    fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "question" => Intent::Question,
            "request" => Intent::Request,
            "discussion" => Intent::Discussion,
            "greeting" => Intent::Greeting,
            _ => Intent::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Question => "question",
            Intent::Request => "request",
            Intent::Discussion => "discussion",
            Intent::Greeting => "greeting",
            Intent::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Formal,
    Casual,
    Mixed,
}

impl Tone {
    fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "formal" => Tone::Formal,
            "casual" => Tone::Casual,
            _ => Tone::Mixed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Formal => "formal",
            Tone::Casual => "casual",
            Tone::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entities {
    pub people: Vec<String>,
    pub dates: Vec<String>,
    pub products: Vec<String>,
    pub numbers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationAnalysis {
    pub intent: Intent,
    pub tone: Tone,
    pub questions_asked: Vec<String>,
    pub decisions_made: Vec<String>,
    pub unresolved_items: Vec<String>,
    pub entities: Entities,
    pub summary: String,
    pub confidence: f64,
}

/// Wire shape the LLM is asked to emit.
#[derive(Debug, Deserialize)]
struct LlmAnalysis {
    intent: String,
    tone: String,
    #[serde(default)]
    questions_asked: Vec<String>,
    #[serde(default)]
    decisions_made: Vec<String>,
    #[serde(default)]
    unresolved_items: Vec<String>,
    #[serde(default)]
    entities: LlmEntities,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
struct LlmEntities {
    #[serde(default)]
    people: Vec<String>,
    #[serde(default)]
    dates: Vec<String>,
    #[serde(default)]
    products: Vec<String>,
    #[serde(default)]
    numbers: Vec<String>,
}

const ANALYSIS_SYSTEM_PROMPT: &str = "You analyze chat conversations. Respond with STRICT JSON \
only, no prose, matching exactly this schema: {\"intent\": \"question|request|discussion|greeting|other\", \
\"tone\": \"formal|casual|mixed\", \"questions_asked\": [string], \"decisions_made\": [string], \
\"unresolved_items\": [string], \"entities\": {\"people\": [string], \"dates\": [string], \
\"products\": [string], \"numbers\": [string]}, \"summary\": string, \"confidence\": number between 0 and 1}. \
The conversation may be in English or Vietnamese.";

/// Analyze a conversation window. Small contexts and disabled LLMs use the
/// heuristic analyzer; any LLM failure falls back to it too.
pub async fn analyze(
    context: &ThreadContext,
    current_text: &str,
    llm: Option<&GeminiClient>,
) -> ConversationAnalysis {
    let Some(client) = llm else {
        return analyze_heuristic(context, current_text);
    };
    if context.message_count <= HEURISTIC_CUTOFF {
        return analyze_heuristic(context, current_text);
    }

    let prompt = format!(
        "Analyze this conversation. The last line is the newest message.\n\n{}",
        context.rendered
    );
    match client
        .generate(Some(ANALYSIS_SYSTEM_PROMPT), &prompt, ANALYSIS_TEMPERATURE)
        .await
    {
        Ok(raw) => match parse_json_lenient::<LlmAnalysis>(&raw) {
            Ok(parsed) => {
                debug!(intent = %parsed.intent, "LLM analysis parsed");
                ConversationAnalysis {
                    intent: Intent::parse(&parsed.intent),
                    tone: Tone::parse(&parsed.tone),
                    questions_asked: parsed.questions_asked,
                    decisions_made: parsed.decisions_made,
                    unresolved_items: parsed.unresolved_items,
                    entities: Entities {
                        people: parsed.entities.people,
                        dates: parsed.entities.dates,
                        products: parsed.entities.products,
                        numbers: parsed.entities.numbers,
                    },
                    summary: parsed.summary,
                    confidence: parsed.confidence.clamp(0.0, 1.0),
                }
            }
            Err(e) => {
                warn!("LLM analysis unparseable, using heuristic: {}", e);
                analyze_heuristic(context, current_text)
            }
        },
        Err(e) => {
            warn!("LLM analysis failed, using heuristic: {}", e);
            analyze_heuristic(context, current_text)
        }
    }
}

static QUESTION_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(what|how|why|when|where|who|which|can you|could you|do you|is it|are you)\b|không\s*\?|sao\b|gì\b|\bbao nhiêu\b")
        .unwrap_or_else(|e| panic!("invalid question marker pattern: {e}"))
});

static GREETING_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(hello|hi|hey|yo|good (morning|afternoon|evening)|chào|xin chào|chào bạn|alo)\b")
        .unwrap_or_else(|e| panic!("invalid greeting marker pattern: {e}"))
});

static REQUEST_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(please|pls|can you|could you|would you|help me|giúp|làm ơn|hãy)\b")
        .unwrap_or_else(|e| panic!("invalid request marker pattern: {e}"))
});

static FORMAL_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(please|kindly|regards|would you|thank you|dạ|vâng|thưa|kính)\b")
        .unwrap_or_else(|e| panic!("invalid formal marker pattern: {e}"))
});

static CASUAL_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(lol|lmao|haha|bro|dude|yo|ok|oke|nhé|nha|hihi|kk)\b|[:;]\)|😂|🤣")
        .unwrap_or_else(|e| panic!("invalid casual marker pattern: {e}"))
});

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+[\d.,]*").unwrap_or_else(|e| panic!("invalid number pattern: {e}"))
});

/// Regex-only analyzer. Confidence is fixed at 0.5: good enough to plan a
/// reply, never trusted like a model run.
pub fn analyze_heuristic(context: &ThreadContext, current_text: &str) -> ConversationAnalysis {
    let lines: Vec<&str> = context
        .rendered
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();

    let questions_asked: Vec<String> = lines
        .iter()
        .filter(|line| {
            let text = strip_sender(line);
            text.contains('?') || QUESTION_MARKERS.is_match(text)
        })
        .map(|line| strip_sender(line).to_string())
        .collect();

    let formal = lines
        .iter()
        .filter(|l| FORMAL_MARKERS.is_match(strip_sender(l)))
        .count();
    let casual = lines
        .iter()
        .filter(|l| CASUAL_MARKERS.is_match(strip_sender(l)))
        .count();
    let tone = match (formal, casual) {
        (f, 0) if f > 0 => Tone::Formal,
        (0, c) if c > 0 => Tone::Casual,
        (0, 0) => Tone::Casual,
        _ => Tone::Mixed,
    };

    let intent = if GREETING_MARKERS.is_match(current_text) {
        Intent::Greeting
    } else if current_text.contains('?') || QUESTION_MARKERS.is_match(current_text) {
        Intent::Question
    } else if REQUEST_MARKERS.is_match(current_text) {
        Intent::Request
    } else if context.message_count > HEURISTIC_CUTOFF {
        Intent::Discussion
    } else {
        Intent::Other
    };

    let numbers: Vec<String> = NUMBER_PATTERN
        .find_iter(&context.rendered)
        .map(|m| m.as_str().to_string())
        .collect();

    let summary = if lines.is_empty() {
        String::new()
    } else {
        format!("{} messages, latest: {}", lines.len(), strip_sender(lines[lines.len() - 1]))
    };

    ConversationAnalysis {
        intent,
        tone,
        questions_asked,
        decisions_made: Vec::new(),
        unresolved_items: Vec::new(),
        entities: Entities {
            numbers,
            ..Default::default()
        },
        summary,
        confidence: 0.5,
    }
}

/// Drop the leading `[senderId]: ` tag of a rendered line.
fn strip_sender(line: &str) -> &str {
    line.split_once("]: ").map(|(_, rest)| rest).unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn context_of(lines: &[&str]) -> ThreadContext {
        let rendered = lines.join("\n");
        let (base, count) = match lines.split_last() {
            Some((_, rest)) => (rest.join("\n"), lines.len()),
            None => (String::new(), 0),
        };
        ThreadContext {
            base: Arc::new(base),
            rendered,
            message_count: count,
        }
    }

    #[test]
    fn test_greeting_intent() {
        let context = context_of(&["[1]: xin chào mọi người"]);
        let analysis = analyze_heuristic(&context, "xin chào mọi người");
        assert_eq!(analysis.intent, Intent::Greeting);
        assert_eq!(analysis.confidence, 0.5);
    }

    #[test]
    fn test_question_intent_and_collection() {
        let context = context_of(&["[1]: hello", "[2]: what time is the meeting?"]);
        let analysis = analyze_heuristic(&context, "what time is the meeting?");
        assert_eq!(analysis.intent, Intent::Question);
        assert_eq!(
            analysis.questions_asked,
            vec!["what time is the meeting?".to_string()]
        );
    }

    #[test]
    fn test_request_intent() {
        let context = context_of(&["[1]: giúp mình đặt bàn nhé"]);
        let analysis = analyze_heuristic(&context, "giúp mình đặt bàn nhé");
        assert_eq!(analysis.intent, Intent::Request);
    }

    #[test]
    fn test_discussion_for_long_contexts() {
        let context = context_of(&["[1]: a", "[2]: b", "[1]: c", "[2]: we shipped it today"]);
        let analysis = analyze_heuristic(&context, "we shipped it today");
        assert_eq!(analysis.intent, Intent::Discussion);
    }

    #[test]
    fn test_number_extraction() {
        let context = context_of(&["[1]: the order is 1,250.50 for 3 items"]);
        let analysis = analyze_heuristic(&context, "the order is 1,250.50 for 3 items");
        assert_eq!(
            analysis.entities.numbers,
            vec!["1,250.50".to_string(), "3".to_string()]
        );
    }

    #[test]
    fn test_tone_classification() {
        let formal = context_of(&["[1]: Could you kindly confirm? Thank you"]);
        assert_eq!(
            analyze_heuristic(&formal, "Could you kindly confirm? Thank you").tone,
            Tone::Formal
        );

        let casual = context_of(&["[1]: haha ok bro"]);
        assert_eq!(analyze_heuristic(&casual, "haha ok bro").tone, Tone::Casual);

        let mixed = context_of(&["[1]: Thank you kindly", "[2]: lol ok"]);
        assert_eq!(analyze_heuristic(&mixed, "lol ok").tone, Tone::Mixed);
    }

    #[tokio::test]
    async fn test_analyze_without_llm_uses_heuristic() {
        let context = context_of(&["[1]: a", "[2]: b", "[1]: c", "[2]: d", "[1]: question?"]);
        let analysis = analyze(&context, "question?", None).await;
        assert_eq!(analysis.confidence, 0.5);
        assert_eq!(analysis.intent, Intent::Question);
    }

    #[test]
    fn test_intent_and_tone_parsing_tolerant() {
        assert_eq!(Intent::parse("QUESTION"), Intent::Question);
        assert_eq!(Intent::parse("nonsense"), Intent::Other);
        assert_eq!(Tone::parse("Formal"), Tone::Formal);
        assert_eq!(Tone::parse("whatever"), Tone::Mixed);
    }
}
