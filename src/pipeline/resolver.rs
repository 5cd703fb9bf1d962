// src/pipeline/resolver.rs
// Stage 1: decide which thread the user is actually talking about

use crate::error::Result;
use crate::store::{Store, ThreadRecord};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Phrases (English and Vietnamese) that reference a different thread.
static REFERENCE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\breply (there|in that (thread|chat|group))\b",
        r"(?i)\bsend (it |that )?(to|in) (that|the other) (thread|chat|group)\b",
        r"(?i)\b(answer|post) (it )?over there\b",
        r"(?i)\bin the other (thread|chat|group)\b",
        r"(?i)trả lời trong đó",
        r"(?i)trả lời bên đó",
        r"(?i)gửi (vào|qua|sang) (nhóm|bên) (kia|đó)",
        r"(?i)nhắn bên đó",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid reference pattern: {e}")))
    .collect()
});

/// Candidates scoring at or below this are discarded.
const SCORE_FLOOR: f64 = 0.4;

/// Minimum score to auto-select without asking.
const CONFIDENT: f64 = 0.75;

/// How many threads to consider.
const CANDIDATE_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum ThreadResolution {
    /// Reply in this thread.
    Resolved { thread_id: i64, confidence: f64 },
    /// Could not pick one confidently; reply with a clarifying prompt.
    Ambiguous { prompt: String },
}

/// Resolve the target thread for a message. No cross-thread reference means
/// the current thread at full confidence.
pub fn resolve(store: &Store, current_thread: i64, text: &str) -> Result<ThreadResolution> {
    if !REFERENCE_PATTERNS.iter().any(|p| p.is_match(text)) {
        return Ok(ThreadResolution::Resolved {
            thread_id: current_thread,
            confidence: 1.0,
        });
    }

    let mut scored: Vec<(f64, ThreadRecord)> = store
        .list_threads(CANDIDATE_LIMIT, 0)?
        .into_iter()
        .filter(|t| t.id != current_thread && t.enabled)
        .map(|t| (score_candidate(&t, text), t))
        .filter(|(score, _)| *score > SCORE_FLOOR)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    match scored.first() {
        Some((score, thread)) if *score >= CONFIDENT => {
            debug!(thread_id = thread.id, score, "Cross-thread reference resolved");
            Ok(ThreadResolution::Resolved {
                thread_id: thread.id,
                confidence: *score,
            })
        }
        Some(_) => {
            let mut lines =
                vec!["Which conversation do you mean? Top matches:".to_string()];
            for (i, (score, thread)) in scored.iter().take(3).enumerate() {
                let name = thread.name.clone().unwrap_or_else(|| thread.id.to_string());
                lines.push(format!("  {}. {} ({:.0}%)", i + 1, name, score * 100.0));
            }
            Ok(ThreadResolution::Ambiguous {
                prompt: lines.join("\n"),
            })
        }
        None => Ok(ThreadResolution::Resolved {
            thread_id: current_thread,
            confidence: 1.0,
        }),
    }
}

/// Name overlap, recency, and group bonuses per the scoring table.
fn score_candidate(thread: &ThreadRecord, text: &str) -> f64 {
    let mut score = 0.0;
    let text_lower = text.to_lowercase();

    if let Some(ref name) = thread.name {
        let name_lower = name.to_lowercase();
        if !name_lower.is_empty() && text_lower.contains(&name_lower) {
            score += 0.4;
        }
        for word in name_lower.split_whitespace() {
            if word.len() >= 3 && text_lower.contains(word) {
                score += 0.3;
            }
        }
    }

    if let Some(age_hours) = hours_since(&thread.updated_at) {
        if age_hours < 1.0 {
            score += 0.2;
        } else if age_hours < 24.0 {
            score += 0.1;
        }
    }

    if thread.is_group {
        score += 0.1;
    }

    score
}

/// Age of a sqlite CURRENT_TIMESTAMP string ("YYYY-MM-DD HH:MM:SS", UTC).
fn hours_since(timestamp: &str) -> Option<f64> {
    let parsed = chrono::NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").ok()?;
    let age = chrono::Utc::now().naive_utc() - parsed;
    Some(age.num_seconds() as f64 / 3600.0)
}
