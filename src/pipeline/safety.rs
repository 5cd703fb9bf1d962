// src/pipeline/safety.rs
// Stage 6: outbound safety gate - synchronous regex scan

use regex::Regex;
use std::sync::LazyLock;

/// Hard ceiling on outbound message length.
const MAX_MESSAGE_LEN: usize = 5000;

/// Patterns for data that must never leave the bot: contact details,
/// card/identity numbers, credential material.
static SENSITIVE_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("phone number", r"\+?\d[\d \-.]{8,}\d"),
        ("email address", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
        ("card number", r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b"),
        ("social security number", r"\b\d{3}-\d{2}-\d{4}\b"),
        ("password", r"(?i)password\s*[:=]\s*\S+"),
        ("secret", r"(?i)secret\s*[:=]\s*\S+"),
        ("api key", r"(?i)\bapi[_-]?key\b\s*[:=]?\s*\S*"),
        ("access token", r"(?i)\b(access|bearer|auth)[_-]?token\b\s*[:=]?\s*\S*"),
    ]
    .iter()
    .map(|(label, pattern)| {
        (
            *label,
            Regex::new(pattern).unwrap_or_else(|e| panic!("invalid sensitive pattern: {e}")),
        )
    })
    .collect()
});

/// Content categories the bot refuses to relay outright.
static BLOCKED_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        (
            "weapon instructions",
            r"(?i)how to (make|build|assemble) (a |an )?(bomb|gun|weapon|explosive)",
        ),
        (
            "intrusion instructions",
            r"(?i)how to (hack|break into|bypass) (a |an |the )?\S+",
        ),
        (
            "self-harm",
            r"(?i)(how to )?(kill|hurt|harm) (myself|yourself)|\bsuicide methods?\b",
        ),
    ]
    .iter()
    .map(|(label, pattern)| {
        (
            *label,
            Regex::new(pattern).unwrap_or_else(|e| panic!("invalid blocked pattern: {e}")),
        )
    })
    .collect()
});

/// Fixed replacement text sent in place of a rejected reply. Must itself
/// pass the gate.
pub const SAFE_ALTERNATIVE: &str =
    "Xin lỗi, mình không thể gửi nội dung đó ở đây. (Sorry, I can't share that content here.)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl SafetyVerdict {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Scan an outbound message. Pure and synchronous; the caller counts
/// rejections and substitutes [`SAFE_ALTERNATIVE`].
pub fn check(text: &str) -> SafetyVerdict {
    if text.chars().count() > MAX_MESSAGE_LEN {
        return SafetyVerdict::rejected(format!(
            "message exceeds {MAX_MESSAGE_LEN} characters"
        ));
    }
    for (label, pattern) in SENSITIVE_PATTERNS.iter() {
        if pattern.is_match(text) {
            return SafetyVerdict::rejected(format!("contains sensitive data: {label}"));
        }
    }
    for (label, pattern) in BLOCKED_PATTERNS.iter() {
        if pattern.is_match(text) {
            return SafetyVerdict::rejected(format!("blocked content: {label}"));
        }
    }
    SafetyVerdict::allowed()
}
