// src/adapter/reconnect.rs
// Transport error classification and reconnect backoff

use rand::Rng;
use std::time::Duration;

/// Error-message fragments that mark a failure as transient. Matching is
/// case-insensitive substring.
const TRANSIENT_MARKERS: &[&str] = &[
    "websocket close 1006",
    "unexpected eof",
    "connection reset",
    "econnreset",
    "epipe",
    "etimedout",
    "econnrefused",
    "socket hang up",
    "network changed",
];

/// Backoff ceiling for reconnect attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Base delay for the first reconnect attempt.
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Whether a transport error message is eligible for auto-reconnect.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Exponential backoff with jitter: base * 2^attempt, capped at 60 s, plus
/// up to 10% random jitter so a fleet of bots doesn't reconnect in lockstep.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF
        .checked_mul(2u32.saturating_pow(attempt.min(16)))
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF);
    let jitter_ms = rand::rng().random_range(0..=exp.as_millis() as u64 / 10);
    exp + Duration::from_millis(jitter_ms)
}
