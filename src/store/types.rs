// src/store/types.rs
// Persisted row types

use serde::Serialize;

/// A persisted inbound message. Platform ids are 64-bit integers; they leave
/// the process as decimal strings so float-based JSON clients can't mangle
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub thread_id: i64,
    pub sender_id: i64,
    pub text: Option<String>,
    pub is_e2ee: bool,
    pub timestamp_ms: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadRecord {
    pub id: i64,
    pub name: Option<String>,
    pub is_group: bool,
    pub prefix: String,
    pub language: String,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: Option<String>,
    pub username: Option<String>,
    pub profile_picture: Option<String>,
    pub is_admin: bool,
    pub is_blocked: bool,
    pub first_seen: String,
    pub updated_at: String,
}

/// Row counts for /api/overview.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreStats {
    pub messages: u64,
    pub threads: u64,
    pub users: u64,
}
