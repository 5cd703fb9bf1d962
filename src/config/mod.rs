// src/config/mod.rs
// Process configuration - single source of truth for all env vars

pub mod cookies;
pub mod env_file;

use crate::error::{BotError, Result};
use cookies::CookieJar;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Keys the dashboard may edit. Auth cookies are deliberately absent:
/// a compromised dashboard must not be able to swap the session.
pub const EDITABLE_KEYS: &[&str] = &[
    "LOG_LEVEL",
    "ENABLE_E2EE",
    "AUTO_RECONNECT",
    "MAX_CONCURRENT_HANDLERS",
    "HANDLER_TIMEOUT_MS",
    "SEND_RATE_PER_SEC",
    "IDEMPOTENCY_CACHE_SIZE",
    "METRICS_PORT",
    "DEVICE_DATA_PATH",
    "DB_PATH",
    "GEMINI_ENABLED",
    "GEMINI_API_KEY",
    "GEMINI_MODEL",
    "AUTO_RESTART_MINUTES",
];

/// Keys whose values are masked when read back through the dashboard.
pub const SECRET_KEYS: &[&str] = &["GEMINI_API_KEY"];

const MASK: &str = "********";

/// Gemini configuration subset
#[derive(Debug, Clone, Default)]
pub struct GeminiConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
}

impl GeminiConfig {
    fn from_env() -> Self {
        let api_key = read_string("GEMINI_API_KEY");
        let enabled = read_bool("GEMINI_ENABLED").unwrap_or(api_key.is_some()) && api_key.is_some();
        Self {
            enabled,
            api_key,
            model: read_string("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }
}

/// Frozen process configuration, loaded once at startup.
///
/// `update_env` is the only mutation path and it touches the `.env` file and
/// the live process environment, never this snapshot; changed values take
/// effect on the next start (or restart cycle via AUTO_RESTART_MINUTES).
#[derive(Debug, Clone)]
pub struct Config {
    pub cookies: CookieJar,
    pub log_level: String,
    pub enable_e2ee: bool,
    pub auto_reconnect: bool,
    pub max_concurrent_handlers: usize,
    pub handler_timeout_ms: u64,
    pub send_rate_per_sec: u32,
    pub idempotency_cache_size: usize,
    pub metrics_port: u16,
    pub device_data_path: PathBuf,
    pub db_path: PathBuf,
    pub gemini: GeminiConfig,
    pub auto_restart_minutes: Option<u64>,
    /// Transport backend selector (the native client ships separately;
    /// `loopback` is the built-in dev backend).
    pub transport: String,
    /// Keep E2EE device data in memory only, never on disk.
    pub e2ee_memory_only: bool,
    /// Literal device-data blob; takes precedence over the file path.
    pub device_data: Option<String>,
    /// Path of the .env file used for dashboard edits.
    pub env_path: PathBuf,
}

impl Config {
    /// Load `.env` from CWD (process environment takes precedence), then
    /// read and validate every key. Missing auth aborts startup.
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }
        Self::from_current_env(PathBuf::from(".env"))
    }

    /// Build from the current process environment only. Split out so tests
    /// can prepare the environment without touching the filesystem.
    pub fn from_current_env(env_path: PathBuf) -> Result<Self> {
        let cookies = Self::load_cookies()?;

        let config = Self {
            cookies,
            log_level: read_string("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            enable_e2ee: read_bool("ENABLE_E2EE").unwrap_or(true),
            auto_reconnect: read_bool("AUTO_RECONNECT").unwrap_or(true),
            max_concurrent_handlers: read_parsed("MAX_CONCURRENT_HANDLERS")?.unwrap_or(10),
            handler_timeout_ms: read_parsed("HANDLER_TIMEOUT_MS")?.unwrap_or(30_000),
            send_rate_per_sec: read_parsed("SEND_RATE_PER_SEC")?.unwrap_or(5),
            idempotency_cache_size: read_parsed("IDEMPOTENCY_CACHE_SIZE")?.unwrap_or(1000),
            metrics_port: read_parsed("METRICS_PORT")?.unwrap_or(9090),
            device_data_path: read_string("DEVICE_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./device.json")),
            db_path: read_string("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./bot.db")),
            gemini: GeminiConfig::from_env(),
            auto_restart_minutes: read_parsed("AUTO_RESTART_MINUTES")?,
            transport: read_string("TRANSPORT").unwrap_or_else(|| "loopback".to_string()),
            e2ee_memory_only: read_bool("E2EE_MEMORY_ONLY").unwrap_or(false),
            device_data: read_string("DEVICE_DATA"),
            env_path,
        };

        config.validate()?;
        config.log_status();
        Ok(config)
    }

    /// Auth accepts either a full cookie blob or the split key set.
    fn load_cookies() -> Result<CookieJar> {
        if let Some(raw) = read_string("FB_COOKIES") {
            return CookieJar::parse(&raw);
        }
        match (read_string("FB_C_USER"), read_string("FB_XS")) {
            (Some(c_user), Some(xs)) => CookieJar::from_parts(
                &c_user,
                &xs,
                read_string("FB_DATR").as_deref(),
                read_string("FB_FR").as_deref(),
            ),
            _ => Err(BotError::Config(
                "missing auth: set FB_COOKIES, or FB_C_USER and FB_XS".to_string(),
            )),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_handlers == 0 {
            return Err(BotError::Config(
                "MAX_CONCURRENT_HANDLERS must be at least 1".to_string(),
            ));
        }
        if self.send_rate_per_sec == 0 {
            return Err(BotError::Config(
                "SEND_RATE_PER_SEC must be at least 1".to_string(),
            ));
        }
        if self.idempotency_cache_size == 0 {
            return Err(BotError::Config(
                "IDEMPOTENCY_CACHE_SIZE must be at least 1".to_string(),
            ));
        }
        if self.handler_timeout_ms == 0 {
            return Err(BotError::Config(
                "HANDLER_TIMEOUT_MS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn log_status(&self) {
        info!(
            handlers = self.max_concurrent_handlers,
            rate = self.send_rate_per_sec,
            e2ee = self.enable_e2ee,
            llm = self.gemini.is_enabled(),
            transport = %self.transport,
            "Configuration loaded"
        );
        if !self.gemini.is_enabled() {
            warn!("Gemini is not configured - AI replies disabled, heuristic paths only");
        }
    }

    /// The bot's own user id (dispatch drops self-authored events).
    pub fn self_user_id(&self) -> Result<i64> {
        self.cookies.user_id()
    }

    // ── Dashboard env editing ─────────────────────────────────────────

    /// Current values of the editable key set, secrets masked.
    pub fn editable_env(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for key in EDITABLE_KEYS {
            let value = std::env::var(key).unwrap_or_default();
            if SECRET_KEYS.contains(key) && !value.is_empty() {
                out.insert((*key).to_string(), MASK.to_string());
            } else {
                out.insert((*key).to_string(), value);
            }
        }
        out
    }

    /// Merge `updates` into the live environment and the `.env` file.
    /// Only editable keys apply; everything else is silently ignored.
    /// Returns the keys that were actually applied.
    pub fn update_env(&self, updates: &BTreeMap<String, String>) -> Result<Vec<String>> {
        let mut applied = Vec::new();
        let mut file_updates = BTreeMap::new();

        for (key, value) in updates {
            if !EDITABLE_KEYS.contains(&key.as_str()) {
                debug!(key = %key, "Ignoring non-editable env key");
                continue;
            }
            // Never write the mask back over a real secret
            if SECRET_KEYS.contains(&key.as_str()) && value == MASK {
                continue;
            }
            let clean: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
            // SAFETY: single-threaded with respect to env mutation - the
            // dashboard serializes updates through one handler at a time.
            unsafe { std::env::set_var(key, &clean) };
            file_updates.insert(key.clone(), clean);
            applied.push(key.clone());
        }

        if !file_updates.is_empty() {
            env_file::rewrite(&self.env_path, &file_updates)?;
        }
        Ok(applied)
    }
}

fn read_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?.to_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match read_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| BotError::Config(format!("{name} has invalid value {raw:?}"))),
    }
}
