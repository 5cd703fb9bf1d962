// src/pipeline/context.rs
// Stage 2: conversation context loading with a small TTL cache

use crate::error::Result;
use crate::metrics::memory;
use crate::store::Store;
use crate::transport::InboundMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// How many stored messages feed the context window.
pub const MAX_CONTEXT_MESSAGES: u32 = 50;

/// Cached renders go stale after this.
const CACHE_TTL: Duration = Duration::from_secs(3 * 60);

/// Cache entry cap; oldest entry is evicted on overflow.
const CACHE_CAP: usize = 15;

/// Heap fraction above which the whole cache is flushed on load.
const PRESSURE_FLUSH_THRESHOLD: f64 = 0.65;

/// Minimum spacing between pressure flushes.
const PRESSURE_COOLDOWN: Duration = Duration::from_secs(15);

struct CacheEntry {
    base: Arc<String>,
    message_count: usize,
    loaded_at: Instant,
}

/// A rendered conversation window for the analyzer and composer.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    /// The cached history render (no current message).
    pub base: Arc<String>,
    /// History plus the current message, one `[senderId]: text` line each.
    pub rendered: String,
    /// Number of lines in `rendered`, current message included.
    pub message_count: usize,
}

/// Per-thread context cache over the store.
///
/// Appending the current message reuses the cached base by concatenation;
/// the base render is only rebuilt on TTL expiry, invalidation, or flush.
pub struct ContextLoader {
    store: Arc<Store>,
    cache: Mutex<HashMap<i64, CacheEntry>>,
    last_pressure_flush: Mutex<Option<Instant>>,
}

impl ContextLoader {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            last_pressure_flush: Mutex::new(None),
        }
    }

    /// Load the context for `thread_id`, appending `current`.
    pub fn load(&self, thread_id: i64, current: &InboundMessage) -> Result<ThreadContext> {
        self.flush_if_pressured();

        let now = Instant::now();
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(&thread_id)
                && now.duration_since(entry.loaded_at) < CACHE_TTL
            {
                return Ok(Self::append_current(entry, current));
            }
        }

        let mut history = self.store.get_messages(thread_id, MAX_CONTEXT_MESSAGES)?;
        history.reverse(); // store returns newest-first; context is chronological

        let lines: Vec<String> = history
            .iter()
            .filter(|m| {
                m.id != current.id
                    && m.text.as_deref().map(|t| !t.trim().is_empty()).unwrap_or(false)
            })
            .map(|m| format!("[{}]: {}", m.sender_id, m.text.as_deref().unwrap_or_default()))
            .collect();
        let entry = CacheEntry {
            message_count: lines.len(),
            base: Arc::new(lines.join("\n")),
            loaded_at: now,
        };
        let context = Self::append_current(&entry, current);

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= CACHE_CAP && !cache.contains_key(&thread_id) {
            // Evict the stalest entry to stay within the cap
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, e)| e.loaded_at)
                .map(|(id, _)| *id)
            {
                cache.remove(&oldest);
            }
        }
        cache.insert(thread_id, entry);
        Ok(context)
    }

    fn append_current(entry: &CacheEntry, current: &InboundMessage) -> ThreadContext {
        let current_line = format!(
            "[{}]: {}",
            current.sender_id,
            current.text.as_deref().unwrap_or_default()
        );
        let rendered = if entry.base.is_empty() {
            current_line
        } else {
            format!("{}\n{}", entry.base, current_line)
        };
        ThreadContext {
            base: entry.base.clone(),
            rendered,
            message_count: entry.message_count + 1,
        }
    }

    /// Drop one thread's cached render (e.g. after posting a reply there).
    pub fn invalidate(&self, thread_id: i64) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&thread_id);
    }

    /// Drop everything. Registered as a memory-pressure callback.
    pub fn flush_all(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if !cache.is_empty() {
            debug!(entries = cache.len(), "Context cache flushed");
            cache.clear();
        }
    }

    pub fn cached_threads(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Flush under heap pressure, at most once per cooldown window.
    fn flush_if_pressured(&self) {
        let stats = memory::sample();
        if stats.used_fraction() <= PRESSURE_FLUSH_THRESHOLD {
            return;
        }
        let mut last = self
            .last_pressure_flush
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some(previous) = *last
            && now.duration_since(previous) < PRESSURE_COOLDOWN
        {
            return;
        }
        *last = Some(now);
        drop(last);
        self.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn seeded_store() -> Arc<Store> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.ensure_thread(1, Some("general"), true).unwrap();
        store.save_message("m.1", 1, 10, Some("hello"), false, 1000).unwrap();
        store.save_message("m.2", 1, 11, Some("hi there"), false, 2000).unwrap();
        store.save_message("m.3", 1, 10, None, false, 3000).unwrap(); // attachment-only
        store.save_message("m.4", 1, 11, Some("how are you?"), false, 4000).unwrap();
        store
    }

    #[test]
    fn test_render_is_chronological_and_skips_empty() {
        let loader = ContextLoader::new(seeded_store());
        let current = MockTransport::text_message("m.5", 1, 12, "fine thanks");
        let context = loader.load(1, &current).unwrap();

        assert_eq!(
            context.rendered,
            "[10]: hello\n[11]: hi there\n[11]: how are you?\n[12]: fine thanks"
        );
        assert_eq!(context.message_count, 4);
    }

    #[test]
    fn test_cached_base_is_reused_by_pointer() {
        let loader = ContextLoader::new(seeded_store());
        let first = loader
            .load(1, &MockTransport::text_message("m.5", 1, 12, "one"))
            .unwrap();
        let second = loader
            .load(1, &MockTransport::text_message("m.6", 1, 12, "two"))
            .unwrap();

        // Same Arc allocation: the base was not rebuilt
        assert!(Arc::ptr_eq(&first.base, &second.base));
        assert!(second.rendered.ends_with("[12]: two"));
    }

    #[test]
    fn test_invalidate_forces_rebuild() {
        let loader = ContextLoader::new(seeded_store());
        let first = loader
            .load(1, &MockTransport::text_message("m.5", 1, 12, "one"))
            .unwrap();
        loader.invalidate(1);
        let second = loader
            .load(1, &MockTransport::text_message("m.6", 1, 12, "two"))
            .unwrap();
        assert!(!Arc::ptr_eq(&first.base, &second.base));
    }

    #[test]
    fn test_cache_cap_evicts_oldest() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        for thread in 0..20i64 {
            store.ensure_thread(thread, None, false).unwrap();
            store
                .save_message(&format!("m.{thread}"), thread, 1, Some("x"), false, 1)
                .unwrap();
        }
        let loader = ContextLoader::new(store);
        for thread in 0..20i64 {
            loader
                .load(thread, &MockTransport::text_message("c.1", thread, 2, "y"))
                .unwrap();
        }
        assert_eq!(loader.cached_threads(), CACHE_CAP);
    }

    #[test]
    fn test_flush_all_empties_cache() {
        let loader = ContextLoader::new(seeded_store());
        loader
            .load(1, &MockTransport::text_message("m.5", 1, 12, "x"))
            .unwrap();
        assert_eq!(loader.cached_threads(), 1);
        loader.flush_all();
        assert_eq!(loader.cached_threads(), 0);
    }

    #[test]
    fn test_current_message_not_duplicated_when_persisted() {
        // The dispatcher persists before handling, so the current message may
        // already be in the store; the render must not double it.
        let store = seeded_store();
        store.save_message("m.5", 1, 12, Some("fine thanks"), false, 5000).unwrap();
        let loader = ContextLoader::new(store);
        let current = MockTransport::text_message("m.5", 1, 12, "fine thanks");
        let context = loader.load(1, &current).unwrap();
        assert_eq!(context.rendered.matches("fine thanks").count(), 1);
    }

    #[test]
    fn test_empty_history_renders_only_current() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let loader = ContextLoader::new(store);
        let context = loader
            .load(42, &MockTransport::text_message("m.1", 42, 7, "first!"))
            .unwrap();
        assert_eq!(context.rendered, "[7]: first!");
        assert_eq!(context.message_count, 1);
    }
}
