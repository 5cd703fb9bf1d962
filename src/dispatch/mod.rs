// src/dispatch/mod.rs
// Event dispatch: dedup, backpressure, handler selection, timeout, drain

pub mod dedup;

use crate::adapter::{AdapterEvent, MessengerAdapter};
use crate::handlers::Handler;
use crate::metrics::Metrics;
use crate::store::Store;
use crate::transport::{InboundMessage, TransportEvent};
use dedup::DedupCache;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long shutdown waits for in-flight handlers.
const DRAIN_WINDOW: Duration = Duration::from_secs(10);

/// Drain poll cadence.
const DRAIN_POLL: Duration = Duration::from_millis(200);

/// Dispatcher lifecycle. Only Running → Draining → Stopped performs the
/// handler drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatchState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl DispatchState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => DispatchState::Running,
            2 => DispatchState::Draining,
            3 => DispatchState::Stopped,
            _ => DispatchState::Idle,
        }
    }
}

/// Converts each inbound event into at most one handler invocation,
/// respecting dedup, the concurrency cap, and shutdown.
pub struct Dispatcher {
    store: Arc<Store>,
    metrics: Arc<Metrics>,
    adapter: Arc<MessengerAdapter>,
    handlers: Arc<Vec<Box<dyn Handler>>>,
    dedup: Mutex<DedupCache>,
    active: Arc<AtomicUsize>,
    max_concurrent: usize,
    handler_timeout: Duration,
    self_id: i64,
    state: AtomicU8,
    shutting_down: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        metrics: Arc<Metrics>,
        adapter: Arc<MessengerAdapter>,
        handlers: Vec<Box<dyn Handler>>,
        self_id: i64,
        max_concurrent: usize,
        handler_timeout_ms: u64,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            store,
            metrics,
            adapter,
            handlers: Arc::new(handlers),
            dedup: Mutex::new(DedupCache::new(dedup_capacity)),
            active: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
            handler_timeout: Duration::from_millis(handler_timeout_ms),
            self_id,
            state: AtomicU8::new(DispatchState::Idle as u8),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> DispatchState {
        DispatchState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn active_handlers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Consume adapter events until the channel closes or shutdown.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<AdapterEvent>) {
        self.state
            .store(DispatchState::Running as u8, Ordering::SeqCst);
        info!(handlers = self.handlers.len(), "Dispatcher running");

        while let Some(event) = events.recv().await {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            match event {
                AdapterEvent::FullyReady => {
                    info!("Adapter fully ready, inbound dispatch live");
                }
                AdapterEvent::Event(event) => self.dispatch(event).await,
            }
        }
        debug!("Dispatcher event loop ended");
    }

    /// The per-event algorithm. Store failures are logged and drop the
    /// event; they never tear down dispatch.
    pub async fn dispatch(&self, event: TransportEvent) {
        self.metrics.increment("events.received");

        // Message id when the event carries one, event id otherwise
        let dedup_key = event.dedup_key();
        let message = match event {
            TransportEvent::Message(m) | TransportEvent::E2eeMessage(m) => m,
            TransportEvent::Error { ref message, code } => {
                warn!(code = ?code, "Transport error event: {}", message);
                self.metrics.increment("errors.transport");
                return;
            }
            other => {
                debug!(event = ?other, "Ignoring non-message event");
                return;
            }
        };

        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        // Own messages are echoes of our sends
        if message.sender_id == self.self_id {
            return;
        }

        // Upsert sender and thread; a blocked sender is dropped before any
        // handler can see the message
        if let Err(e) = self
            .store
            .ensure_user(message.sender_id, message.sender_name.as_deref())
        {
            warn!("User upsert failed, dropping event: {}", e);
            return;
        }
        if let Err(e) = self.store.ensure_thread(
            message.thread_id,
            message.thread_name.as_deref(),
            message.is_group,
        ) {
            warn!("Thread upsert failed, dropping event: {}", e);
            return;
        }
        match self.store.is_blocked(message.sender_id) {
            Ok(true) => {
                self.metrics.increment("events.blocked");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Blocked lookup failed, dropping event: {}", e);
                return;
            }
        }

        // Idempotency: first sighting wins for the process lifetime (within
        // the ring window)
        let dedup_key = dedup_key.unwrap_or_else(|| message.id.clone());
        let duplicate = self
            .dedup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .check_and_insert(&dedup_key);
        if duplicate {
            self.metrics.increment("events.deduplicated");
            debug!(message_id = %dedup_key, "Duplicate event dropped");
            return;
        }

        // Backpressure: refuse rather than queue unboundedly
        if self.active.load(Ordering::SeqCst) >= self.max_concurrent {
            self.metrics.increment("events.dropped");
            warn!(
                active = self.active.load(Ordering::SeqCst),
                cap = self.max_concurrent,
                "Handler concurrency cap reached, dropping event"
            );
            return;
        }

        if let Err(e) = self.store.save_message(
            &message.id,
            message.thread_id,
            message.sender_id,
            message.text.as_deref(),
            message.is_e2ee,
            message.timestamp_ms,
        ) {
            warn!("Message persist failed (continuing): {}", e);
        }
        self.metrics.increment("messages.received");

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.set_gauge("handlers.active", active as u64);
        self.spawn_handler(message);
    }

    /// Select the first matching handler and run it under the timeout on its
    /// own task. The timeout frees the concurrency slot; it does not cancel
    /// the handler's work.
    fn spawn_handler(&self, message: InboundMessage) {
        let handlers = self.handlers.clone();
        let adapter = self.adapter.clone();
        let metrics = self.metrics.clone();
        let active = self.active.clone();
        let timeout = self.handler_timeout;

        tokio::spawn(async move {
            let selected = handlers.iter().position(|h| h.matches(&message));
            let Some(index) = selected else {
                let current = active.fetch_sub(1, Ordering::SeqCst) - 1;
                metrics.set_gauge("handlers.active", current as u64);
                return;
            };
            let name = handlers[index].name();
            debug!(handler = name, message_id = %message.id, "Handler selected");

            let handlers_for_task = handlers.clone();
            let message_for_task = message.clone();
            let adapter_for_task = adapter.clone();
            let work = tokio::spawn(async move {
                handlers_for_task[index]
                    .handle(&message_for_task, &adapter_for_task)
                    .await
            });

            match tokio::time::timeout(timeout, work).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    metrics.increment("errors.handler");
                    warn!(handler = name, "Handler failed: {}", e);
                }
                Ok(Err(join_err)) => {
                    metrics.increment("errors.handler");
                    warn!(handler = name, "Handler panicked: {}", join_err);
                }
                Err(_elapsed) => {
                    // The work keeps running; the slot is freed and the late
                    // outcome is observed so nothing leaks
                    metrics.increment("errors.handler");
                    warn!(
                        handler = name,
                        timeout_ms = timeout.as_millis() as u64,
                        "Handler timed out"
                    );
                }
            }

            let current = active.fetch_sub(1, Ordering::SeqCst) - 1;
            metrics.set_gauge("handlers.active", current as u64);
        });
    }

    /// Stop accepting events and wait up to 10 s for in-flight handlers,
    /// polling every 200 ms. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let was_running = self.state.swap(DispatchState::Draining as u8, Ordering::SeqCst)
            == DispatchState::Running as u8;

        if was_running {
            info!(
                active = self.active.load(Ordering::SeqCst),
                "Dispatcher draining"
            );
            let deadline = tokio::time::Instant::now() + DRAIN_WINDOW;
            while self.active.load(Ordering::SeqCst) > 0 {
                if tokio::time::Instant::now() >= deadline {
                    warn!(
                        remaining = self.active.load(Ordering::SeqCst),
                        "Drain window elapsed, force-closing"
                    );
                    break;
                }
                tokio::time::sleep(DRAIN_POLL).await;
            }
        }

        self.state
            .store(DispatchState::Stopped as u8, Ordering::SeqCst);
        info!("Dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::config::cookies::CookieJar;
    use crate::error::{BotError, Result};
    use crate::handlers::reply;
    use crate::transport::mock::MockTransport;
    use async_trait::async_trait;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            cookies: CookieJar::from_parts("1", "xs", None, None).unwrap(),
            log_level: "info".to_string(),
            enable_e2ee: true,
            auto_reconnect: true,
            max_concurrent_handlers: 10,
            handler_timeout_ms: 30_000,
            send_rate_per_sec: 100,
            idempotency_cache_size: 1000,
            metrics_port: 0,
            device_data_path: dir.join("device.json"),
            db_path: dir.join("bot.db"),
            gemini: Default::default(),
            auto_restart_minutes: None,
            transport: "loopback".to_string(),
            e2ee_memory_only: false,
            device_data: None,
            env_path: dir.join(".env"),
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn matches(&self, message: &InboundMessage) -> bool {
            message.text.is_some()
        }
        async fn handle(
            &self,
            message: &InboundMessage,
            adapter: &MessengerAdapter,
        ) -> Result<()> {
            let text = message.text.clone().unwrap_or_default();
            reply(adapter, message, &format!("echo: {text}")).await
        }
    }

    struct SlowHandler {
        delay: Duration,
    }

    #[async_trait]
    impl Handler for SlowHandler {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn matches(&self, _message: &InboundMessage) -> bool {
            true
        }
        async fn handle(
            &self,
            _message: &InboundMessage,
            _adapter: &MessengerAdapter,
        ) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl Handler for FailingHandler {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn matches(&self, _message: &InboundMessage) -> bool {
            true
        }
        async fn handle(
            &self,
            _message: &InboundMessage,
            _adapter: &MessengerAdapter,
        ) -> Result<()> {
            Err(BotError::Other("boom".to_string()))
        }
    }

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        transport: Arc<MockTransport>,
        metrics: Arc<Metrics>,
        store: Arc<Store>,
        _dir: tempfile::TempDir,
    }

    fn fixture(handlers: Vec<Box<dyn Handler>>) -> Fixture {
        fixture_with(handlers, 10, 30_000)
    }

    fn fixture_with(
        handlers: Vec<Box<dyn Handler>>,
        max_concurrent: usize,
        timeout_ms: u64,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Arc::new(Store::open_in_memory().unwrap());
        let metrics = Arc::new(Metrics::new());
        let transport = Arc::new(MockTransport::new(1));
        let adapter = Arc::new(MessengerAdapter::new(
            transport.clone(),
            &config,
            metrics.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            metrics.clone(),
            adapter,
            handlers,
            1,
            max_concurrent,
            timeout_ms,
            1000,
        ));
        Fixture {
            dispatcher,
            transport,
            metrics,
            store,
            _dir: dir,
        }
    }

    fn message_event(id: &str, sender: i64, text: &str) -> TransportEvent {
        TransportEvent::Message(MockTransport::text_message(id, 123, sender, text))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_duplicate_message_invokes_one_handler() {
        let f = fixture(vec![Box::new(EchoHandler)]);
        f.dispatcher.dispatch(message_event("m.5", 2, "hi")).await;
        f.dispatcher.dispatch(message_event("m.5", 2, "hi")).await;
        settle().await;

        assert_eq!(f.transport.sent_texts().len(), 1);
        assert_eq!(f.metrics.counter("events.deduplicated"), 1);
    }

    #[tokio::test]
    async fn test_own_messages_dropped_silently() {
        let f = fixture(vec![Box::new(EchoHandler)]);
        f.dispatcher.dispatch(message_event("m.1", 1, "self")).await;
        settle().await;

        assert!(f.transport.sent_texts().is_empty());
        assert_eq!(f.metrics.counter("events.deduplicated"), 0);
        assert_eq!(f.metrics.counter("events.blocked"), 0);
    }

    #[tokio::test]
    async fn test_blocked_sender_dropped_before_handlers() {
        let f = fixture(vec![Box::new(EchoHandler)]);
        f.store.set_blocked(999, true).unwrap();
        f.dispatcher.dispatch(message_event("m.1", 999, "hi")).await;
        settle().await;

        assert!(f.transport.sent_texts().is_empty());
        assert_eq!(f.metrics.counter("events.blocked"), 1);
        // Blocked messages are not persisted either
        assert!(f.store.get_messages(123, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_cap_drops_excess() {
        let f = fixture_with(
            vec![Box::new(SlowHandler {
                delay: Duration::from_secs(5),
            })],
            2,
            30_000,
        );
        f.dispatcher.dispatch(message_event("m.1", 2, "a")).await;
        f.dispatcher.dispatch(message_event("m.2", 2, "b")).await;
        f.dispatcher.dispatch(message_event("m.3", 2, "c")).await;
        settle().await;

        assert_eq!(f.dispatcher.active_handlers(), 2);
        assert_eq!(f.metrics.counter("events.dropped"), 1);
        assert_eq!(f.metrics.gauge("handlers.active"), 2);
    }

    #[tokio::test]
    async fn test_handler_timeout_frees_slot_and_counts() {
        let f = fixture_with(
            vec![Box::new(SlowHandler {
                delay: Duration::from_secs(60),
            })],
            10,
            100,
        );
        f.dispatcher.dispatch(message_event("m.1", 2, "slow")).await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(f.dispatcher.active_handlers(), 0);
        assert_eq!(f.metrics.counter("errors.handler"), 1);
    }

    #[tokio::test]
    async fn test_handler_error_counted_and_dispatch_continues() {
        let f = fixture(vec![Box::new(FailingHandler)]);
        f.dispatcher.dispatch(message_event("m.1", 2, "x")).await;
        settle().await;
        assert_eq!(f.metrics.counter("errors.handler"), 1);

        f.dispatcher.dispatch(message_event("m.2", 2, "y")).await;
        settle().await;
        assert_eq!(f.metrics.counter("errors.handler"), 2);
        assert_eq!(f.dispatcher.active_handlers(), 0);
    }

    #[tokio::test]
    async fn test_message_persisted_before_handling() {
        let f = fixture(vec![Box::new(EchoHandler)]);
        f.dispatcher.dispatch(message_event("m.1", 2, "save me")).await;
        settle().await;

        let messages = f.store.get_messages(123, 10).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text.as_deref(), Some("save me"));
        // Sender and thread were upserted
        assert!(f.store.get_user(2).unwrap().is_some());
        assert!(f.store.get_thread(123).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_handler_matched_slot_released() {
        struct NeverHandler;
        #[async_trait]
        impl Handler for NeverHandler {
            fn name(&self) -> &'static str {
                "never"
            }
            fn matches(&self, _message: &InboundMessage) -> bool {
                false
            }
            async fn handle(
                &self,
                _message: &InboundMessage,
                _adapter: &MessengerAdapter,
            ) -> Result<()> {
                Ok(())
            }
        }

        let f = fixture(vec![Box::new(NeverHandler)]);
        f.dispatcher.dispatch(message_event("m.1", 2, "hi")).await;
        settle().await;
        assert_eq!(f.dispatcher.active_handlers(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_blocks_new_events() {
        let f = fixture(vec![Box::new(SlowHandler {
            delay: Duration::from_millis(300),
        })]);
        assert_eq!(f.dispatcher.state(), DispatchState::Idle);

        // Move to Running through the run loop
        let (tx, rx) = mpsc::channel(8);
        let run = tokio::spawn(f.dispatcher.clone().run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.dispatcher.state(), DispatchState::Running);

        tx.send(AdapterEvent::Event(message_event("m.1", 2, "hi")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.dispatcher.active_handlers(), 1);

        f.dispatcher.shutdown().await;
        assert_eq!(f.dispatcher.state(), DispatchState::Stopped);
        assert_eq!(f.dispatcher.active_handlers(), 0);

        // No new handler starts after the shutting-down flag is set
        f.dispatcher.dispatch(message_event("m.2", 2, "late")).await;
        settle().await;
        assert_eq!(f.dispatcher.active_handlers(), 0);
        let messages = f.store.get_messages(123, 10).unwrap();
        assert_eq!(messages.len(), 1);

        drop(tx);
        let _ = run.await;
    }

    #[tokio::test]
    async fn test_first_matching_handler_wins() {
        struct Tagged(&'static str);
        #[async_trait]
        impl Handler for Tagged {
            fn name(&self) -> &'static str {
                self.0
            }
            fn matches(&self, _message: &InboundMessage) -> bool {
                true
            }
            async fn handle(
                &self,
                message: &InboundMessage,
                adapter: &MessengerAdapter,
            ) -> Result<()> {
                reply(adapter, message, self.0).await
            }
        }

        let f = fixture(vec![Box::new(Tagged("first")), Box::new(Tagged("second"))]);
        f.dispatcher.dispatch(message_event("m.1", 2, "hi")).await;
        settle().await;
        assert_eq!(f.transport.sent_texts(), vec!["first".to_string()]);
    }
}
