// src/adapter/mod.rs
// Messenger adapter: wraps the transport, re-emits events, rate-limits sends

pub mod device;
pub mod limiter;
pub mod reconnect;

use crate::config::Config;
use crate::error::{BotError, Result};
use crate::metrics::Metrics;
use crate::transport::{
    ConnectInfo, MediaBlob, SendOptions, ThreadInfo, Transport, TransportEvent, UserInfo,
};
use limiter::RateLimiter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Events the adapter re-exposes to the dispatcher. `FullyReady` is the
/// adapter's own synthesis: both channels are up and queued inbound traffic
/// has been flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    FullyReady,
    Event(TransportEvent),
}

/// Per-connect readiness bookkeeping.
struct ConnectState {
    ready_seen: bool,
    e2ee_seen: bool,
    fully_ready: bool,
    queued: Vec<TransportEvent>,
}

impl ConnectState {
    fn new() -> Self {
        Self {
            ready_seen: false,
            e2ee_seen: false,
            fully_ready: false,
            queued: Vec::new(),
        }
    }
}

/// Transport wrapper. Owns the transport handle and the device-data file;
/// everything outbound flows through the token bucket except the `*_direct`
/// batch-media path.
pub struct MessengerAdapter {
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    metrics: Arc<Metrics>,
    enable_e2ee: bool,
    auto_reconnect: bool,
    e2ee_memory_only: bool,
    device_data_path: std::path::PathBuf,
    device_data_literal: Option<String>,
    disconnected: AtomicBool,
}

impl MessengerAdapter {
    pub fn new(transport: Arc<dyn Transport>, config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            transport,
            limiter: RateLimiter::new(config.send_rate_per_sec),
            metrics,
            enable_e2ee: config.enable_e2ee,
            auto_reconnect: config.auto_reconnect,
            e2ee_memory_only: config.e2ee_memory_only,
            device_data_path: config.device_data_path.clone(),
            device_data_literal: config.device_data.clone(),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Connect the underlying transport. Transient failures surface as
    /// `Unavailable`; anything else means the session is bad
    /// (`Unauthenticated`).
    pub async fn connect(&self) -> Result<ConnectInfo> {
        match self.transport.connect().await {
            Ok(info) => {
                info!(user_id = info.user_id, "Transport connected");
                Ok(info)
            }
            Err(e @ (BotError::Unavailable(_) | BotError::Unauthenticated(_))) => Err(e),
            Err(e) if e.is_transient() => Err(BotError::Unavailable(e.to_string())),
            Err(e) => Err(BotError::Unauthenticated(e.to_string())),
        }
    }

    /// Idempotent teardown; stops the event loop via the transport channel.
    pub async fn disconnect(&self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transport.disconnect().await
    }

    /// Device data to seed the session: a configured literal wins over the
    /// persisted file.
    pub fn initial_device_data(&self) -> Result<Option<String>> {
        if let Some(ref literal) = self.device_data_literal {
            return Ok(Some(literal.clone()));
        }
        device::load(&self.device_data_path)
    }

    // ── Event loop ────────────────────────────────────────────────────

    /// Pump transport events into `out`, maintaining the readiness queue and
    /// the reconnect policy. Runs until shutdown, a permanent transport
    /// error, or `disconnect()`.
    pub async fn run(
        self: Arc<Self>,
        out: mpsc::Sender<AdapterEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut events = self.transport.events().await;
        let mut state = ConnectState::new();

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => {
                            match self.handle_event(event, &mut state, &out).await {
                                LoopControl::Continue => {}
                                LoopControl::Stop => break,
                                LoopControl::Reconnect => {
                                    match self.reconnect(&out, &mut shutdown).await {
                                        Some(new_events) => {
                                            events = new_events;
                                            state = ConnectState::new();
                                        }
                                        None => break,
                                    }
                                }
                            }
                        }
                        None => {
                            if self.disconnected.load(Ordering::SeqCst) || !self.auto_reconnect {
                                debug!("Transport event channel closed, stopping adapter loop");
                                let _ = out
                                    .send(AdapterEvent::Event(TransportEvent::Disconnected {
                                        reason: None,
                                    }))
                                    .await;
                                break;
                            }
                            match self.reconnect(&out, &mut shutdown).await {
                                Some(new_events) => {
                                    events = new_events;
                                    state = ConnectState::new();
                                }
                                None => break,
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Adapter event loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_event(
        &self,
        event: TransportEvent,
        state: &mut ConnectState,
        out: &mpsc::Sender<AdapterEvent>,
    ) -> LoopControl {
        match &event {
            TransportEvent::Ready { .. } => {
                // At most one ready per connect
                if state.ready_seen {
                    return LoopControl::Continue;
                }
                state.ready_seen = true;
                let _ = out.send(AdapterEvent::Event(event)).await;
                self.maybe_fully_ready(state, out).await;
                LoopControl::Continue
            }
            TransportEvent::E2eeConnected => {
                state.e2ee_seen = true;
                let _ = out.send(AdapterEvent::Event(event)).await;
                self.maybe_fully_ready(state, out).await;
                LoopControl::Continue
            }
            TransportEvent::DeviceDataChanged { blob } => {
                if !self.e2ee_memory_only
                    && let Err(e) = device::save(&self.device_data_path, blob)
                {
                    warn!("Failed to persist device data: {}", e);
                }
                let _ = out.send(AdapterEvent::Event(event)).await;
                LoopControl::Continue
            }
            TransportEvent::Error { message, code } => {
                if *code == Some(1) {
                    error!(code = 1, "Permanent transport error: {}", message);
                    let _ = out.send(AdapterEvent::Event(event)).await;
                    return LoopControl::Stop;
                }
                if reconnect::is_transient(message) && self.auto_reconnect {
                    warn!("Transient transport error, reconnecting: {}", message);
                    return LoopControl::Reconnect;
                }
                let _ = out.send(AdapterEvent::Event(event)).await;
                LoopControl::Continue
            }
            TransportEvent::Disconnected { reason } => {
                if self.disconnected.load(Ordering::SeqCst) {
                    return LoopControl::Stop;
                }
                if self.auto_reconnect {
                    warn!(reason = ?reason, "Transport disconnected, reconnecting");
                    return LoopControl::Reconnect;
                }
                let _ = out.send(AdapterEvent::Event(event)).await;
                LoopControl::Stop
            }
            _ => {
                if !state.fully_ready && event.is_queueable() {
                    state.queued.push(event);
                } else {
                    let _ = out.send(AdapterEvent::Event(event)).await;
                }
                LoopControl::Continue
            }
        }
    }

    /// Emit `FullyReady` exactly once per connect, after `Ready` and (when
    /// E2EE is enabled) `E2eeConnected`, then flush queued inbound events in
    /// arrival order.
    async fn maybe_fully_ready(&self, state: &mut ConnectState, out: &mpsc::Sender<AdapterEvent>) {
        if state.fully_ready || !state.ready_seen {
            return;
        }
        if self.enable_e2ee && !state.e2ee_seen {
            return;
        }
        state.fully_ready = true;
        info!(queued = state.queued.len(), "Session fully ready");
        let _ = out.send(AdapterEvent::FullyReady).await;
        for queued in state.queued.drain(..) {
            let _ = out.send(AdapterEvent::Event(queued)).await;
        }
    }

    /// Exponential-backoff reconnect, capped at 60 s per attempt delay.
    /// Returns the new event receiver, or None when shutdown interrupted.
    async fn reconnect(
        &self,
        out: &mpsc::Sender<AdapterEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<mpsc::Receiver<TransportEvent>> {
        let mut attempt = 0u32;
        loop {
            if *shutdown.borrow() || self.disconnected.load(Ordering::SeqCst) {
                return None;
            }
            let delay = reconnect::backoff_delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return None;
                    }
                }
            }

            match self.transport.connect().await {
                Ok(info) => {
                    info!(user_id = info.user_id, attempt, "Reconnected");
                    self.metrics.increment("transport.reconnects");
                    let _ = out
                        .send(AdapterEvent::Event(TransportEvent::Reconnected))
                        .await;
                    return Some(self.transport.events().await);
                }
                Err(e) if e.is_transient() => {
                    warn!(attempt, "Reconnect attempt failed: {}", e);
                    attempt += 1;
                }
                Err(e) => {
                    error!("Reconnect failed permanently: {}", e);
                    let _ = out
                        .send(AdapterEvent::Event(TransportEvent::Error {
                            message: e.to_string(),
                            code: Some(1),
                        }))
                        .await;
                    return None;
                }
            }
        }
    }

    // ── Rate-limited sends ────────────────────────────────────────────

    pub async fn send_message(
        &self,
        thread_id: i64,
        text: &str,
        options: SendOptions,
    ) -> Result<()> {
        self.limiter.acquire().await;
        self.transport.send_message(thread_id, text, options).await?;
        self.metrics.increment("messages.sent");
        Ok(())
    }

    pub async fn send_e2ee_message(
        &self,
        chat_jid: &str,
        text: &str,
        options: SendOptions,
    ) -> Result<()> {
        self.limiter.acquire().await;
        self.transport.send_e2ee_message(chat_jid, text, options).await?;
        self.metrics.increment("messages.sent");
        Ok(())
    }

    pub async fn send_reaction(
        &self,
        thread_id: i64,
        message_id: &str,
        reaction: &str,
    ) -> Result<()> {
        self.limiter.acquire().await;
        self.transport.send_reaction(thread_id, message_id, reaction).await
    }

    pub async fn send_media(&self, thread_id: i64, blob: MediaBlob) -> Result<()> {
        self.limiter.acquire().await;
        self.transport.send_media(thread_id, blob).await?;
        self.metrics.increment("messages.sent");
        Ok(())
    }

    /// Batch-media path: bypasses the limiter so a multi-item carousel posts
    /// atomically from the platform's point of view.
    pub async fn send_media_direct(&self, thread_id: i64, blobs: Vec<MediaBlob>) -> Result<()> {
        for blob in blobs {
            self.transport.send_media(thread_id, blob).await?;
            self.metrics.increment("messages.sent");
        }
        Ok(())
    }

    pub async fn send_typing_indicator(&self, thread_id: i64, typing: bool) -> Result<()> {
        self.limiter.acquire().await;
        self.transport.send_typing_indicator(thread_id, typing).await
    }

    pub async fn mark_as_read(&self, thread_id: i64) -> Result<()> {
        self.limiter.acquire().await;
        self.transport.mark_as_read(thread_id).await
    }

    // ── Platform lookups and thread management ────────────────────────
    //
    // Everything that reaches the platform shares the same token bucket;
    // only the *_direct batch path above skips it.

    pub async fn get_user_info(&self, user_id: i64) -> Result<Option<UserInfo>> {
        self.limiter.acquire().await;
        self.transport.get_user_info(user_id).await
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserInfo>> {
        self.limiter.acquire().await;
        self.transport.search_users(query).await
    }

    pub async fn get_thread_info(&self, thread_id: i64) -> Result<Option<ThreadInfo>> {
        self.limiter.acquire().await;
        self.transport.get_thread_info(thread_id).await
    }

    pub async fn set_thread_name(&self, thread_id: i64, name: &str) -> Result<()> {
        self.limiter.acquire().await;
        self.transport.set_thread_name(thread_id, name).await
    }

    pub async fn leave_thread(&self, thread_id: i64) -> Result<()> {
        self.limiter.acquire().await;
        self.transport.leave_thread(thread_id).await
    }

    pub async fn get_cookies(&self) -> Result<String> {
        self.limiter.acquire().await;
        self.transport.get_cookies().await
    }

    pub async fn get_device_data(&self) -> Result<Option<String>> {
        self.limiter.acquire().await;
        self.transport.get_device_data().await
    }

    /// Pass-through registration; push delivery lives in the platform.
    pub async fn register_push_notifications(&self, endpoint: &str) -> Result<()> {
        self.limiter.acquire().await;
        self.transport.register_push_notifications(endpoint).await
    }
}

enum LoopControl {
    Continue,
    Stop,
    Reconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn test_config(dir: &std::path::Path) -> Config {
        let jar = crate::config::cookies::CookieJar::from_parts("1", "xs", None, None).unwrap();
        Config {
            cookies: jar,
            log_level: "info".to_string(),
            enable_e2ee: true,
            auto_reconnect: true,
            max_concurrent_handlers: 10,
            handler_timeout_ms: 30_000,
            send_rate_per_sec: 5,
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

    fn adapter_with(
        transport: Arc<MockTransport>,
        config: &Config,
    ) -> (Arc<MessengerAdapter>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let adapter = Arc::new(MessengerAdapter::new(transport, config, metrics.clone()));
        (adapter, metrics)
    }

    async fn drain_until_fully_ready(
        rx: &mut mpsc::Receiver<AdapterEvent>,
    ) -> Vec<AdapterEvent> {
        let mut seen = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv()).await
        {
            let is_marker = event == AdapterEvent::FullyReady;
            seen.push(event);
            if is_marker {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_fully_ready_after_ready_and_e2ee() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = Arc::new(MockTransport::new(1));
        transport
            .push_event(TransportEvent::Ready { user_id: 1 })
            .await;
        transport.push_event(TransportEvent::E2eeConnected).await;

        let (adapter, _) = adapter_with(transport, &config);
        let (tx, mut rx) = mpsc::channel(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(adapter.clone().run(tx, shutdown_rx));

        let seen = drain_until_fully_ready(&mut rx).await;
        assert!(matches!(
            seen[0],
            AdapterEvent::Event(TransportEvent::Ready { .. })
        ));
        assert!(seen.contains(&AdapterEvent::FullyReady));

        adapter.disconnect().await.unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_messages_before_fully_ready_are_queued_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = Arc::new(MockTransport::new(1));
        transport
            .push_event(TransportEvent::Ready { user_id: 1 })
            .await;
        // Messages arrive before the E2EE channel is up
        transport
            .push_event(TransportEvent::Message(MockTransport::text_message(
                "m.1", 5, 2, "first",
            )))
            .await;
        transport
            .push_event(TransportEvent::Message(MockTransport::text_message(
                "m.2", 5, 2, "second",
            )))
            .await;
        transport.push_event(TransportEvent::E2eeConnected).await;

        let (adapter, _) = adapter_with(transport, &config);
        let (tx, mut rx) = mpsc::channel(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(adapter.clone().run(tx, shutdown_rx));

        let mut seen = drain_until_fully_ready(&mut rx).await;
        // Queued messages flush immediately after FullyReady, original order
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        seen.push(first.clone());
        seen.push(second.clone());
        match (first, second) {
            (
                AdapterEvent::Event(TransportEvent::Message(a)),
                AdapterEvent::Event(TransportEvent::Message(b)),
            ) => {
                assert_eq!(a.id, "m.1");
                assert_eq!(b.id, "m.2");
            }
            other => panic!("expected flushed messages, got {other:?}"),
        }

        adapter.disconnect().await.unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_fully_ready_without_e2ee_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.enable_e2ee = false;
        let transport = Arc::new(MockTransport::new(1));
        transport
            .push_event(TransportEvent::Ready { user_id: 1 })
            .await;

        let (adapter, _) = adapter_with(transport, &config);
        let (tx, mut rx) = mpsc::channel(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(adapter.clone().run(tx, shutdown_rx));

        let seen = drain_until_fully_ready(&mut rx).await;
        assert!(seen.contains(&AdapterEvent::FullyReady));

        adapter.disconnect().await.unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_device_data_persisted_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = Arc::new(MockTransport::new(1));
        transport
            .push_event(TransportEvent::Ready { user_id: 1 })
            .await;
        transport.push_event(TransportEvent::E2eeConnected).await;
        transport
            .push_event(TransportEvent::DeviceDataChanged {
                blob: "{\"k\":1}".to_string(),
            })
            .await;

        let (adapter, _) = adapter_with(transport, &config);
        let (tx, mut rx) = mpsc::channel(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(adapter.clone().run(tx, shutdown_rx));

        drain_until_fully_ready(&mut rx).await;
        // Device event follows FullyReady
        let _ = rx.recv().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(
            device::load(&config.device_data_path).unwrap().as_deref(),
            Some("{\"k\":1}")
        );

        adapter.disconnect().await.unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_permanent_error_stops_loop() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = Arc::new(MockTransport::new(1));
        transport
            .push_event(TransportEvent::Error {
                message: "Authentication failed".to_string(),
                code: Some(1),
            })
            .await;

        let (adapter, _) = adapter_with(transport, &config);
        let (tx, mut rx) = mpsc::channel(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(adapter.clone().run(tx, shutdown_rx));

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            AdapterEvent::Event(TransportEvent::Error { code: Some(1), .. })
        ));
        // Loop must terminate on its own
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_transient_error_triggers_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = Arc::new(MockTransport::new(1));
        transport
            .push_event(TransportEvent::Ready { user_id: 1 })
            .await;
        transport.push_event(TransportEvent::E2eeConnected).await;
        transport
            .push_event(TransportEvent::Error {
                message: "read: connection reset by peer".to_string(),
                code: None,
            })
            .await;

        let (adapter, metrics) = adapter_with(transport.clone(), &config);
        let (tx, mut rx) = mpsc::channel(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(adapter.clone().run(tx, shutdown_rx));

        drain_until_fully_ready(&mut rx).await;
        // Backoff for attempt 0 is ~1s; the mock reconnects on first try
        let reconnected = tokio::time::timeout(std::time::Duration::from_secs(3), async {
            loop {
                match rx.recv().await {
                    Some(AdapterEvent::Event(TransportEvent::Reconnected)) => break true,
                    Some(_) => continue,
                    None => break false,
                }
            }
        })
        .await
        .unwrap_or(false);

        assert!(reconnected);
        assert_eq!(transport.connect_count(), 1); // initial connect is explicit in prod wiring
        assert_eq!(metrics.counter("transport.reconnects"), 1);

        adapter.disconnect().await.unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_sends_count_metric() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = Arc::new(MockTransport::new(1));
        let (adapter, metrics) = adapter_with(transport.clone(), &config);

        adapter
            .send_message(123, "pong 🏓", SendOptions::default())
            .await
            .unwrap();
        assert_eq!(metrics.counter("messages.sent"), 1);
        assert_eq!(
            transport.sent_texts(),
            vec!["pong 🏓".to_string()]
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = Arc::new(MockTransport::new(1));
        let (adapter, _) = adapter_with(transport, &config);
        adapter.disconnect().await.unwrap();
        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_device_literal_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        device::save(&config.device_data_path, "from-file").unwrap();
        config.device_data = Some("from-config".to_string());

        let transport = Arc::new(MockTransport::new(1));
        let (adapter, _) = adapter_with(transport, &config);
        assert_eq!(
            adapter.initial_device_data().unwrap().as_deref(),
            Some("from-config")
        );
    }
}
