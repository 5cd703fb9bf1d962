// tests/integration.rs
// End-to-end flows through the adapter, dispatcher, and handler chain

use mesbot::adapter::{AdapterEvent, MessengerAdapter};
use mesbot::commands::CommandRegistry;
use mesbot::config::Config;
use mesbot::config::cookies::CookieJar;
use mesbot::dispatch::Dispatcher;
use mesbot::handlers::Handler;
use mesbot::handlers::command::CommandHandler;
use mesbot::handlers::ping::PingHandler;
use mesbot::metrics::Metrics;
use mesbot::store::Store;
use mesbot::transport::mock::MockTransport;
use mesbot::transport::TransportEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const SELF_ID: i64 = 1;

struct Harness {
    transport: Arc<MockTransport>,
    adapter: Arc<MessengerAdapter>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<Store>,
    metrics: Arc<Metrics>,
    shutdown: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        cookies: CookieJar::from_parts(&SELF_ID.to_string(), "xs", None, None).unwrap(),
        log_level: "warn".to_string(),
        enable_e2ee: true,
        auto_reconnect: true,
        max_concurrent_handlers: 10,
        handler_timeout_ms: 5_000,
        send_rate_per_sec: 50,
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

/// Wire transport → adapter → dispatcher the way the binary does, with the
/// ping and command handlers in the chain.
async fn start() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = Arc::new(Store::open_in_memory().unwrap());
    let metrics = Arc::new(Metrics::new());
    let transport = Arc::new(MockTransport::new(SELF_ID));
    let adapter = Arc::new(MessengerAdapter::new(
        transport.clone(),
        &config,
        metrics.clone(),
    ));

    let handlers: Vec<Box<dyn Handler>> = vec![
        Box::new(CommandHandler::new(store.clone(), CommandRegistry::builtin())),
        Box::new(PingHandler),
    ];
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        metrics.clone(),
        adapter.clone(),
        handlers,
        SELF_ID,
        config.max_concurrent_handlers,
        config.handler_timeout_ms,
        config.idempotency_cache_size,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel::<AdapterEvent>(64);
    tokio::spawn(adapter.clone().run(event_tx, shutdown_rx));
    tokio::spawn(dispatcher.clone().run(event_rx));

    // Bring the session up
    transport
        .push_event(TransportEvent::Ready { user_id: SELF_ID })
        .await;
    transport.push_event(TransportEvent::E2eeConnected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    Harness {
        transport,
        adapter,
        dispatcher,
        store,
        metrics,
        shutdown: shutdown_tx,
        _dir: dir,
    }
}

async fn inbound(harness: &Harness, id: &str, sender: i64, text: &str) {
    harness
        .transport
        .push_event(TransportEvent::Message(MockTransport::text_message(
            id, 123, sender, text,
        )))
        .await;
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn ping_round_trip_increments_sent() {
    let harness = start().await;

    inbound(&harness, "m.1", 2, "ping").await;
    settle().await;

    let sent = harness.transport.sent_texts();
    assert_eq!(sent, vec!["pong 🏓".to_string()]);
    assert_eq!(harness.metrics.counter("messages.sent"), 1);
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn duplicate_message_id_is_dropped() {
    let harness = start().await;

    inbound(&harness, "m.5", 2, "ping").await;
    inbound(&harness, "m.5", 2, "ping").await;
    settle().await;

    assert_eq!(harness.transport.sent_texts().len(), 1);
    assert_eq!(harness.metrics.counter("events.deduplicated"), 1);
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn block_command_full_flow() {
    let harness = start().await;

    // Non-admin: refused, nothing stored
    inbound(&harness, "m.1", 2, "!block 999").await;
    settle().await;
    assert_eq!(
        harness.transport.sent_texts(),
        vec!["🔒 This command requires admin permissions".to_string()]
    );
    assert!(!harness.store.is_blocked(999).unwrap());

    // Promote the sender, retry: applied
    harness.store.set_admin(2, true).unwrap();
    inbound(&harness, "m.2", 2, "!block 999").await;
    settle().await;
    assert_eq!(
        harness.transport.sent_texts().last().map(String::as_str),
        Some("✅ User 999 has been blocked")
    );
    assert!(harness.store.is_blocked(999).unwrap());

    // The blocked user is now invisible to handlers
    inbound(&harness, "m.3", 999, "ping").await;
    settle().await;
    assert_eq!(harness.transport.sent_texts().len(), 2);
    assert_eq!(harness.metrics.counter("events.blocked"), 1);
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn own_messages_never_answered() {
    let harness = start().await;

    inbound(&harness, "m.1", SELF_ID, "ping").await;
    settle().await;

    assert!(harness.transport.sent_texts().is_empty());
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn messages_queued_until_fully_ready_are_still_handled() {
    // Build the harness by hand so events can be staged before readiness
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = Arc::new(Store::open_in_memory().unwrap());
    let metrics = Arc::new(Metrics::new());
    let transport = Arc::new(MockTransport::new(SELF_ID));
    let adapter = Arc::new(MessengerAdapter::new(
        transport.clone(),
        &config,
        metrics.clone(),
    ));
    let handlers: Vec<Box<dyn Handler>> = vec![Box::new(PingHandler)];
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        metrics.clone(),
        adapter.clone(),
        handlers,
        SELF_ID,
        10,
        5_000,
        1000,
    ));

    // Messages land between Ready and E2eeConnected
    transport
        .push_event(TransportEvent::Ready { user_id: SELF_ID })
        .await;
    transport
        .push_event(TransportEvent::Message(MockTransport::text_message(
            "m.1", 123, 2, "ping",
        )))
        .await;
    transport
        .push_event(TransportEvent::Message(MockTransport::text_message(
            "m.2", 123, 2, "ping",
        )))
        .await;
    transport.push_event(TransportEvent::E2eeConnected).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel::<AdapterEvent>(64);
    tokio::spawn(adapter.clone().run(event_tx, shutdown_rx));
    tokio::spawn(dispatcher.clone().run(event_rx));

    tokio::time::sleep(Duration::from_millis(300)).await;
    // Both queued messages were flushed after FullyReady and answered
    assert_eq!(transport.sent_texts().len(), 2);
    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn shutdown_stops_new_handler_launches() {
    let harness = start().await;

    harness.dispatcher.shutdown().await;
    inbound(&harness, "m.9", 2, "ping").await;
    settle().await;

    assert!(harness.transport.sent_texts().is_empty());
    assert_eq!(harness.dispatcher.active_handlers(), 0);
    let _ = harness.shutdown.send(true);
    // Adapter teardown stays idempotent after the loop has exited
    harness.adapter.disconnect().await.unwrap();
    harness.adapter.disconnect().await.unwrap();
}
