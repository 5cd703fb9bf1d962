// src/bot.rs
// Process wiring: config → store → adapter → dispatcher → control plane

use crate::adapter::MessengerAdapter;
use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::handlers::ai_chat::AiChatHandler;
use crate::handlers::command::CommandHandler;
use crate::handlers::media_link::{MediaFetcher, MediaLinkHandler};
use crate::handlers::ping::PingHandler;
use crate::handlers::Handler;
use crate::llm::GeminiClient;
use crate::metrics::memory::MemoryWatcher;
use crate::metrics::Metrics;
use crate::pipeline::{AiPipeline, context::ContextLoader};
use crate::store::Store;
use crate::transport::MediaBlob;
use crate::web::state::AppState;
use crate::{transport, web};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Capacity of the adapter→dispatcher event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Placeholder for the external media downloader services. Resolves nothing,
/// which the media-link handler treats as "stay silent", matching the
/// handler's error policy.
struct DisabledFetcher;

#[async_trait]
impl MediaFetcher for DisabledFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<MediaBlob>> {
        Ok(Vec::new())
    }
}

/// Run the bot until a shutdown signal. Startup errors propagate (the
/// process exits 1); after startup only a permanent transport error ends the
/// event loop, and even then the control plane stays up for the operator.
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(Store::open(&config.db_path)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Transport + adapter
    let transport = Arc::from(transport::create(&config)?);
    let adapter = Arc::new(MessengerAdapter::new(
        Arc::clone(&transport),
        &config,
        metrics.clone(),
    ));
    if let Ok(Some(_)) = adapter.initial_device_data() {
        info!("Loaded persisted E2EE device data");
    }

    let connect_info = adapter.connect().await?;
    let self_id = connect_info.user_id;
    info!(user_id = self_id, "Connected as bot user");

    // AI pipeline
    let llm = GeminiClient::from_config(&config.gemini).map(Arc::new);
    let context_loader = Arc::new(ContextLoader::new(store.clone()));
    let pipeline = Arc::new(AiPipeline::new(
        store.clone(),
        llm,
        context_loader.clone(),
        metrics.clone(),
    ));

    // Handler chain, priority order
    let handlers: Vec<Box<dyn Handler>> = vec![
        Box::new(CommandHandler::new(store.clone(), CommandRegistry::builtin())),
        Box::new(MediaLinkHandler::new(Arc::new(DisabledFetcher))),
        Box::new(PingHandler),
        Box::new(AiChatHandler::new(pipeline.clone(), store.clone())),
    ];

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        metrics.clone(),
        adapter.clone(),
        handlers,
        self_id,
        config.max_concurrent_handlers,
        config.handler_timeout_ms,
        config.idempotency_cache_size,
    ));

    // Background tasks
    let memory_watcher = Arc::new(MemoryWatcher::new(metrics.clone()));
    {
        let loader = context_loader.clone();
        memory_watcher.on_pressure(move || loader.flush_all());
    }
    tokio::spawn(memory_watcher.clone().run(shutdown_rx.clone()));
    tokio::spawn(store.clone().maintenance_loop(shutdown_rx.clone()));

    // Control plane (port conflicts tolerated)
    let app_state = AppState::new(store.clone(), metrics.clone(), config.clone());
    let _server = web::serve(app_state, config.metrics_port, shutdown_rx.clone()).await;

    // Event flow: adapter → channel → dispatcher
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let adapter_loop = tokio::spawn(adapter.clone().run(event_tx, shutdown_rx.clone()));
    let dispatch_loop = tokio::spawn(dispatcher.clone().run(event_rx));

    wait_for_shutdown_signal(config.auto_restart_minutes).await;

    // Orderly teardown: stop intake, drain handlers, drop the transport
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    dispatcher.shutdown().await;
    if let Err(e) = adapter.disconnect().await {
        warn!("Transport disconnect failed: {}", e);
    }
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), adapter_loop).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), dispatch_loop).await;
    info!("Shutdown complete");
    Ok(())
}

/// Block until SIGINT, SIGTERM, or the auto-restart timer (when configured).
/// Signal handler registration failures are fatal: an unattended bot that
/// cannot be stopped cleanly is worse than one that fails fast.
async fn wait_for_shutdown_signal(auto_restart_minutes: Option<u64>) {
    let auto_restart = async {
        match auto_restart_minutes {
            Some(minutes) if minutes > 0 => {
                tokio::time::sleep(std::time::Duration::from_secs(minutes * 60)).await;
                info!(minutes, "Auto-restart timer elapsed, restarting via supervisor");
            }
            _ => std::future::pending::<()>().await,
        }
    };

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
            _ = auto_restart => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = auto_restart => {}
        }
    }
}

/// Install the last-resort panic hook: log and keep going. Task panics are
/// contained by their JoinHandles; this hook only makes them visible.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!("Panic: {}", info);
        default_hook(info);
    }));
}
