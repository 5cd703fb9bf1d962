// src/web/mod.rs
// HTTP control plane: health, metrics, dashboard, admin REST

pub mod api;
pub mod dashboard;
pub mod state;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use state::AppState;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Request bodies above this are rejected with 413.
const BODY_LIMIT_BYTES: usize = 64 * 1024;

/// Build the control-plane router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route("/overview", get(api::overview))
        .route("/users", get(api::list_users))
        .route("/users/{id}", get(api::get_user))
        .route("/users/{id}/block", post(api::set_user_blocked))
        .route("/users/{id}/admin", post(api::set_user_admin))
        .route("/threads", get(api::list_threads))
        .route("/threads/{id}", get(api::get_thread))
        .route("/messages", get(api::list_messages))
        .route("/env", get(api::get_env).post(api::update_env))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics))
        .route("/dashboard", get(dashboard::dashboard))
        .nest("/api", api_router)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve on `port`. A port conflict is tolerated: the bot keeps
/// running without its control plane rather than dying at startup.
pub async fn serve(
    state: AppState,
    port: u16,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            warn!(
                port,
                "Control plane port already in use - continuing without HTTP server"
            );
            return None;
        }
        Err(e) => {
            warn!(port, "Control plane bind failed: {} - continuing without it", e);
            return None;
        }
    };

    info!(port, "Control plane listening");
    let router = create_router(state);
    Some(tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            loop {
                if shutdown.changed().await.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        });
        if let Err(e) = server.await {
            warn!("Control plane server error: {}", e);
        }
    }))
}
