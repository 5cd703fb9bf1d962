// src/web/state.rs
// Shared state for control-plane handlers

use crate::config::Config;
use crate::metrics::Metrics;
use crate::store::Store;
use std::sync::Arc;

/// Everything the HTTP layer needs. Cheap to clone; axum clones per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<Store>, metrics: Arc<Metrics>, config: Arc<Config>) -> Self {
        Self {
            store,
            metrics,
            config,
        }
    }
}
