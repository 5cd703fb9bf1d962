// src/handlers/ping.rs
// Liveness check: "ping" gets "pong 🏓"

use super::{Handler, reply};
use crate::adapter::MessengerAdapter;
use crate::error::Result;
use crate::transport::InboundMessage;
use async_trait::async_trait;

pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn matches(&self, message: &InboundMessage) -> bool {
        message
            .text
            .as_deref()
            .map(|t| t.trim().eq_ignore_ascii_case("ping"))
            .unwrap_or(false)
    }

    async fn handle(&self, message: &InboundMessage, adapter: &MessengerAdapter) -> Result<()> {
        reply(adapter, message, "pong 🏓").await
    }
}
