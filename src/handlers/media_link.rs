// src/handlers/media_link.rs
// Social media link detection and batched media re-posting

use super::Handler;
use crate::adapter::MessengerAdapter;
use crate::error::Result;
use crate::transport::{InboundMessage, MediaBlob};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Case-insensitive URL patterns for the supported platforms.
static MEDIA_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Facebook: posts, videos, watch links, mobile links
        r"(?i)https?://(www\.|m\.)?facebook\.com/\S+",
        r"(?i)https?://fb\.watch/\S+",
        // Instagram: posts, reels, tv, shares
        r"(?i)https?://(www\.)?instagram\.com/(p|reel|tv|reels|share)/\S+",
        r"(?i)https?://(www\.)?instagr\.am/(p|reel|tv|reels|share)/\S+",
        // TikTok: canonical and short-link hosts
        r"(?i)https?://(www\.)?tiktok\.com/\S+",
        r"(?i)https?://(vt|vm)\.tiktok\.com/\S+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid media pattern: {e}")))
    .collect()
});

/// Find the first supported media URL in a message text.
pub fn extract_media_url(text: &str) -> Option<&str> {
    MEDIA_PATTERNS
        .iter()
        .filter_map(|pattern| pattern.find(text))
        .min_by_key(|m| m.start())
        .map(|m| m.as_str())
}

/// External media resolver seam. Implementations call out to third-party
/// download services and return the raw blobs to re-post.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<MediaBlob>>;
}

/// Re-posts media from recognised links. All failures are silent by design
/// of the feature: a broken fetcher must not turn link sharing into error
/// spam.
pub struct MediaLinkHandler {
    fetcher: Arc<dyn MediaFetcher>,
}

impl MediaLinkHandler {
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Handler for MediaLinkHandler {
    fn name(&self) -> &'static str {
        "media-link"
    }

    fn matches(&self, message: &InboundMessage) -> bool {
        message
            .text
            .as_deref()
            .map(|t| extract_media_url(t).is_some())
            .unwrap_or(false)
    }

    async fn handle(&self, message: &InboundMessage, adapter: &MessengerAdapter) -> Result<()> {
        let Some(url) = message.text.as_deref().and_then(extract_media_url) else {
            return Ok(());
        };
        match self.fetcher.fetch(url).await {
            Ok(blobs) if !blobs.is_empty() => {
                debug!(url, count = blobs.len(), "Re-posting fetched media");
                // Direct path so a multi-item carousel lands as one post
                if let Err(e) = adapter.send_media_direct(message.thread_id, blobs).await {
                    debug!(url, "Media send failed (silent): {}", e);
                }
            }
            Ok(_) => debug!(url, "Fetcher returned no media"),
            Err(e) => debug!(url, "Media fetch failed (silent): {}", e),
        }
        Ok(())
    }
}
