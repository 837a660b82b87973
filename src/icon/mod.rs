//! Feed icon resolution.
//!
//! A feed's icon comes from the image the feed declares, or failing that from
//! its website's favicon. Whatever is found is cropped to a small square PNG.
//! A feed without an icon is a normal state: every failure here is logged at
//! debug level and the feed simply keeps no icon.

mod favicon;
mod thumbnail;

use std::sync::Arc;
use url::Url;

use crate::cache::FetchCache;
use crate::feed::FeedDocument;
use crate::net::Network;
use crate::storage::Feed;

pub use favicon::{FaviconFinder, HtmlFaviconFinder};
pub use thumbnail::{ImageThumbnailer, ThumbnailError, Thumbnailer};

pub const DEFAULT_ICON_SIZE: u32 = 64;

pub struct IconResolver {
    network: Arc<dyn Network>,
    cache: Arc<FetchCache>,
    finder: Arc<dyn FaviconFinder>,
    thumbnailer: Arc<dyn Thumbnailer>,
    size: u32,
}

impl IconResolver {
    /// Resolver with the HTML favicon finder and the `image` thumbnailer.
    pub fn new(network: Arc<dyn Network>, cache: Arc<FetchCache>) -> Self {
        let finder = Arc::new(HtmlFaviconFinder::new(
            Arc::clone(&network),
            Arc::clone(&cache),
        ));
        Self {
            network,
            cache,
            finder,
            thumbnailer: Arc::new(ImageThumbnailer),
            size: DEFAULT_ICON_SIZE,
        }
    }

    pub fn with_finder(mut self, finder: Arc<dyn FaviconFinder>) -> Self {
        self.finder = finder;
        self
    }

    pub fn with_thumbnailer(mut self, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        self.thumbnailer = thumbnailer;
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Thumbnail bytes for `feed`, or `None` when it already has an icon or
    /// none could be produced.
    pub async fn resolve(&self, feed: &Feed, document: &FeedDocument) -> Option<Vec<u8>> {
        if feed.has_icon() {
            tracing::debug!(feed_id = feed.id, "Feed already has an icon");
            return None;
        }

        if let Some(declared) = document.icon_url.as_deref().and_then(|u| Url::parse(u).ok()) {
            if let Some(icon) = self.thumbnail_from(feed.id, &declared).await {
                return Some(icon);
            }
        }

        let site = document
            .website_url
            .as_deref()
            .or(feed.site_url.as_deref())
            .and_then(|u| Url::parse(u).ok());
        let Some(site) = site else {
            tracing::debug!(feed_id = feed.id, "No icon source declared");
            return None;
        };

        for candidate in self.finder.find(&site).await {
            if let Some(icon) = self.thumbnail_from(feed.id, &candidate).await {
                return Some(icon);
            }
        }

        tracing::debug!(feed_id = feed.id, site = %site, "No usable favicon found");
        None
    }

    async fn thumbnail_from(&self, feed_id: i64, url: &Url) -> Option<Vec<u8>> {
        let bytes = match self.cache.get_or_fetch(&*self.network, url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(feed_id = feed_id, url = %url, error = %e, "Icon fetch failed");
                return None;
            }
        };

        // Decoding and resampling are CPU-bound
        let thumbnailer = Arc::clone(&self.thumbnailer);
        let size = self.size;
        let result =
            tokio::task::spawn_blocking(move || thumbnailer.thumbnail(&bytes, size)).await;

        match result {
            Ok(Ok(icon)) => {
                tracing::debug!(feed_id = feed_id, url = %url, "Icon resolved");
                Some(icon)
            }
            Ok(Err(e)) => {
                tracing::debug!(feed_id = feed_id, url = %url, error = %e, "Icon not decodable");
                None
            }
            Err(e) => {
                tracing::debug!(feed_id = feed_id, error = %e, "Thumbnail task failed");
                None
            }
        }
    }
}
