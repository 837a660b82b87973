//! Bounded, time-limited cache of fetched bodies.
//!
//! A [`FetchCache`] is owned by whoever builds the refresher and passed down
//! explicitly. It sits in front of icon and favicon-page fetches so feeds
//! that share a site (or an icon CDN) do not download the same bytes once per
//! feed during a `refresh_all`.
//!
//! The cache is bounded twice: by entry count and by the total size of the
//! bodies it holds. Least recently used entries go first.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::net::{Network, NetworkError};

pub const DEFAULT_CAPACITY: usize = 64;
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_BYTES: usize = 8 * 1024 * 1024;

struct CacheEntry {
    body: Arc<[u8]>,
    stored_at: Instant,
}

struct Entries {
    lru: LruCache<String, CacheEntry>,
    /// Sum of the cached body lengths
    bytes: usize,
}

impl Entries {
    fn remove(&mut self, url: &str) {
        if let Some(entry) = self.lru.pop(url) {
            self.bytes -= entry.body.len();
        }
    }
}

pub struct FetchCache {
    entries: Mutex<Entries>,
    ttl: Duration,
    max_bytes: usize,
}

impl FetchCache {
    /// A capacity of zero is treated as one. Bodies are capped at
    /// [`DEFAULT_MAX_BYTES`] in total until [`Self::with_max_bytes`] says
    /// otherwise.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::new(capacity),
                bytes: 0,
            }),
            ttl,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    /// Cap the total size of cached bodies. A body larger than the cap on its
    /// own is never cached.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // A panic while holding the lock cannot leave an entry half-written
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached body for `url`, if present and younger than the TTL.
    /// Expired entries are evicted on lookup.
    pub fn get(&self, url: &str) -> Option<Arc<[u8]>> {
        let mut entries = self.lock();
        let expired = match entries.lru.get(url) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                return Some(Arc::clone(&entry.body));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(url);
        }
        None
    }

    pub fn insert(&self, url: &str, body: Arc<[u8]>) {
        let mut entries = self.lock();
        if body.len() > self.max_bytes {
            tracing::debug!(url = %url, bytes = body.len(), "Body exceeds fetch cache budget, not cached");
            entries.remove(url);
            return;
        }

        entries.bytes += body.len();
        // `push` hands back the replaced entry for `url` or the one evicted
        // by the entry limit
        let displaced = entries.lru.push(
            url.to_owned(),
            CacheEntry {
                body,
                stored_at: Instant::now(),
            },
        );
        if let Some((_, old)) = displaced {
            entries.bytes -= old.body.len();
        }

        while entries.bytes > self.max_bytes {
            match entries.lru.pop_lru() {
                Some((_, old)) => entries.bytes -= old.body.len(),
                None => break,
            }
        }
    }

    /// Serve `url` from the cache, or fetch it through `network` and remember
    /// the body. Failures are not cached.
    pub async fn get_or_fetch(
        &self,
        network: &dyn Network,
        url: &Url,
    ) -> Result<Arc<[u8]>, NetworkError> {
        if let Some(body) = self.get(url.as_str()) {
            tracing::debug!(url = %url, "Fetch cache hit");
            return Ok(body);
        }

        let body: Arc<[u8]> = network.get(url).await?.into();
        self.insert(url.as_str(), Arc::clone(&body));
        Ok(body)
    }

    pub fn len(&self) -> usize {
        self.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of the cached bodies.
    pub fn bytes(&self) -> usize {
        self.lock().bytes
    }
}

impl Default for FetchCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl std::fmt::Debug for FetchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCache")
            .field("len", &self.len())
            .field("bytes", &self.bytes())
            .field("ttl", &self.ttl)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}
