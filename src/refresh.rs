//! Refresh orchestration.
//!
//! A refresh runs fetch → parse → adapt → reconcile → icon → commit for one
//! feed, strictly in that order, and drives the feed's status:
//!
//! ```text
//! Idle ──refresh──▶ Refreshing ──ok──▶ Idle
//!                        │
//!                        └──failure──▶ Error ──refresh──▶ Refreshing
//! ```
//!
//! At most one refresh runs per feed. Each feed id has a slot in an
//! in-flight registry; a refresh that cannot take the slot returns
//! [`RefreshOutcome::AlreadyRefreshing`] without touching the network, and
//! deleting a feed waits for the slot. Across feeds there is no ordering.

use chrono::Duration;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use url::Url;

use crate::cache::FetchCache;
use crate::clock::{Clock, SystemClock};
use crate::feed::{fetch, parse, FeedDocument, FetchError, ParseError};
use crate::icon::IconResolver;
use crate::net::Network;
use crate::reconcile::reconcile;
use crate::storage::{Changeset, Feed, FeedStatus, NewFeed, Storage, StorageError};
use crate::util::{normalize_feed_url, UrlError};

pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Errors that abort a refresh or a subscription.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Could not reach {url}: {reason}")]
    SourceUnreachable { url: String, reason: String },

    #[error("Feed could not be parsed: {0}")]
    Malformed(String),

    #[error("{0} feeds are not supported, try a different feed URL (RSS or Atom)")]
    UnsupportedFormat(&'static str),

    /// The feed was deleted before or during the refresh
    #[error("Feed {0} no longer exists")]
    FeedNotFound(i64),

    #[error(transparent)]
    InvalidUrl(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<FetchError> for RefreshError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::SourceUnreachable { url, reason } => {
                RefreshError::SourceUnreachable { url, reason }
            }
        }
    }
}

impl From<ParseError> for RefreshError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Malformed(reason) => RefreshError::Malformed(reason),
            ParseError::UnsupportedFormat(kind) => RefreshError::UnsupportedFormat(kind),
        }
    }
}

impl From<StorageError> for RefreshError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::FeedNotFound(id) => RefreshError::FeedNotFound(id),
            other => RefreshError::Storage(other),
        }
    }
}

/// Counts from one successful refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub feed_id: i64,
    pub inserted: usize,
    pub deleted: usize,
    pub marked_read: usize,
    /// Fetched articles dropped for lack of a link
    pub skipped_missing_url: usize,
    pub icon_updated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Refreshed recently enough; nothing was fetched
    Fresh,
    /// Another refresh of the same feed holds its slot
    AlreadyRefreshing,
    Refreshed(RefreshReport),
}

/// Result of one feed within [`Refresher::refresh_all`].
#[derive(Debug)]
pub struct RefreshResult {
    pub feed_id: i64,
    pub result: Result<RefreshOutcome, RefreshError>,
}

/// A newly added (or already present) subscription.
#[derive(Debug)]
pub struct Subscription {
    pub feed: Feed,
    /// False when the URL was already subscribed
    pub created: bool,
    /// Outcome of the first refresh, `None` for existing subscriptions
    pub first_refresh: Option<RefreshOutcome>,
}

/// Resets the status of a refresh that never reached its own cleanup (the
/// future was dropped mid-flight). Holds the feed's slot until the reset is
/// written so the next refresh cannot interleave with it.
struct StatusGuard {
    storage: Arc<dyn Storage>,
    feed_id: i64,
    slot: Option<OwnedMutexGuard<()>>,
    armed: bool,
}

impl StatusGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let storage = Arc::clone(&self.storage);
        let feed_id = self.feed_id;
        let slot = self.slot.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(feed_id = feed_id, "Refresh cancelled, resetting status");
                handle.spawn(async move {
                    let _slot = slot;
                    if let Err(e) = storage.set_status(feed_id, FeedStatus::Idle, None).await {
                        tracing::warn!(feed_id = feed_id, error = %e, "Failed to reset status of cancelled refresh");
                    }
                });
            }
            Err(_) => {
                // Database::open resets leftovers on the next start
                tracing::warn!(feed_id = feed_id, "Refresh cancelled outside a runtime, status not reset");
            }
        }
    }
}

pub struct Refresher {
    storage: Arc<dyn Storage>,
    network: Arc<dyn Network>,
    icons: IconResolver,
    clock: Arc<dyn Clock>,
    max_concurrent: usize,
    in_flight: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl Refresher {
    /// A refresher with the system clock, a default [`FetchCache`] and the
    /// default icon resolver.
    pub fn new(storage: Arc<dyn Storage>, network: Arc<dyn Network>) -> Self {
        let icons = IconResolver::new(Arc::clone(&network), Arc::new(FetchCache::default()));
        Self {
            storage,
            network,
            icons,
            clock: Arc::new(SystemClock),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_icon_resolver(mut self, icons: IconResolver) -> Self {
        self.icons = icons;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Zero is treated as one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn slot(&self, feed_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(in_flight.entry(feed_id).or_default())
    }

    fn try_claim(&self, feed_id: i64) -> Option<OwnedMutexGuard<()>> {
        match self.slot(feed_id).try_lock_owned() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::debug!(feed_id = feed_id, "Refresh already in flight");
                None
            }
        }
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refresh one feed unconditionally.
    pub async fn refresh(&self, feed_id: i64) -> Result<RefreshOutcome, RefreshError> {
        let Some(slot) = self.try_claim(feed_id) else {
            return Ok(RefreshOutcome::AlreadyRefreshing);
        };
        let feed = self.load(feed_id).await?;
        self.run_claimed(feed, None, slot).await
    }

    /// Refresh one feed unless its last refresh is younger than `min_interval`.
    ///
    /// A feed that was never refreshed is always stale.
    pub async fn refresh_if_stale(
        &self,
        feed_id: i64,
        min_interval: Duration,
    ) -> Result<RefreshOutcome, RefreshError> {
        let Some(slot) = self.try_claim(feed_id) else {
            return Ok(RefreshOutcome::AlreadyRefreshing);
        };
        // Checked under the slot so a refresh that just finished is seen
        let feed = self.load(feed_id).await?;
        if !feed.is_stale(self.clock.now(), min_interval) {
            tracing::debug!(feed_id = feed_id, "Feed is fresh, skipping refresh");
            return Ok(RefreshOutcome::Fresh);
        }
        self.run_claimed(feed, None, slot).await
    }

    /// Refresh every feed, at most `max_concurrent` at a time.
    ///
    /// With `min_interval` set, fresh feeds are skipped. Results come back in
    /// completion order.
    pub async fn refresh_all(
        &self,
        min_interval: Option<Duration>,
    ) -> Result<Vec<RefreshResult>, RefreshError> {
        let feeds = self.storage.load_feeds().await?;
        if feeds.is_empty() {
            return Ok(Vec::new());
        }

        let results: Vec<RefreshResult> = stream::iter(feeds)
            .map(|feed| async move {
                let result = match min_interval {
                    Some(interval) => self.refresh_if_stale(feed.id, interval).await,
                    None => self.refresh(feed.id).await,
                };
                RefreshResult {
                    feed_id: feed.id,
                    result,
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.result.is_err()).count();
        tracing::info!(
            feeds = results.len(),
            failed = failed,
            "Refresh of all feeds finished"
        );
        Ok(results)
    }

    async fn load(&self, feed_id: i64) -> Result<Feed, RefreshError> {
        self.storage
            .load_feed(feed_id)
            .await?
            .ok_or(RefreshError::FeedNotFound(feed_id))
    }

    /// Drive the status machine around [`Self::run`] while holding the slot.
    async fn run_claimed(
        &self,
        feed: Feed,
        prefetched: Option<Vec<u8>>,
        slot: OwnedMutexGuard<()>,
    ) -> Result<RefreshOutcome, RefreshError> {
        let guard = StatusGuard {
            storage: Arc::clone(&self.storage),
            feed_id: feed.id,
            slot: Some(slot),
            armed: true,
        };
        // Armed before the write lands: a cancel inside it must still reset
        if let Err(e) = self
            .storage
            .set_status(feed.id, FeedStatus::Refreshing, None)
            .await
        {
            guard.disarm();
            return Err(e.into());
        }

        let result = self.run(&feed, prefetched).await;

        match &result {
            Ok(report) => {
                tracing::info!(
                    feed_id = feed.id,
                    inserted = report.inserted,
                    deleted = report.deleted,
                    marked_read = report.marked_read,
                    skipped = report.skipped_missing_url,
                    icon = report.icon_updated,
                    "Feed refreshed"
                );
            }
            Err(RefreshError::FeedNotFound(_)) => {
                tracing::debug!(feed_id = feed.id, "Feed deleted during refresh, result discarded");
            }
            Err(e) => {
                tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Feed refresh failed");
                let message = e.to_string();
                if let Err(status_err) = self
                    .storage
                    .set_status(feed.id, FeedStatus::Error, Some(&message))
                    .await
                {
                    tracing::warn!(feed_id = feed.id, error = %status_err, "Failed to record refresh error");
                }
            }
        }
        guard.disarm();

        result.map(RefreshOutcome::Refreshed)
    }

    /// The pipeline proper. Nothing but the status is written before the
    /// final commit, which also stamps `last_refresh` and sets status Idle.
    async fn run(
        &self,
        feed: &Feed,
        prefetched: Option<Vec<u8>>,
    ) -> Result<RefreshReport, RefreshError> {
        let bytes = match prefetched {
            Some(bytes) => bytes,
            None => {
                let url = Url::parse(&feed.url).map_err(UrlError::from)?;
                fetch(&*self.network, &url).await?
            }
        };
        let document: FeedDocument = parse(&bytes)?.document(&feed.url);

        let existing = self.storage.load_items(feed.id).await?;
        let reconciliation = reconcile(&existing, &document.articles, feed.id);
        let skipped_missing_url = reconciliation.skipped_missing_url;

        let icon = self.icons.resolve(feed, &document).await;

        let mut changes = Changeset::new(feed.id);
        reconciliation.stage(&mut changes);
        changes.icon = icon;
        changes.site_url = document.website_url;
        changes.refreshed_at = Some(self.clock.now());

        let summary = self.storage.commit(&changes).await?;
        Ok(RefreshReport {
            feed_id: feed.id,
            inserted: summary.inserted,
            deleted: summary.deleted,
            marked_read: summary.marked_read,
            skipped_missing_url,
            icon_updated: summary.icon_written,
        })
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe to `url` and run the first refresh.
    ///
    /// The address is scheme-normalized, then fetched and parsed once; JSON
    /// and malformed documents are rejected before anything is stored. An
    /// already subscribed URL returns the existing feed untouched.
    pub async fn subscribe(
        &self,
        url: &str,
        title: Option<&str>,
        folder_id: Option<i64>,
    ) -> Result<Subscription, RefreshError> {
        let url = normalize_feed_url(url)?;

        if let Some(feed) = self.storage.find_feed_by_url(url.as_str()).await? {
            tracing::debug!(feed_id = feed.id, url = %url, "Already subscribed");
            return Ok(Subscription {
                feed,
                created: false,
                first_refresh: None,
            });
        }

        let bytes = fetch(&*self.network, &url).await?;
        let document = parse(&bytes)?.document(url.as_str());

        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .unwrap_or(document.title);
        let feed_id = self
            .storage
            .insert_feed(&NewFeed {
                url: url.to_string(),
                title,
                site_url: document.website_url,
                folder_id,
            })
            .await?;
        tracing::info!(feed_id = feed_id, url = %url, "Subscribed to feed");

        let feed = self.load(feed_id).await?;
        let first_refresh = match self.try_claim(feed_id) {
            Some(slot) => self.run_claimed(feed, Some(bytes), slot).await?,
            None => RefreshOutcome::AlreadyRefreshing,
        };

        Ok(Subscription {
            feed: self.load(feed_id).await?,
            created: true,
            first_refresh: Some(first_refresh),
        })
    }

    /// Delete a feed and its items, waiting for an in-flight refresh of it to
    /// finish first.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool, RefreshError> {
        let slot = self.slot(feed_id);
        let _held = slot.lock().await;
        let deleted = self.storage.delete_feed(feed_id).await?;

        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&feed_id);
        if deleted {
            tracing::info!(feed_id = feed_id, "Feed deleted");
        }
        Ok(deleted)
    }

    // ========================================================================
    // Read State
    // ========================================================================

    /// Mark every item of a feed read; committed immediately.
    pub async fn mark_all_read(&self, feed_id: i64) -> Result<u64, RefreshError> {
        Ok(self.storage.mark_all_read(feed_id).await?)
    }

    pub async fn set_item_read(&self, item_id: i64, read: bool) -> Result<bool, RefreshError> {
        Ok(self.storage.set_item_read(item_id, read).await?)
    }
}
