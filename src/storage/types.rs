use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::util::{first_image_src, html_to_text};

/// Title used for feeds that do not declare one.
pub const UNTITLED_FEED: &str = "Untitled feed";

/// Title used for items that do not declare one.
pub const UNNAMED_ARTICLE: &str = "Unnamed article";

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by the storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The feed was deleted (or never existed) when a write targeted it
    #[error("Feed {0} no longer exists")]
    FeedNotFound(i64),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Rejected input (empty folder name and the like)
    #[error("Invalid value: {0}")]
    Invalid(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ============================================================================
// Feed Status
// ============================================================================

/// Refresh status of a feed.
///
/// `Refreshing` is only ever observed while a refresh holds the feed's
/// in-flight slot; every exit path moves it back to `Idle` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    #[default]
    Idle,
    Refreshing,
    Error,
}

impl FeedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedStatus::Idle => "idle",
            FeedStatus::Refreshing => "refreshing",
            FeedStatus::Error => "error",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(FeedStatus::Idle),
            "refreshing" => Ok(FeedStatus::Refreshing),
            "error" => Ok(FeedStatus::Error),
            other => Err(StorageError::Invalid(format!("unknown feed status '{other}'"))),
        }
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for feed query with unread count
pub(crate) type FeedRow = (
    i64,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<Vec<u8>>,
    Option<i64>,
    String,
    Option<String>,
    i64, // unread_count
);

pub(crate) fn feed_from_row(row: FeedRow) -> Feed {
    let (id, url, title, site_url, folder_id, icon, last_refresh, status, error, unread_count) =
        row;
    Feed {
        id,
        url,
        title: Arc::from(title),
        site_url,
        folder_id,
        icon: icon.filter(|bytes| !bytes.is_empty()),
        last_refresh: last_refresh.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        // Unknown values can only come from a hand-edited database
        status: status.parse().unwrap_or(FeedStatus::Idle),
        error,
        unread_count,
    }
}

/// Internal row type for item queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: String,
    pub published: Option<i64>,
    pub read: bool,
    pub fetched_at: i64,
}

impl ItemDbRow {
    pub(crate) fn into_item(self) -> Item {
        Item {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            description: self.description,
            url: self.url,
            published: self.published.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            read: self.read,
            fetched_at: DateTime::from_timestamp(self.fetched_at, 0).unwrap_or_default(),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed.
///
/// Identity is the scheme-normalized source URL; `id` is the storage key.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: Arc<str>,
    pub site_url: Option<String>,
    pub folder_id: Option<i64>,
    /// Thumbnail bytes (PNG), `None` until the icon resolver finds one
    pub icon: Option<Vec<u8>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub status: FeedStatus,
    /// Message of the last failed refresh, cleared on success
    pub error: Option<String>,
    pub unread_count: i64,
}

impl Feed {
    pub fn has_icon(&self) -> bool {
        self.icon.as_ref().is_some_and(|bytes| !bytes.is_empty())
    }

    /// True when the feed was never refreshed or its last refresh is at least
    /// `min_interval` old.
    pub fn is_stale(&self, now: DateTime<Utc>, min_interval: chrono::Duration) -> bool {
        match self.last_refresh {
            Some(last) => now.signed_duration_since(last) >= min_interval,
            None => true,
        }
    }
}

/// A stored article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub title: Option<String>,
    /// Raw HTML description as published by the feed
    pub description: Option<String>,
    pub url: String,
    pub published: Option<DateTime<Utc>>,
    pub read: bool,
    pub fetched_at: DateTime<Utc>,
}

impl Item {
    pub fn normalized_title(&self) -> &str {
        normalized_title(self.title.as_deref())
    }

    /// Hero image for list rows: the first `<img>` of the description.
    pub fn wallpaper_url(&self) -> Option<String> {
        let description = self.description.as_deref()?;
        first_image_src(description, &self.url)
    }

    /// The description rendered as plain text, `None` if it is empty.
    pub fn plain_description(&self) -> Option<String> {
        let description = self.description.as_deref()?;
        let text = html_to_text(description);
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// An item staged for insertion; it has no storage id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: String,
    pub published: Option<DateTime<Utc>>,
}

impl NewItem {
    pub fn normalized_title(&self) -> &str {
        normalized_title(self.title.as_deref())
    }
}

/// Trimmed title, or the placeholder when it is missing or blank.
pub fn normalized_title(title: Option<&str>) -> &str {
    match title.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => UNNAMED_ARTICLE,
    }
}

/// Feed row to create on subscribe.
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub site_url: Option<String>,
    pub folder_id: Option<i64>,
}

/// A named group of feeds. Deleting a folder deletes its feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    pub feed_count: i64,
}

// ============================================================================
// Changeset
// ============================================================================

/// Mutations produced by one refresh, applied by [`Storage::commit`] in a
/// single transaction.
///
/// [`Storage::commit`]: super::Storage::commit
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub feed_id: i64,
    pub inserts: Vec<NewItem>,
    pub deletes: Vec<i64>,
    pub mark_read: Vec<i64>,
    /// Written only if the feed has no icon yet
    pub icon: Option<Vec<u8>>,
    /// Written only if the feed has no site URL yet
    pub site_url: Option<String>,
    /// Stamps `last_refresh`, sets status Idle and clears the error
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Changeset {
    pub fn new(feed_id: i64) -> Self {
        Self {
            feed_id,
            ..Self::default()
        }
    }

    pub fn insert(&mut self, items: impl IntoIterator<Item = NewItem>) -> &mut Self {
        self.inserts.extend(items);
        self
    }

    pub fn delete(&mut self, item_ids: impl IntoIterator<Item = i64>) -> &mut Self {
        self.deletes.extend(item_ids);
        self
    }

    pub fn mark_read(&mut self, item_ids: impl IntoIterator<Item = i64>) -> &mut Self {
        self.mark_read.extend(item_ids);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.deletes.is_empty()
            && self.mark_read.is_empty()
            && self.icon.is_none()
            && self.site_url.is_none()
            && self.refreshed_at.is_none()
    }
}

/// Row counts actually written by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub inserted: usize,
    pub deleted: usize,
    pub marked_read: usize,
    pub icon_written: bool,
}
