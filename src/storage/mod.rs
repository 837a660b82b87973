//! Persistence for feeds, items and folders.
//!
//! The refresh engine talks to storage only through the [`Storage`] trait.
//! [`Database`] is the SQLite implementation shipped with the crate; its
//! writes are serialized behind one lock and each refresh lands in a single
//! transaction via [`Storage::commit`].

mod feeds;
mod folders;
mod items;
mod schema;
mod types;

use async_trait::async_trait;

pub use schema::Database;
pub use types::{
    normalized_title, Changeset, CommitSummary, Feed, FeedStatus, Folder, Item, NewFeed, NewItem,
    StorageError, UNNAMED_ARTICLE, UNTITLED_FEED,
};

/// The storage collaborator used by the refresh engine.
///
/// Implementations must apply a [`Changeset`] atomically and must not rely on
/// uniqueness constraints for items; duplicate healing is the reconciler's job.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_feeds(&self) -> Result<Vec<Feed>, StorageError>;

    async fn load_feed(&self, feed_id: i64) -> Result<Option<Feed>, StorageError>;

    async fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>, StorageError>;

    async fn insert_feed(&self, feed: &NewFeed) -> Result<i64, StorageError>;

    async fn delete_feed(&self, feed_id: i64) -> Result<bool, StorageError>;

    async fn load_items(&self, feed_id: i64) -> Result<Vec<Item>, StorageError>;

    async fn set_status(
        &self,
        feed_id: i64,
        status: FeedStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError>;

    async fn commit(&self, changes: &Changeset) -> Result<CommitSummary, StorageError>;

    async fn mark_all_read(&self, feed_id: i64) -> Result<u64, StorageError>;

    async fn set_item_read(&self, item_id: i64, read: bool) -> Result<bool, StorageError>;
}

#[async_trait]
impl Storage for Database {
    async fn load_feeds(&self) -> Result<Vec<Feed>, StorageError> {
        Database::load_feeds(self).await
    }

    async fn load_feed(&self, feed_id: i64) -> Result<Option<Feed>, StorageError> {
        Database::load_feed(self, feed_id).await
    }

    async fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>, StorageError> {
        Database::find_feed_by_url(self, url).await
    }

    async fn insert_feed(&self, feed: &NewFeed) -> Result<i64, StorageError> {
        Database::insert_feed(self, feed).await
    }

    async fn delete_feed(&self, feed_id: i64) -> Result<bool, StorageError> {
        Database::delete_feed(self, feed_id).await
    }

    async fn load_items(&self, feed_id: i64) -> Result<Vec<Item>, StorageError> {
        Database::load_items(self, feed_id).await
    }

    async fn set_status(
        &self,
        feed_id: i64,
        status: FeedStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        Database::set_feed_status(self, feed_id, status, error).await
    }

    async fn commit(&self, changes: &Changeset) -> Result<CommitSummary, StorageError> {
        Database::commit_changes(self, changes).await
    }

    async fn mark_all_read(&self, feed_id: i64) -> Result<u64, StorageError> {
        Database::mark_all_read(self, feed_id).await
    }

    async fn set_item_read(&self, item_id: i64, read: bool) -> Result<bool, StorageError> {
        Database::set_item_read(self, item_id, read).await
    }
}
