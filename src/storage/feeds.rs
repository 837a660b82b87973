use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    feed_from_row, Changeset, CommitSummary, Feed, FeedRow, FeedStatus, NewFeed, StorageError,
};
use crate::util::strip_control_chars;

/// Shared projection for feed listings: every column plus the unread count.
const FEED_SELECT: &str = r#"
    SELECT
        f.id, f.url, f.title, f.site_url, f.folder_id, f.icon, f.last_refresh,
        f.status, f.error,
        COUNT(CASE WHEN i.read = 0 THEN 1 END) as unread_count
    FROM feeds f
    LEFT JOIN items i ON f.id = i.feed_id
"#;

/// Ids per statement; keeps us well under SQLite's 999 parameter limit.
const ID_BATCH_SIZE: usize = 500;

/// Items per INSERT (5 columns + feed_id + fetched_at = 7 binds each).
const INSERT_BATCH_SIZE: usize = 100;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed, returning its id.
    ///
    /// Subscribing to a URL that is already present leaves the existing row
    /// untouched and returns its id.
    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<i64, StorageError> {
        let title = strip_control_chars(feed.title.trim()).into_owned();
        let _write = self.write_lock.lock().await;

        // DO UPDATE (instead of DO NOTHING) so RETURNING yields the id on conflict too
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (url, title, site_url, folder_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET url = excluded.url
            RETURNING id
        "#,
        )
        .bind(&feed.url)
        .bind(&title)
        .bind(&feed.site_url)
        .bind(feed.folder_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Get all feeds with their unread item counts, ordered by title.
    pub async fn load_feeds(&self) -> Result<Vec<Feed>, StorageError> {
        let sql = format!("{FEED_SELECT} GROUP BY f.id ORDER BY f.title COLLATE NOCASE");
        let rows: Vec<FeedRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(feed_from_row).collect())
    }

    pub async fn load_feed(&self, feed_id: i64) -> Result<Option<Feed>, StorageError> {
        let sql = format!("{FEED_SELECT} WHERE f.id = ? GROUP BY f.id");
        let row: Option<FeedRow> = sqlx::query_as(&sql)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(feed_from_row))
    }

    pub async fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>, StorageError> {
        let sql = format!("{FEED_SELECT} WHERE f.url = ? GROUP BY f.id");
        let row: Option<FeedRow> = sqlx::query_as(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(feed_from_row))
    }

    /// Set the refresh status of a feed.
    ///
    /// `error` is stored alongside `Error` and cleared for the other states.
    pub async fn set_feed_status(
        &self,
        feed_id: i64,
        status: FeedStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        let error = match status {
            FeedStatus::Error => error,
            FeedStatus::Idle | FeedStatus::Refreshing => None,
        };
        let _write = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE feeds SET status = ?, error = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::FeedNotFound(feed_id));
        }
        Ok(())
    }

    pub async fn rename_feed(&self, feed_id: i64, title: &str) -> Result<(), StorageError> {
        let title = strip_control_chars(title.trim()).into_owned();
        if title.is_empty() {
            return Err(StorageError::Invalid("feed title cannot be empty".into()));
        }
        let _write = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE feeds SET title = ? WHERE id = ?")
            .bind(&title)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::FeedNotFound(feed_id));
        }
        Ok(())
    }

    /// Delete a feed and (by cascade) all of its items.
    ///
    /// Returns whether a feed was removed.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool, StorageError> {
        let _write = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Refresh Commit
    // ========================================================================

    /// Apply a refresh changeset atomically.
    ///
    /// Fails with [`StorageError::FeedNotFound`] if the feed was deleted while
    /// the refresh ran; nothing is written in that case.
    pub async fn commit_changes(&self, changes: &Changeset) -> Result<CommitSummary, StorageError> {
        let feed_id = changes.feed_id;
        let now = chrono::Utc::now().timestamp();
        let mut summary = CommitSummary::default();

        let _write = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StorageError::FeedNotFound(feed_id));
        }

        for chunk in changes.inserts.chunks(INSERT_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO items (feed_id, title, description, url, published, fetched_at) ",
            );
            builder.push_values(chunk, |mut b, item| {
                b.push_bind(feed_id)
                    .push_bind(item.title.as_deref().map(|t| strip_control_chars(t).into_owned()))
                    .push_bind(&item.description)
                    .push_bind(&item.url)
                    .push_bind(item.published.map(|p| p.timestamp()))
                    .push_bind(now);
            });
            let result = builder.build().execute(&mut *tx).await?;
            summary.inserted += result.rows_affected() as usize;
        }

        for chunk in changes.deletes.chunks(ID_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM items WHERE feed_id = ");
            builder.push_bind(feed_id);
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            let result = builder.build().execute(&mut *tx).await?;
            summary.deleted += result.rows_affected() as usize;
        }

        for chunk in changes.mark_read.chunks(ID_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("UPDATE items SET read = 1 WHERE read = 0 AND feed_id = ");
            builder.push_bind(feed_id);
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            let result = builder.build().execute(&mut *tx).await?;
            summary.marked_read += result.rows_affected() as usize;
        }

        if let Some(icon) = changes.icon.as_deref().filter(|bytes| !bytes.is_empty()) {
            let result = sqlx::query(
                "UPDATE feeds SET icon = ? WHERE id = ? AND (icon IS NULL OR length(icon) = 0)",
            )
            .bind(icon)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
            summary.icon_written = result.rows_affected() > 0;
        }

        if let Some(site_url) = &changes.site_url {
            sqlx::query("UPDATE feeds SET site_url = ? WHERE id = ? AND site_url IS NULL")
                .bind(site_url)
                .bind(feed_id)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(refreshed_at) = changes.refreshed_at {
            sqlx::query(
                "UPDATE feeds SET last_refresh = ?, status = 'idle', error = NULL WHERE id = ?",
            )
            .bind(refreshed_at.timestamp())
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(summary)
    }
}
