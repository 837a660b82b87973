use super::schema::Database;
use super::types::{Item, ItemDbRow, StorageError};

impl Database {
    // ========================================================================
    // Item Queries
    // ========================================================================

    /// All items of a feed in insertion order (oldest row first).
    pub async fn load_items(&self, feed_id: i64) -> Result<Vec<Item>, StorageError> {
        let rows = sqlx::query_as::<_, ItemDbRow>(
            r#"
            SELECT id, feed_id, title, description, url, published, read, fetched_at
            FROM items
            WHERE feed_id = ?
            ORDER BY id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemDbRow::into_item).collect())
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Option<Item>, StorageError> {
        let row = sqlx::query_as::<_, ItemDbRow>(
            r#"
            SELECT id, feed_id, title, description, url, published, read, fetched_at
            FROM items
            WHERE id = ?
        "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ItemDbRow::into_item))
    }

    // ========================================================================
    // Item Mutations
    // ========================================================================

    /// Set the read flag of one item, returning whether it changed.
    pub async fn set_item_read(&self, item_id: i64, read: bool) -> Result<bool, StorageError> {
        let _write = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE items SET read = ? WHERE id = ? AND read != ?")
            .bind(read)
            .bind(item_id)
            .bind(read)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark every item of a feed as read, returns count of items marked.
    ///
    /// Uses `WHERE read = 0` to make the operation idempotent.
    pub async fn mark_all_read(&self, feed_id: i64) -> Result<u64, StorageError> {
        let _write = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE items SET read = 1 WHERE feed_id = ? AND read = 0")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
