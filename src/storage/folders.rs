use super::schema::Database;
use super::types::{Folder, StorageError};
use crate::util::strip_control_chars;

impl Database {
    // ========================================================================
    // Folder Operations
    // ========================================================================

    /// Strip control characters and surrounding whitespace, rejecting empty names.
    fn sanitize_folder_name(name: &str) -> Result<String, StorageError> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            return Err(StorageError::Invalid(
                "folder name cannot be empty or whitespace-only".into(),
            ));
        }
        Ok(trimmed.to_owned())
    }

    /// Create a folder, returning its id. An existing name returns the existing id.
    pub async fn create_folder(&self, name: &str) -> Result<i64, StorageError> {
        let clean_name = Self::sanitize_folder_name(name)?;
        let _write = self.write_lock.lock().await;
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO folders (name) VALUES (?)
            ON CONFLICT(name) DO UPDATE SET name = excluded.name
            RETURNING id
        "#,
        )
        .bind(&clean_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn load_folders(&self) -> Result<Vec<Folder>, StorageError> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            r#"
            SELECT fo.id, fo.name, COUNT(f.id) as feed_count
            FROM folders fo
            LEFT JOIN feeds f ON f.folder_id = fo.id
            GROUP BY fo.id
            ORDER BY fo.name COLLATE NOCASE
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, feed_count)| Folder {
                id,
                name,
                feed_count,
            })
            .collect())
    }

    pub async fn find_folder_by_name(&self, name: &str) -> Result<Option<Folder>, StorageError> {
        let clean_name = Self::sanitize_folder_name(name)?;
        Ok(self
            .load_folders()
            .await?
            .into_iter()
            .find(|f| f.name == clean_name))
    }

    /// Move a feed into a folder, or out of any folder with `None`.
    pub async fn move_feed_to_folder(
        &self,
        feed_id: i64,
        folder_id: Option<i64>,
    ) -> Result<(), StorageError> {
        let _write = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE feeds SET folder_id = ? WHERE id = ?")
            .bind(folder_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::FeedNotFound(feed_id));
        }
        Ok(())
    }

    /// Delete a folder together with its feeds and their items.
    pub async fn delete_folder(&self, folder_id: i64) -> Result<bool, StorageError> {
        let _write = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(folder_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ids of the feeds filed under a folder.
    pub async fn feed_ids_in_folder(&self, folder_id: i64) -> Result<Vec<i64>, StorageError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE folder_id = ?")
            .bind(folder_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewFeed, StorageError};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn feed_in(folder_id: Option<i64>, n: i64) -> NewFeed {
        NewFeed {
            url: format!("https://feed{n}.example.com/rss"),
            title: format!("Feed {n}"),
            site_url: None,
            folder_id,
        }
    }

    #[tokio::test]
    async fn test_create_folder_is_idempotent_by_name() {
        let db = test_db().await;
        let a = db.create_folder("News").await.unwrap();
        let b = db.create_folder("  News ").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(db.load_folders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_folder_rejects_blank_name() {
        let db = test_db().await;
        let result = db.create_folder(" \x1b[0m ").await;
        assert!(matches!(result, Err(StorageError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_folder_feed_counts_and_moves() {
        let db = test_db().await;
        let folder = db.create_folder("Tech").await.unwrap();
        let f1 = db.insert_feed(&feed_in(Some(folder), 1)).await.unwrap();
        let f2 = db.insert_feed(&feed_in(None, 2)).await.unwrap();

        let folders = db.load_folders().await.unwrap();
        assert_eq!(folders[0].feed_count, 1);

        db.move_feed_to_folder(f2, Some(folder)).await.unwrap();
        let mut ids = db.feed_ids_in_folder(folder).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![f1, f2]);

        db.move_feed_to_folder(f1, None).await.unwrap();
        assert_eq!(db.feed_ids_in_folder(folder).await.unwrap(), vec![f2]);
    }

    #[tokio::test]
    async fn test_delete_folder_cascades_feeds() {
        let db = test_db().await;
        let folder = db.create_folder("Tech").await.unwrap();
        db.insert_feed(&feed_in(Some(folder), 1)).await.unwrap();
        db.insert_feed(&feed_in(None, 2)).await.unwrap();

        assert!(db.delete_folder(folder).await.unwrap());
        let feeds = db.load_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(&*feeds[0].title, "Feed 2");
        assert!(db.find_folder_by_name("Tech").await.unwrap().is_none());
    }
}
