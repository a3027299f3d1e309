use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use uuid::Uuid;

use crate::config::FeedConfig;
use crate::error::StoreError;

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub guid: Option<String>,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of a fetch batch.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct FetchTarget {
    pub id: Uuid,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub guid: Option<String>,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A post with the same `(feed, url)` already exists.
    Duplicate,
}

/// The storage operations the scheduler depends on.
///
/// Implementations must be safe to call concurrently from many feed units.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Feeds ordered by ascending `last_fetched_at`, never-fetched feeds first.
    async fn select_fetch_batch(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FetchTarget>, StoreError>;

    async fn mark_feed_fetched(
        &self,
        feed_id: Uuid,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome, StoreError>;
}

/// Fixed-width UTC rendering, so that text comparison in SQL is chronological.
fn db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let mut options = SqlitePoolOptions::new().max_connections(5);

        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        if database_url.contains(":memory:") {
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options.connect(database_url).await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id BLOB PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                user_id BLOB NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_fetched_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_feeds_last_fetched
            ON feeds(last_fetched_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id BLOB PRIMARY KEY,
                feed_id BLOB NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                description TEXT,
                guid TEXT,
                published_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(feed_id, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_posts_feed_published
            ON posts(feed_id, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register a feed, or rename it if the URL is already known.
    pub async fn register_feed(
        &self,
        name: &str,
        url: &str,
        user_id: Uuid,
    ) -> Result<Feed, StoreError> {
        let now = db_timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO feeds (id, name, url, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                name = excluded.name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn sync_feeds(&self, configs: &[FeedConfig]) -> Result<(), StoreError> {
        for config in configs {
            self.register_feed(&config.name, &config.url, config.owner_id())
                .await?;
        }
        Ok(())
    }

    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT * FROM feeds ORDER BY created_at, url")
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: Uuid) -> Result<Option<Feed>, StoreError> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn get_posts_for_feed(
        &self,
        feed_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Post>, StoreError> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT * FROM posts
            WHERE feed_id = ?
            ORDER BY published_at DESC, created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(feed_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    pub async fn get_post_count_for_feed(&self, feed_id: Uuid) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

#[async_trait]
impl FeedStore for Database {
    async fn select_fetch_batch(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FetchTarget>, StoreError> {
        let batch = sqlx::query_as::<_, FetchTarget>(
            r#"
            SELECT id, url FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, created_at ASC, url ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;
        Ok(batch)
    }

    async fn mark_feed_fetched(
        &self,
        feed_id: Uuid,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let ts = db_timestamp(fetched_at);
        // The guard keeps last_fetched_at monotonic if two marks race or the clock steps back.
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at = ?, updated_at = ?
            WHERE id = ? AND (last_fetched_at IS NULL OR last_fetched_at <= ?)
            "#,
        )
        .bind(&ts)
        .bind(&ts)
        .bind(feed_id)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO posts (
                id, feed_id, title, url, description, guid,
                published_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(feed_id, url) DO NOTHING
            "#,
        )
        .bind(post.id)
        .bind(post.feed_id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(&post.guid)
        .bind(db_timestamp(post.published_at))
        .bind(db_timestamp(post.created_at))
        .bind(db_timestamp(post.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }
}
