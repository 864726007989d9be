use async_trait::async_trait;

use crate::models::*;
use crate::pagination::{Page, PageRequest};

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("referenced row does not exist")] MissingParent,
    #[error("invalid value: {0}")] Invalid(&'static str),
    #[error("internal error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn create_category(&self, new: NewCategory) -> RepoResult<Category>;
    async fn get_category(&self, id: Id) -> RepoResult<Category>;
    async fn get_category_by_slug(&self, slug: &str) -> RepoResult<Category>;
    async fn list_categories(&self) -> RepoResult<Vec<Category>>;
}

#[async_trait]
pub trait ThreadRepo: Send + Sync {
    async fn create_thread(&self, new: NewThread) -> RepoResult<Thread>;
    async fn get_thread(&self, id: Id) -> RepoResult<Thread>;
    /// Newest first: `created_at DESC, id DESC`.
    async fn list_threads(&self, category_id: Id, page: PageRequest) -> RepoResult<Page<Thread>>;
    /// Front page across every category, most recently active first:
    /// `last_activity_at DESC, id DESC`.
    async fn list_all_threads(&self, page: PageRequest) -> RepoResult<Page<Thread>>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Appends a comment, assigning the thread's next sequence number and
    /// bumping its counter in the same transaction.
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    /// Oldest first: `sequence_no ASC`.
    async fn list_comments(&self, thread_id: Id, page: PageRequest) -> RepoResult<Page<Comment>>;
    async fn recent_comments(&self, limit: u32) -> RepoResult<Vec<RecentComment>>;
}

/// Everything the forum needs from storage.
pub trait ContentStore: CategoryRepo + ThreadRepo + CommentRepo {}

impl<T> ContentStore for T where T: CategoryRepo + ThreadRepo + CommentRepo {}

/// Categories created on first boot when none exist.
pub const DEFAULT_CATEGORIES: [(&str, &str); 4] = [
    ("technology", "Technology"),
    ("learning", "Learning"),
    ("politics", "Politics"),
    ("secret", "Secret"),
];

pub mod sqlite {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use sqlx::sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
    };
    use tokio::sync::Mutex;
    use tracing::{error, info};

    use crate::pagination::paginate;

    const SCHEMA: [&str; 5] = [
        r#"CREATE TABLE IF NOT EXISTS categories (
            id    INTEGER PRIMARY KEY AUTOINCREMENT,
            slug  TEXT NOT NULL UNIQUE,
            name  TEXT NOT NULL UNIQUE CHECK (length(trim(name)) > 0)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS threads (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            category_id      INTEGER NOT NULL REFERENCES categories(id) ON DELETE RESTRICT,
            title            TEXT NOT NULL,
            author           TEXT NOT NULL DEFAULT 'anon',
            body_html        TEXT NOT NULL,
            created_at       INTEGER NOT NULL,
            last_activity_at INTEGER NOT NULL,
            comment_count    INTEGER NOT NULL DEFAULT 0
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_threads_category_order ON threads(category_id, created_at DESC, id DESC)",
        "CREATE INDEX IF NOT EXISTS idx_threads_activity ON threads(last_activity_at DESC, id DESC)",
        r#"CREATE TABLE IF NOT EXISTS comments (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id   INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            author      TEXT NOT NULL DEFAULT 'anon',
            body_html   TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            sequence_no INTEGER NOT NULL,
            UNIQUE (thread_id, sequence_no)
        )"#,
    ];

    const THREAD_COLUMNS: &str = "id, category_id, title, author, body_html, created_at, last_activity_at, comment_count";
    const COMMENT_COLUMNS: &str = "id, thread_id, author, body_html, created_at, sequence_no";

    /// Single-file store. Reads go straight to the pool; writes are
    /// serialized through `write_lock` so only one write transaction is
    /// open at a time.
    #[derive(Clone)]
    pub struct SqliteStore {
        pool: SqlitePool,
        write_lock: Arc<Mutex<()>>,
    }

    impl SqliteStore {
        /// Opens (creating if needed) the database file and its schema.
        pub async fn open(path: &Path) -> RepoResult<Self> {
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .foreign_keys(true)
                .busy_timeout(Duration::from_secs(5));
            let pool = SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(options)
                .await
                .map_err(map_db_err)?;
            info!(path = %path.display(), "opened sqlite store");
            Self::from_pool(pool).await
        }

        pub async fn from_pool(pool: SqlitePool) -> RepoResult<Self> {
            let store = Self { pool, write_lock: Arc::new(Mutex::new(())) };
            store.init_schema().await?;
            Ok(store)
        }

        async fn init_schema(&self) -> RepoResult<()> {
            let _guard = self.write_lock.lock().await;
            for statement in SCHEMA {
                sqlx::query(statement).execute(&self.pool).await.map_err(map_db_err)?;
            }
            Ok(())
        }

        /// Inserts [`DEFAULT_CATEGORIES`] when the table is empty. Returns how
        /// many rows were added.
        pub async fn seed_default_categories(&self) -> RepoResult<usize> {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories")
                .fetch_one(&mut *tx).await.map_err(map_db_err)?;
            if existing > 0 {
                return Ok(0);
            }
            for (slug, name) in DEFAULT_CATEGORIES {
                sqlx::query("INSERT INTO categories (slug, name) VALUES (?, ?)")
                    .bind(slug).bind(name)
                    .execute(&mut *tx).await.map_err(map_db_err)?;
            }
            tx.commit().await.map_err(map_db_err)?;
            info!(count = DEFAULT_CATEGORIES.len(), "seeded default categories");
            Ok(DEFAULT_CATEGORIES.len())
        }

        pub fn pool(&self) -> &SqlitePool {
            &self.pool
        }
    }

    fn map_db_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db)
                if db.is_foreign_key_violation() || db.message().contains("FOREIGN KEY constraint failed") =>
            {
                RepoError::MissingParent
            }
            sqlx::Error::Database(db) if db.is_unique_violation() || db.message().contains("UNIQUE constraint failed") => {
                RepoError::Conflict
            }
            _ => {
                error!(error = %e, "sqlite operation failed");
                RepoError::Internal(e.to_string())
            }
        }
    }

    #[async_trait]
    impl CategoryRepo for SqliteStore {
        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            if new.slug.trim().is_empty() || new.name.trim().is_empty() {
                return Err(RepoError::Invalid("category slug and name must not be empty"));
            }
            let _guard = self.write_lock.lock().await;
            sqlx::query_as::<_, Category>("INSERT INTO categories (slug, name) VALUES (?, ?) RETURNING id, slug, name")
                .bind(new.slug.trim())
                .bind(new.name.trim())
                .fetch_one(&self.pool).await.map_err(map_db_err)
        }
        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("SELECT id, slug, name FROM categories WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(map_db_err)?
                .ok_or(RepoError::NotFound)
        }
        async fn get_category_by_slug(&self, slug: &str) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("SELECT id, slug, name FROM categories WHERE slug = ?")
                .bind(slug)
                .fetch_optional(&self.pool).await.map_err(map_db_err)?
                .ok_or(RepoError::NotFound)
        }
        async fn list_categories(&self) -> RepoResult<Vec<Category>> {
            sqlx::query_as::<_, Category>("SELECT id, slug, name FROM categories ORDER BY name ASC, id ASC")
                .fetch_all(&self.pool).await.map_err(map_db_err)
        }
    }

    #[async_trait]
    impl ThreadRepo for SqliteStore {
        async fn create_thread(&self, new: NewThread) -> RepoResult<Thread> {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            let thread = sqlx::query_as::<_, Thread>(&format!(
                "INSERT INTO threads (category_id, title, author, body_html, created_at, last_activity_at, comment_count) \
                 VALUES (?, ?, ?, ?, ?, ?, 0) RETURNING {THREAD_COLUMNS}"
            ))
                .bind(new.category_id)
                .bind(&new.title)
                .bind(&new.author)
                .bind(new.body_html.as_str())
                .bind(new.created_at)
                .bind(new.created_at)
                .fetch_one(&mut *tx).await.map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            Ok(thread)
        }
        async fn get_thread(&self, id: Id) -> RepoResult<Thread> {
            sqlx::query_as::<_, Thread>(&format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(map_db_err)?
                .ok_or(RepoError::NotFound)
        }
        async fn list_threads(&self, category_id: Id, page: PageRequest) -> RepoResult<Page<Thread>> {
            // count and rows come from one read transaction, i.e. one snapshot
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM categories WHERE id = ?")
                .bind(category_id)
                .fetch_optional(&mut *tx).await.map_err(map_db_err)?;
            if exists.is_none() {
                return Err(RepoError::NotFound);
            }
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads WHERE category_id = ?")
                .bind(category_id)
                .fetch_one(&mut *tx).await.map_err(map_db_err)?;
            let window = paginate(total.max(0) as u64, page.per_page, page.page);
            let items = sqlx::query_as::<_, Thread>(&format!(
                "SELECT {THREAD_COLUMNS} FROM threads WHERE category_id = ? \
                 ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
            ))
                .bind(category_id)
                .bind(i64::from(window.page_size))
                .bind(window.offset as i64)
                .fetch_all(&mut *tx).await.map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            Ok(Page { items, pagination: window })
        }
        async fn list_all_threads(&self, page: PageRequest) -> RepoResult<Page<Thread>> {
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads")
                .fetch_one(&mut *tx).await.map_err(map_db_err)?;
            let window = paginate(total.max(0) as u64, page.per_page, page.page);
            let items = sqlx::query_as::<_, Thread>(&format!(
                "SELECT {THREAD_COLUMNS} FROM threads ORDER BY last_activity_at DESC, id DESC LIMIT ? OFFSET ?"
            ))
                .bind(i64::from(window.page_size))
                .bind(window.offset as i64)
                .fetch_all(&mut *tx).await.map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            Ok(Page { items, pagination: window })
        }
    }

    #[async_trait]
    impl CommentRepo for SqliteStore {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            // Comments are never deleted one by one, so the counter after the
            // increment is the next gapless sequence number.
            let sequence_no: Option<i64> = sqlx::query_scalar(
                "UPDATE threads SET comment_count = comment_count + 1, \
                 last_activity_at = MAX(last_activity_at, ?) WHERE id = ? RETURNING comment_count",
            )
                .bind(new.created_at)
                .bind(new.thread_id)
                .fetch_optional(&mut *tx).await.map_err(map_db_err)?;
            let Some(sequence_no) = sequence_no else {
                return Err(RepoError::MissingParent);
            };
            let comment = sqlx::query_as::<_, Comment>(&format!(
                "INSERT INTO comments (thread_id, author, body_html, created_at, sequence_no) VALUES (?, ?, ?, ?, ?) \
                 RETURNING {COMMENT_COLUMNS}"
            ))
                .bind(new.thread_id)
                .bind(&new.author)
                .bind(new.body_html.as_str())
                .bind(new.created_at)
                .bind(sequence_no)
                .fetch_one(&mut *tx).await.map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            Ok(comment)
        }
        async fn list_comments(&self, thread_id: Id, page: PageRequest) -> RepoResult<Page<Comment>> {
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            let total: Option<i64> = sqlx::query_scalar("SELECT comment_count FROM threads WHERE id = ?")
                .bind(thread_id)
                .fetch_optional(&mut *tx).await.map_err(map_db_err)?;
            let Some(total) = total else {
                return Err(RepoError::NotFound);
            };
            let window = paginate(total.max(0) as u64, page.per_page, page.page);
            let items = sqlx::query_as::<_, Comment>(&format!(
                "SELECT {COMMENT_COLUMNS} FROM comments WHERE thread_id = ? \
                 ORDER BY sequence_no ASC LIMIT ? OFFSET ?"
            ))
                .bind(thread_id)
                .bind(i64::from(window.page_size))
                .bind(window.offset as i64)
                .fetch_all(&mut *tx).await.map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            Ok(Page { items, pagination: window })
        }
        async fn recent_comments(&self, limit: u32) -> RepoResult<Vec<RecentComment>> {
            sqlx::query_as::<_, RecentComment>(
                r#"SELECT c.id, c.thread_id, t.title AS thread_title, k.slug AS category_slug,
                          c.author, c.body_html, c.created_at
                   FROM comments c
                   JOIN threads t ON t.id = c.thread_id
                   JOIN categories k ON k.id = t.category_id
                   ORDER BY c.id DESC
                   LIMIT ?"#,
            )
                .bind(i64::from(limit))
                .fetch_all(&self.pool).await.map_err(map_db_err)
        }
    }
}
