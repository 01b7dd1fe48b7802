use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, Transaction,
};

use shared::{
    catalog,
    domain::{Category, Comment, CommentId, Tag, Thread, ThreadId, User, UserId, UserRef},
};

use crate::{
    check_version, NewThreadRecord, StoreError, StoreResult, ThreadPatch, ThreadStore,
    UserDirectory,
};

const THREAD_COLUMNS: &str = "id, title, description, category, creator_id, creator_username, created_at, is_qna, answered_comment_id, is_locked, version";

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn load_tags(&self, thread_id: Option<ThreadId>) -> Result<HashMap<String, Vec<Tag>>> {
        let rows = match thread_id {
            Some(id) => {
                sqlx::query(
                    "SELECT thread_id, tag_id FROM thread_tags WHERE thread_id = ? ORDER BY position",
                )
                .bind(id.to_string())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT thread_id, tag_id FROM thread_tags ORDER BY thread_id, position")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("failed to load thread tags")?;

        let mut tags: HashMap<String, Vec<Tag>> = HashMap::new();
        for row in rows {
            let thread_id: String = row.try_get(0)?;
            let tag_id: String = row.try_get(1)?;
            // Tags removed from the catalog are dropped on read.
            if let Some(tag) = catalog::tag_by_id(&tag_id) {
                tags.entry(thread_id).or_default().push(tag);
            }
        }
        Ok(tags)
    }

    async fn load_comments(
        &self,
        thread_id: Option<ThreadId>,
    ) -> Result<HashMap<String, Vec<Comment>>> {
        let rows = match thread_id {
            Some(id) => {
                sqlx::query(
                    "SELECT thread_id, id, content, creator_id, creator_username, created_at
                     FROM comments WHERE thread_id = ? ORDER BY seq",
                )
                .bind(id.to_string())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT thread_id, id, content, creator_id, creator_username, created_at
                     FROM comments ORDER BY seq",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("failed to load comments")?;

        let mut comments: HashMap<String, Vec<Comment>> = HashMap::new();
        for row in rows {
            let thread_id: String = row.try_get(0)?;
            let comment = Comment {
                id: parse_id::<CommentId>(&row.try_get::<String, _>(1)?)?,
                content: row.try_get(2)?,
                creator: UserRef {
                    id: UserId(row.try_get(3)?),
                    username: row.try_get(4)?,
                },
                creation_date: row.try_get::<DateTime<Utc>, _>(5)?,
            };
            comments.entry(thread_id).or_default().push(comment);
        }
        Ok(comments)
    }

    /// Bumps the thread's version as the transaction's first statement, which takes
    /// SQLite's write lock before anything is read. Returns the new version.
    async fn claim_version(
        tx: &mut Transaction<'_, Sqlite>,
        thread_id: ThreadId,
        expected: Option<u64>,
    ) -> StoreResult<u64> {
        let expected_column = expected.map(|version| version as i64);
        let bumped: Option<i64> = sqlx::query_scalar(
            "UPDATE threads SET version = version + 1
             WHERE id = ? AND (? IS NULL OR version = ?)
             RETURNING version",
        )
        .bind(thread_id.to_string())
        .bind(expected_column)
        .bind(expected_column)
        .fetch_optional(&mut **tx)
        .await
        .context("failed to bump thread version")?;
        if let Some(version) = bumped {
            return Ok(version as u64);
        }

        let actual = Self::current_version(tx, thread_id).await?;
        check_version(thread_id, expected, actual)?;
        Err(StoreError::Backend(anyhow!(
            "version bump of thread {thread_id} matched no row"
        )))
    }

    async fn current_version(
        tx: &mut Transaction<'_, Sqlite>,
        thread_id: ThreadId,
    ) -> StoreResult<u64> {
        let row = sqlx::query("SELECT version FROM threads WHERE id = ?")
            .bind(thread_id.to_string())
            .fetch_optional(&mut **tx)
            .await
            .context("failed to read thread version")?;
        let Some(row) = row else {
            return Err(StoreError::NotFound(thread_id));
        };
        let version: i64 = row.try_get(0).context("invalid version column")?;
        Ok(version as u64)
    }
}

#[async_trait]
impl ThreadStore for Storage {
    async fn fetch_thread(&self, thread_id: ThreadId) -> StoreResult<Option<Thread>> {
        let row = sqlx::query(&format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?"))
            .bind(thread_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch thread")?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut tags = self.load_tags(Some(thread_id)).await?;
        let mut comments = self.load_comments(Some(thread_id)).await?;
        let key = thread_id.to_string();
        let thread = thread_from_row(
            &row,
            tags.remove(&key).unwrap_or_default(),
            comments.remove(&key).unwrap_or_default(),
        )?;
        Ok(Some(thread))
    }

    async fn fetch_all_threads(&self) -> StoreResult<Vec<Thread>> {
        let rows = sqlx::query(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads ORDER BY created_at DESC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch threads")?;

        let mut tags = self.load_tags(None).await?;
        let mut comments = self.load_comments(None).await?;
        let mut threads = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get(0).context("invalid thread id column")?;
            threads.push(thread_from_row(
                &row,
                tags.remove(&key).unwrap_or_default(),
                comments.remove(&key).unwrap_or_default(),
            )?);
        }
        Ok(threads)
    }

    async fn create_thread(&self, record: NewThreadRecord) -> StoreResult<ThreadId> {
        let thread_id = ThreadId::new();
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO threads (id, title, description, category, creator_id, creator_username, created_at, is_qna, is_locked, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 1)",
        )
        .bind(thread_id.to_string())
        .bind(&record.title)
        .bind(&record.description)
        .bind(record.category.slug())
        .bind(record.creator.id.as_str())
        .bind(&record.creator.username)
        .bind(record.creation_date)
        .bind(record.is_qna)
        .execute(&mut *tx)
        .await
        .context("failed to insert thread")?;

        replace_tags(&mut tx, thread_id, &record.tags).await?;
        tx.commit().await.context("failed to commit thread")?;
        Ok(thread_id)
    }

    async fn update_thread(&self, thread_id: ThreadId, patch: ThreadPatch) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        let version = Self::claim_version(&mut tx, thread_id, patch.expected_version).await?;

        if let Some(Some(comment_id)) = patch.answered_comment_id {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM comments WHERE id = ? AND thread_id = ?")
                    .bind(comment_id.to_string())
                    .bind(thread_id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .context("failed to check answered comment")?;
            if exists.is_none() {
                return Err(StoreError::Backend(anyhow!(
                    "comment {comment_id} does not belong to thread {thread_id}"
                )));
            }
        }

        let answered = patch
            .answered_comment_id
            .map(|id| id.map(|id| id.to_string()));
        sqlx::query(
            "UPDATE threads SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                category = COALESCE(?, category),
                is_qna = COALESCE(?, is_qna),
                answered_comment_id = CASE WHEN ? THEN ? ELSE answered_comment_id END,
                is_locked = COALESCE(?, is_locked)
             WHERE id = ?",
        )
        .bind(patch.title.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.category.map(Category::slug))
        .bind(patch.is_qna)
        .bind(answered.is_some())
        .bind(answered.flatten())
        .bind(patch.is_locked)
        .bind(thread_id.to_string())
        .execute(&mut *tx)
        .await
        .context("failed to update thread")?;

        if let Some(tags) = &patch.tags {
            replace_tags(&mut tx, thread_id, tags).await?;
        }

        tx.commit().await.context("failed to commit thread update")?;
        Ok(version)
    }

    async fn append_comment(
        &self,
        thread_id: ThreadId,
        comment: Comment,
        expected_version: Option<u64>,
    ) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        let version = Self::claim_version(&mut tx, thread_id, expected_version).await?;

        sqlx::query(
            "INSERT INTO comments (id, thread_id, content, creator_id, creator_username, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(comment.id.to_string())
        .bind(thread_id.to_string())
        .bind(&comment.content)
        .bind(comment.creator.id.as_str())
        .bind(&comment.creator.username)
        .bind(comment.creation_date)
        .execute(&mut *tx)
        .await
        .context("failed to insert comment")?;

        tx.commit().await.context("failed to commit comment")?;
        Ok(version)
    }
}

#[async_trait]
impl UserDirectory for Storage {
    async fn register_user(&self, id: &UserId, username: &str, email: &str) -> StoreResult<User> {
        let row = sqlx::query(
            "INSERT INTO users (id, username, email) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username, email = excluded.email
             RETURNING id, username, email, is_moderator",
        )
        .bind(id.as_str())
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .context("failed to register user")?;
        Ok(user_from_row(&row)?)
    }

    async fn fetch_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, username, email, is_moderator FROM users WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch user")?;
        Ok(row.map(|r| user_from_row(&r)).transpose()?)
    }

    async fn set_moderator(&self, id: &UserId, is_moderator: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET is_moderator = ? WHERE id = ?")
            .bind(is_moderator)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .context("failed to update moderator flag")?;
        Ok(result.rows_affected() > 0)
    }
}

async fn replace_tags(
    tx: &mut Transaction<'_, Sqlite>,
    thread_id: ThreadId,
    tags: &[Tag],
) -> Result<()> {
    sqlx::query("DELETE FROM thread_tags WHERE thread_id = ?")
        .bind(thread_id.to_string())
        .execute(&mut **tx)
        .await
        .context("failed to clear thread tags")?;

    for (position, tag) in tags.iter().enumerate() {
        sqlx::query("INSERT INTO thread_tags (thread_id, tag_id, position) VALUES (?, ?, ?)")
            .bind(thread_id.to_string())
            .bind(&tag.id)
            .bind(position as i64)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("failed to tag thread {thread_id} with '{}'", tag.id))?;
    }
    Ok(())
}

fn thread_from_row(row: &SqliteRow, tags: Vec<Tag>, comments: Vec<Comment>) -> Result<Thread> {
    let category_raw: String = row.try_get(3)?;
    let category = Category::parse(&category_raw)
        .ok_or_else(|| anyhow!("unknown stored category '{category_raw}'"))?;
    let answered_comment_id = row
        .try_get::<Option<String>, _>(8)?
        .map(|raw| parse_id::<CommentId>(&raw))
        .transpose()?;
    let version: i64 = row.try_get(10)?;

    Ok(Thread {
        id: parse_id::<ThreadId>(&row.try_get::<String, _>(0)?)?,
        title: row.try_get(1)?,
        description: row.try_get(2)?,
        category,
        creator: UserRef {
            id: UserId(row.try_get(4)?),
            username: row.try_get(5)?,
        },
        creation_date: row.try_get::<DateTime<Utc>, _>(6)?,
        comments,
        tags,
        is_qna: row.try_get(7)?,
        is_answered: answered_comment_id.is_some(),
        answered_comment_id,
        is_locked: row.try_get(9)?,
        version: version as u64,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: UserId(row.try_get(0)?),
        username: row.try_get(1)?,
        email: row.try_get(2)?,
        is_moderator: row.try_get(3)?,
    })
}

fn parse_id<T: FromStr<Err = uuid::Error>>(raw: &str) -> Result<T> {
    raw.parse::<T>()
        .with_context(|| format!("invalid stored id '{raw}'"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
