use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use shared::domain::{Category, Comment, CommentId, Tag, Thread, ThreadId, User, UserId, UserRef};

mod memory;
mod sqlite;

pub use memory::MemoryThreadStore;
pub use sqlite::Storage;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("thread {0} not found")]
    NotFound(ThreadId),
    #[error("thread {thread_id} changed concurrently: expected version {expected}, found {actual}")]
    Conflict {
        thread_id: ThreadId,
        expected: u64,
        actual: u64,
    },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A thread as submitted for creation; the store assigns id and version.
#[derive(Debug, Clone)]
pub struct NewThreadRecord {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub creator: UserRef,
    pub creation_date: DateTime<Utc>,
    pub tags: Vec<Tag>,
    pub is_qna: bool,
}

/// Partial update of a thread. `None` leaves a field untouched.
///
/// `answered_comment_id` is the only answer field; `is_answered` is derived from it on write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadPatch {
    pub expected_version: Option<u64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub tags: Option<Vec<Tag>>,
    pub is_qna: Option<bool>,
    pub answered_comment_id: Option<Option<CommentId>>,
    pub is_locked: Option<bool>,
}

impl ThreadPatch {
    pub fn expecting(version: u64) -> Self {
        Self {
            expected_version: Some(version),
            ..Self::default()
        }
    }

    pub fn answered(mut self, comment_id: Option<CommentId>) -> Self {
        self.answered_comment_id = Some(comment_id);
        self
    }

    pub fn locked(mut self, is_locked: bool) -> Self {
        self.is_locked = Some(is_locked);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.is_qna.is_none()
            && self.answered_comment_id.is_none()
            && self.is_locked.is_none()
    }

    /// Applies the patch to an in-memory copy, mirroring what the store persists.
    pub fn apply_to(&self, thread: &mut Thread) {
        if let Some(title) = &self.title {
            thread.title = title.clone();
        }
        if let Some(description) = &self.description {
            thread.description = description.clone();
        }
        if let Some(category) = self.category {
            thread.category = category;
        }
        if let Some(tags) = &self.tags {
            thread.tags = tags.clone();
        }
        if let Some(is_qna) = self.is_qna {
            thread.is_qna = is_qna;
        }
        if let Some(answered) = self.answered_comment_id {
            thread.answered_comment_id = answered;
            thread.is_answered = answered.is_some();
        }
        if let Some(is_locked) = self.is_locked {
            thread.is_locked = is_locked;
        }
    }
}

/// Document-store accessor for threads and their comments.
///
/// Every successful write bumps the thread's version and returns the new value. Writes carrying
/// an expected version fail with [`StoreError::Conflict`] when the stored version differs.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn fetch_thread(&self, thread_id: ThreadId) -> StoreResult<Option<Thread>>;
    /// Newest first.
    async fn fetch_all_threads(&self) -> StoreResult<Vec<Thread>>;
    async fn create_thread(&self, record: NewThreadRecord) -> StoreResult<ThreadId>;
    async fn update_thread(&self, thread_id: ThreadId, patch: ThreadPatch) -> StoreResult<u64>;
    async fn append_comment(
        &self,
        thread_id: ThreadId,
        comment: Comment,
        expected_version: Option<u64>,
    ) -> StoreResult<u64>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Inserts or refreshes username and email; the moderator flag is preserved.
    async fn register_user(&self, id: &UserId, username: &str, email: &str) -> StoreResult<User>;
    async fn fetch_user(&self, id: &UserId) -> StoreResult<Option<User>>;
    /// Returns `false` when the user does not exist.
    async fn set_moderator(&self, id: &UserId, is_moderator: bool) -> StoreResult<bool>;
}

pub(crate) fn check_version(
    thread_id: ThreadId,
    expected: Option<u64>,
    actual: u64,
) -> StoreResult<()> {
    match expected {
        Some(expected) if expected != actual => Err(StoreError::Conflict {
            thread_id,
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
