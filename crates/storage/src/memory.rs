use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::RwLock;

use shared::domain::{Comment, Thread, ThreadId, User, UserId};

use crate::{
    check_version, NewThreadRecord, StoreError, StoreResult, ThreadPatch, ThreadStore,
    UserDirectory,
};

/// Process-local store used by tests and single-node demos.
///
/// Reads and writes can be made to fail, and writes can be slowed down, to exercise the
/// failure and ordering paths of callers.
#[derive(Default)]
pub struct MemoryThreadStore {
    threads: RwLock<Vec<Thread>>,
    users: RwLock<HashMap<UserId, User>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicUsize,
    fetch_count: AtomicUsize,
    write_count: AtomicUsize,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_threads(threads: Vec<Thread>) -> Self {
        let store = Self::new();
        *store.threads.write().await = threads;
        store
    }

    /// Inserts a fully-formed thread, bypassing versioning.
    pub async fn insert_thread(&self, thread: Thread) {
        let mut threads = self.threads.write().await;
        threads.retain(|t| t.id != thread.id);
        threads.push(thread);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Number of `fetch_thread`/`fetch_all_threads` calls served or failed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> StoreResult<()> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow!("injected read failure")));
        }
        Ok(())
    }

    async fn before_write(&self) -> StoreResult<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow!("injected write failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn fetch_thread(&self, thread_id: ThreadId) -> StoreResult<Option<Thread>> {
        self.check_read()?;
        let threads = self.threads.read().await;
        Ok(threads.iter().find(|t| t.id == thread_id).cloned())
    }

    async fn fetch_all_threads(&self) -> StoreResult<Vec<Thread>> {
        self.check_read()?;
        let mut threads = self.threads.read().await.clone();
        threads.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
        Ok(threads)
    }

    async fn create_thread(&self, record: NewThreadRecord) -> StoreResult<ThreadId> {
        self.before_write().await?;
        let thread = Thread {
            id: ThreadId::new(),
            title: record.title,
            description: record.description,
            category: record.category,
            creator: record.creator,
            creation_date: record.creation_date,
            comments: Vec::new(),
            tags: record.tags,
            is_qna: record.is_qna,
            is_answered: false,
            answered_comment_id: None,
            is_locked: false,
            version: 1,
        };
        let id = thread.id;
        self.threads.write().await.push(thread);
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn update_thread(&self, thread_id: ThreadId, patch: ThreadPatch) -> StoreResult<u64> {
        self.before_write().await?;
        let mut threads = self.threads.write().await;
        let thread = threads
            .iter_mut()
            .find(|t| t.id == thread_id)
            .ok_or(StoreError::NotFound(thread_id))?;
        check_version(thread_id, patch.expected_version, thread.version)?;

        if let Some(Some(comment_id)) = patch.answered_comment_id {
            if thread.comment(comment_id).is_none() {
                return Err(StoreError::Backend(anyhow!(
                    "comment {comment_id} does not belong to thread {thread_id}"
                )));
            }
        }

        patch.apply_to(thread);
        thread.version += 1;
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(thread.version)
    }

    async fn append_comment(
        &self,
        thread_id: ThreadId,
        comment: Comment,
        expected_version: Option<u64>,
    ) -> StoreResult<u64> {
        self.before_write().await?;
        let mut threads = self.threads.write().await;
        let thread = threads
            .iter_mut()
            .find(|t| t.id == thread_id)
            .ok_or(StoreError::NotFound(thread_id))?;
        check_version(thread_id, expected_version, thread.version)?;

        thread.comments.push(comment);
        thread.version += 1;
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(thread.version)
    }
}

#[async_trait]
impl UserDirectory for MemoryThreadStore {
    async fn register_user(&self, id: &UserId, username: &str, email: &str) -> StoreResult<User> {
        self.before_write().await?;
        let mut users = self.users.write().await;
        let user = users.entry(id.clone()).or_insert_with(|| User {
            id: id.clone(),
            username: String::new(),
            email: String::new(),
            is_moderator: false,
        });
        user.username = username.to_string();
        user.email = email.to_string();
        Ok(user.clone())
    }

    async fn fetch_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        self.check_read()?;
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn set_moderator(&self, id: &UserId, is_moderator: bool) -> StoreResult<bool> {
        self.before_write().await?;
        let mut users = self.users.write().await;
        match users.get_mut(id) {
            Some(user) => {
                user.is_moderator = is_moderator;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
