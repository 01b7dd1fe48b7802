use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{Category, Tag, Thread},
    protocol::ThreadDraft,
    validation,
};
use storage::NewThreadRecord;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    access, error::ForumError, identity::IdentityProvider, tags::TagFilter, ForumContext,
    ForumEvent, EVENT_CHANNEL_CAPACITY,
};

struct BoardState {
    threads: Vec<Thread>,
    filter: TagFilter,
}

/// The thread index of one page visit: every fetched thread plus the tag selection that
/// narrows it down.
///
/// Threads are fetched once per board; changing the filter never refetches.
pub struct ThreadBoard {
    ctx: ForumContext,
    identity: Arc<dyn IdentityProvider>,
    state: RwLock<BoardState>,
    load_attempted: Mutex<bool>,
    cancel: CancellationToken,
    events: broadcast::Sender<ForumEvent>,
}

impl ThreadBoard {
    pub fn new(ctx: ForumContext, identity: Arc<dyn IdentityProvider>) -> Self {
        Self::with_cancellation(ctx, identity, CancellationToken::new())
    }

    /// Ties the board's fetches to the lifetime of an externally owned token.
    pub fn with_cancellation(
        ctx: ForumContext,
        identity: Arc<dyn IdentityProvider>,
        cancel: CancellationToken,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            ctx,
            identity,
            state: RwLock::new(BoardState {
                threads: Vec::new(),
                filter: TagFilter::new(),
            }),
            load_attempted: Mutex::new(false),
            cancel: cancel.child_token(),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ForumEvent> {
        self.events.subscribe()
    }

    /// Performs the initial fetch. Later calls return the current thread count without
    /// touching the store.
    pub async fn load(&self) -> Result<usize, ForumError> {
        let mut attempted = self.load_attempted.lock().await;
        if *attempted {
            return Ok(self.state.read().await.threads.len());
        }
        *attempted = true;
        self.fetch().await
    }

    /// Refetches on demand; on failure the last-known threads are kept.
    pub async fn refresh(&self) -> Result<usize, ForumError> {
        *self.load_attempted.lock().await = true;
        self.fetch().await
    }

    async fn fetch(&self) -> Result<usize, ForumError> {
        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ForumError::Cancelled),
            fetched = self.ctx.store.fetch_all_threads() => fetched,
        };

        match fetched {
            Ok(threads) => {
                let count = threads.len();
                self.state.write().await.threads = threads;
                info!(count, "threads loaded");
                let _ = self.events.send(ForumEvent::ThreadsLoaded { count });
                Ok(count)
            }
            Err(error) => {
                warn!(%error, "failed to fetch threads; keeping last known list");
                self.ctx.notifier.failure("Failed to load threads");
                Err(ForumError::from(error))
            }
        }
    }

    pub async fn threads(&self) -> Vec<Thread> {
        self.state.read().await.threads.clone()
    }

    pub async fn filtered_threads(&self) -> Vec<Thread> {
        let state = self.state.read().await;
        state.filter.apply(&state.threads)
    }

    /// Filtered threads further narrowed to one category.
    pub async fn filtered_threads_in(&self, category: Option<Category>) -> Vec<Thread> {
        let mut threads = self.filtered_threads().await;
        if let Some(category) = category {
            threads.retain(|t| t.category == category);
        }
        threads
    }

    pub async fn selected_tags(&self) -> Vec<Tag> {
        self.state.read().await.filter.selected().to_vec()
    }

    pub async fn selected_tag(&self) -> Option<Tag> {
        self.state.read().await.filter.selected_tag().cloned()
    }

    pub async fn toggle_tag(&self, tag: Tag) -> bool {
        let mut state = self.state.write().await;
        let selected = state.filter.toggle(tag);
        self.publish_filter(&state.filter);
        selected
    }

    pub async fn select_tag(&self, tag: Option<Tag>) {
        let mut state = self.state.write().await;
        state.filter.select_only(tag);
        self.publish_filter(&state.filter);
    }

    pub async fn clear_filter(&self) {
        let mut state = self.state.write().await;
        state.filter.clear();
        self.publish_filter(&state.filter);
    }

    fn publish_filter(&self, filter: &TagFilter) {
        let _ = self.events.send(ForumEvent::FilterChanged {
            selected: filter.selected().to_vec(),
        });
    }

    /// Validates and persists a new thread, then adds it to the top of the board.
    pub async fn create_thread(&self, draft: ThreadDraft) -> Result<Thread, ForumError> {
        match self.try_create_thread(draft).await {
            Ok(thread) => {
                self.ctx.notifier.success("Thread created");
                Ok(thread)
            }
            Err(error) => {
                warn!(%error, "thread creation rejected");
                self.ctx
                    .notifier
                    .failure(&format!("Failed to create thread: {error}"));
                Err(error)
            }
        }
    }

    async fn try_create_thread(&self, draft: ThreadDraft) -> Result<Thread, ForumError> {
        let user = access::require_user(self.identity.as_ref())?;
        let record = NewThreadRecord {
            title: validation::validate_title(&draft.title)?,
            description: validation::validate_description(&draft.description)?,
            category: draft.category,
            creator: user.to_ref(),
            creation_date: Utc::now(),
            tags: validation::resolve_tags(&draft.tag_ids)?,
            is_qna: draft.is_qna,
        };

        let thread_id = self.ctx.store.create_thread(record.clone()).await?;
        let thread = Thread {
            id: thread_id,
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

        self.state.write().await.threads.insert(0, thread.clone());
        info!(thread_id = %thread.id, creator = %user.id, "thread created");
        let _ = self.events.send(ForumEvent::ThreadCreated {
            thread_id: thread.id,
        });
        Ok(thread)
    }

    /// Cancels in-flight fetches; further fetches fail with [`ForumError::Cancelled`].
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ThreadBoard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod tests;
