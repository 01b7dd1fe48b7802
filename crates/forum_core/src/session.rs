use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{Comment, CommentId, Thread, ThreadId},
    protocol::ThreadEdit,
    validation,
};
use storage::ThreadPatch;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    access, error::ForumError, identity::IdentityProvider, ForumContext, ForumEvent,
    EVENT_CHANNEL_CAPACITY,
};

/// Appends racing writers from other processes give up after this many tries.
const MAX_APPEND_ATTEMPTS: u32 = 3;

/// A write decided under the thread's gate, against the session's current copy.
enum PendingWrite {
    Patch(ThreadPatch),
    Comment(Comment),
}

/// Comment, answer and lock state of one thread for the lifetime of a page visit.
///
/// Every mutation is persisted first and reflected locally only after the store accepted it.
/// Mutations of the same thread are serialized through the context's [`crate::MutationGate`]
/// and carry the session's version as the expected store version.
pub struct ThreadSession {
    ctx: ForumContext,
    identity: Arc<dyn IdentityProvider>,
    thread_id: ThreadId,
    state: RwLock<Thread>,
    cancel: CancellationToken,
    events: broadcast::Sender<ForumEvent>,
}

impl ThreadSession {
    pub async fn open(
        ctx: ForumContext,
        identity: Arc<dyn IdentityProvider>,
        thread_id: ThreadId,
    ) -> Result<Self, ForumError> {
        Self::open_with_cancellation(ctx, identity, thread_id, CancellationToken::new()).await
    }

    pub async fn open_with_cancellation(
        ctx: ForumContext,
        identity: Arc<dyn IdentityProvider>,
        thread_id: ThreadId,
        cancel: CancellationToken,
    ) -> Result<Self, ForumError> {
        let cancel = cancel.child_token();
        let thread = fetch_thread(&ctx, &cancel, thread_id).await?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            ctx,
            identity,
            thread_id,
            state: RwLock::new(thread),
            cancel,
            events,
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ForumEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> Thread {
        self.state.read().await.clone()
    }

    pub async fn comments(&self) -> Vec<Comment> {
        self.state.read().await.comments.clone()
    }

    pub async fn answered_comment_id(&self) -> Option<CommentId> {
        self.state.read().await.answered_comment_id
    }

    pub async fn answered_comment(&self) -> Option<Comment> {
        self.state.read().await.answered_comment().cloned()
    }

    pub async fn is_answered(&self) -> bool {
        self.state.read().await.is_answered
    }

    pub async fn is_locked(&self) -> bool {
        self.state.read().await.is_locked
    }

    /// Replaces the local copy with the stored thread.
    pub async fn reload(&self) -> Result<(), ForumError> {
        let _guard = self.ctx.gate.acquire(self.thread_id).await;
        self.reload_unguarded().await
    }

    async fn reload_unguarded(&self) -> Result<(), ForumError> {
        let thread = fetch_thread(&self.ctx, &self.cancel, self.thread_id).await?;
        *self.state.write().await = thread;
        let _ = self.events.send(ForumEvent::ThreadReloaded {
            thread_id: self.thread_id,
        });
        Ok(())
    }

    /// Persists a new comment by the signed-in user, then appends it locally.
    ///
    /// Comments never overwrite each other, so a write that lost the version race is
    /// replayed against the reloaded thread instead of being rejected.
    pub async fn add_comment(&self, content: &str) -> Result<Comment, ForumError> {
        let (_, comment) = self
            .mutate("add comment", |thread| {
                let user = access::require_user(self.identity.as_ref())?;
                if thread.is_locked {
                    return Err(ForumError::Locked);
                }
                let comment = Comment {
                    id: CommentId::new(),
                    content: validation::validate_comment(content)?,
                    creator: user.to_ref(),
                    creation_date: Utc::now(),
                };
                Ok((PendingWrite::Comment(comment.clone()), comment))
            })
            .await?;

        let _ = self.events.send(ForumEvent::CommentAdded {
            thread_id: self.thread_id,
            comment_id: comment.id,
        });
        self.ctx.notifier.success("Comment added");
        Ok(comment)
    }

    /// Toggles the answer marker: marking the current answer clears it, marking any other
    /// comment makes that comment the single answer. Returns the new answered comment.
    pub async fn mark_as_answered(
        &self,
        comment_id: CommentId,
    ) -> Result<Option<CommentId>, ForumError> {
        let (thread, ()) = self
            .mutate("mark as answered", |thread| {
                access::require_manager(self.identity.as_ref(), thread)?;
                if !thread.is_qna {
                    return Err(ForumError::NotQna);
                }
                if thread.is_locked {
                    return Err(ForumError::Locked);
                }
                if thread.comment(comment_id).is_none() {
                    return Err(ForumError::CommentNotFound(comment_id));
                }
                let next = if thread.answered_comment_id == Some(comment_id) {
                    None
                } else {
                    Some(comment_id)
                };
                Ok((
                    PendingWrite::Patch(ThreadPatch::expecting(thread.version).answered(next)),
                    (),
                ))
            })
            .await?;

        let answered = thread.answered_comment_id;
        let _ = self.events.send(ForumEvent::AnswerChanged {
            thread_id: self.thread_id,
            answered_comment_id: answered,
        });
        self.ctx.notifier.success(if answered.is_some() {
            "Marked as answer"
        } else {
            "Answer removed"
        });
        Ok(answered)
    }

    /// Flips the lock. Returns the new lock state.
    pub async fn toggle_lock(&self) -> Result<bool, ForumError> {
        let (thread, ()) = self
            .mutate("toggle lock", |thread| {
                access::require_manager(self.identity.as_ref(), thread)?;
                Ok((
                    PendingWrite::Patch(
                        ThreadPatch::expecting(thread.version).locked(!thread.is_locked),
                    ),
                    (),
                ))
            })
            .await?;

        let _ = self.events.send(ForumEvent::LockChanged {
            thread_id: self.thread_id,
            is_locked: thread.is_locked,
        });
        self.ctx.notifier.success(if thread.is_locked {
            "Thread locked"
        } else {
            "Thread unlocked"
        });
        Ok(thread.is_locked)
    }

    /// Rewrites title, body, category, Q&A flag and tags. Turning Q&A off clears the answer.
    pub async fn edit(&self, edit: ThreadEdit) -> Result<Thread, ForumError> {
        let (thread, ()) = self
            .mutate("edit thread", |thread| {
                access::require_manager(self.identity.as_ref(), thread)?;
                let mut patch = ThreadPatch {
                    title: Some(validation::validate_title(&edit.title)?),
                    description: Some(validation::validate_description(&edit.description)?),
                    category: Some(edit.category),
                    tags: Some(validation::resolve_tags(&edit.tag_ids)?),
                    is_qna: Some(edit.is_qna),
                    ..ThreadPatch::expecting(thread.version)
                };
                if !edit.is_qna && thread.answered_comment_id.is_some() {
                    patch = patch.answered(None);
                }
                Ok((PendingWrite::Patch(patch), ()))
            })
            .await?;

        let _ = self.events.send(ForumEvent::ThreadEdited {
            thread_id: self.thread_id,
        });
        self.ctx.notifier.success("Thread updated");
        Ok(thread)
    }

    /// Runs one read-modify-write under the thread's gate and returns the reflected thread
    /// together with whatever the plan handed back alongside its write.
    ///
    /// On a version conflict the session reloads while still holding the gate. Comment
    /// appends are then planned again against the fresh thread, so precondition checks
    /// such as the lock see the stored state. Patches report the conflict to the caller.
    async fn mutate<F, T>(&self, action: &'static str, plan: F) -> Result<(Thread, T), ForumError>
    where
        F: Fn(&Thread) -> Result<(PendingWrite, T), ForumError>,
    {
        let _guard = self.ctx.gate.acquire(self.thread_id).await;
        let mut attempt = 1;
        loop {
            let mut next = self.state.read().await.clone();
            let mut replayable = false;
            let outcome = match plan(&next) {
                Ok((write, output)) => {
                    replayable = matches!(write, PendingWrite::Comment(_));
                    self.persist(write, &mut next).await.map(|()| output)
                }
                Err(rejected) => Err(rejected),
            };

            match outcome {
                Ok(output) => {
                    *self.state.write().await = next.clone();
                    info!(thread_id = %self.thread_id, version = next.version, action, attempt, "thread updated");
                    return Ok((next, output));
                }
                Err(ForumError::Conflict(thread_id)) => {
                    warn!(%thread_id, action, attempt, "stale thread state; reloading");
                    match self.reload_unguarded().await {
                        Ok(()) if replayable && attempt < MAX_APPEND_ATTEMPTS => {
                            attempt += 1;
                            continue;
                        }
                        Ok(()) => {}
                        Err(reload_error) => {
                            warn!(%thread_id, error = %reload_error, "reload after conflict failed");
                        }
                    }
                    let conflict = ForumError::Conflict(thread_id);
                    self.ctx.notifier.failure(&conflict.to_string());
                    return Err(conflict);
                }
                Err(failure) => {
                    match &failure {
                        ForumError::Persistence(source) => {
                            error!(thread_id = %self.thread_id, action, error = %source, "failed to persist thread change");
                        }
                        rejected => {
                            warn!(thread_id = %self.thread_id, action, reason = %rejected, "thread change rejected");
                        }
                    }
                    self.ctx.notifier.failure(&failure.to_string());
                    return Err(failure);
                }
            }
        }
    }

    async fn persist(&self, write: PendingWrite, next: &mut Thread) -> Result<(), ForumError> {
        let store = &self.ctx.store;
        match write {
            PendingWrite::Patch(patch) => {
                let version = store.update_thread(self.thread_id, patch.clone()).await?;
                patch.apply_to(next);
                next.version = version;
            }
            PendingWrite::Comment(comment) => {
                let version = store
                    .append_comment(self.thread_id, comment.clone(), Some(next.version))
                    .await?;
                next.comments.push(comment);
                next.version = version;
            }
        }
        Ok(())
    }

    /// Cancels in-flight fetches of this session.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ThreadSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn fetch_thread(
    ctx: &ForumContext,
    cancel: &CancellationToken,
    thread_id: ThreadId,
) -> Result<Thread, ForumError> {
    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ForumError::Cancelled),
        fetched = ctx.store.fetch_thread(thread_id) => fetched,
    };
    match fetched {
        Ok(Some(thread)) => Ok(thread),
        Ok(None) => Err(ForumError::ThreadNotFound(thread_id)),
        Err(error) => {
            warn!(%thread_id, %error, "failed to fetch thread");
            Err(ForumError::from(error))
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
