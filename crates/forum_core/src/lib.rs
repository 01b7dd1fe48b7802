//! State coordination for the forum: the tag-filtered thread board and per-thread
//! comment, answer and lock state, kept consistent with a [`storage::ThreadStore`].

use std::sync::Arc;

use serde::Serialize;
use shared::domain::{CommentId, Tag, ThreadId};
use storage::ThreadStore;

pub mod access;
pub mod board;
pub mod error;
pub mod gate;
pub mod identity;
pub mod notify;
pub mod session;
pub mod tags;

pub use board::ThreadBoard;
pub use error::ForumError;
pub use gate::MutationGate;
pub use identity::{IdentityProvider, SessionIdentity};
pub use notify::{BroadcastNotifier, LogNotifier, Notification, NotificationLevel, NotificationSink};
pub use session::ThreadSession;
pub use tags::{filter_threads, TagFilter};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Collaborators shared by every board and session of one process.
#[derive(Clone)]
pub struct ForumContext {
    pub store: Arc<dyn ThreadStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub gate: Arc<MutationGate>,
}

impl ForumContext {
    pub fn new(store: Arc<dyn ThreadStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notifier,
            gate: Arc::new(MutationGate::new()),
        }
    }
}

/// State changes published to views of a board or session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForumEvent {
    ThreadsLoaded {
        count: usize,
    },
    FilterChanged {
        selected: Vec<Tag>,
    },
    ThreadCreated {
        thread_id: ThreadId,
    },
    ThreadReloaded {
        thread_id: ThreadId,
    },
    CommentAdded {
        thread_id: ThreadId,
        comment_id: CommentId,
    },
    AnswerChanged {
        thread_id: ThreadId,
        answered_comment_id: Option<CommentId>,
    },
    LockChanged {
        thread_id: ThreadId,
        is_locked: bool,
    },
    ThreadEdited {
        thread_id: ThreadId,
    },
}
