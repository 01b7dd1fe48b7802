use shared::{
    domain::{CommentId, ThreadId},
    error::{ApiError, ErrorCode},
    validation::ValidationError,
};
use storage::StoreError;
use thiserror::Error;

/// Failure of a forum operation. Local state is never changed when one of these is returned.
#[derive(Debug, Error)]
pub enum ForumError {
    #[error("thread {0} not found")]
    ThreadNotFound(ThreadId),
    #[error("comment {0} not found in this thread")]
    CommentNotFound(CommentId),
    #[error("failed to save changes: {0}")]
    Persistence(#[source] StoreError),
    #[error("thread {0} was changed elsewhere; the latest version has been loaded")]
    Conflict(ThreadId),
    #[error("you need to sign in first")]
    Unauthenticated,
    #[error("only the thread creator or a moderator can do that")]
    Forbidden,
    #[error("this thread is locked")]
    Locked,
    #[error("only Q&A threads can have an answer")]
    NotQna,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("operation cancelled")]
    Cancelled,
}

impl From<StoreError> for ForumError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(thread_id) => ForumError::ThreadNotFound(thread_id),
            StoreError::Conflict { thread_id, .. } => ForumError::Conflict(thread_id),
            other => ForumError::Persistence(other),
        }
    }
}

impl ForumError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ForumError::ThreadNotFound(_) | ForumError::CommentNotFound(_) => ErrorCode::NotFound,
            ForumError::Persistence(_) | ForumError::Cancelled => ErrorCode::Internal,
            ForumError::Conflict(_) => ErrorCode::Conflict,
            ForumError::Unauthenticated => ErrorCode::Unauthorized,
            ForumError::Forbidden => ErrorCode::Forbidden,
            ForumError::Locked => ErrorCode::Locked,
            ForumError::NotQna | ForumError::Validation(_) => ErrorCode::Validation,
        }
    }
}

impl From<ForumError> for ApiError {
    fn from(value: ForumError) -> Self {
        // Backend details stay in the logs.
        let message = match &value {
            ForumError::Persistence(_) => "failed to save changes".to_string(),
            other => other.to_string(),
        };
        ApiError::new(value.code(), message)
    }
}
