use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use forum_core::{ForumContext, ForumError, LogNotifier, SessionIdentity, ThreadBoard, ThreadSession};
use serde::{Deserialize, Serialize};
use shared::{
    catalog,
    domain::{Category, Comment, CommentId, Tag, Thread, ThreadId, User, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        CategorySummary, MarkAnsweredRequest, NewCommentRequest, RegisterUserRequest,
        ThreadDraft, ThreadEdit, ThreadSummary,
    },
    validation::{self, ValidationError},
};
use storage::{Storage, UserDirectory};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url};

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Clone)]
struct AppState {
    storage: Storage,
    forum: ForumContext,
}

impl AppState {
    fn new(storage: Storage) -> Self {
        let forum = ForumContext::new(Arc::new(storage.clone()), Arc::new(LogNotifier));
        Self { storage, forum }
    }
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListThreadsQuery {
    user_id: Option<String>,
    /// Comma-separated tag ids.
    tags: Option<String>,
    category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnswerResponse {
    answered_comment_id: Option<CommentId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockResponse {
    is_locked: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let app = build_router(Arc::new(AppState::new(storage)));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/tags", get(list_tags))
        .route("/categories", get(list_categories))
        .route("/users", post(register_user))
        .route("/threads", get(list_threads).post(create_thread))
        .route("/threads/:thread_id", get(get_thread).put(edit_thread))
        .route("/threads/:thread_id/comments", post(add_comment))
        .route("/threads/:thread_id/answer", post(mark_answered))
        .route("/threads/:thread_id/lock", post(toggle_lock))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Locked => StatusCode::LOCKED,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn forum_error(err: ForumError) -> HttpError {
    let api = ApiError::from(err);
    (status_for(api.code), Json(api))
}

fn validation_error(err: ValidationError) -> HttpError {
    (StatusCode::BAD_REQUEST, Json(ApiError::from(err)))
}

fn internal_error(err: impl std::fmt::Display) -> HttpError {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::new(ErrorCode::Internal, "internal error")),
    )
}

/// Resolves the caller named by `user_id`; no id means an anonymous visitor.
async fn identity_for(
    state: &AppState,
    user_id: Option<&str>,
) -> Result<Arc<SessionIdentity>, HttpError> {
    let Some(user_id) = user_id.map(str::trim).filter(|id| !id.is_empty()) else {
        return Ok(Arc::new(SessionIdentity::anonymous()));
    };
    let user = state
        .storage
        .fetch_user(&UserId::new(user_id))
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            warn!(%user_id, "request from unknown user");
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiError::new(ErrorCode::Unauthorized, "unknown user")),
            )
        })?;
    Ok(Arc::new(SessionIdentity::signed_in(user)))
}

async fn open_session(
    state: &AppState,
    thread_id: ThreadId,
    user_id: Option<&str>,
) -> Result<ThreadSession, HttpError> {
    let identity = identity_for(state, user_id).await?;
    ThreadSession::open(state.forum.clone(), identity, thread_id)
        .await
        .map_err(forum_error)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.storage.health_check().await.map_err(internal_error)?;
    Ok("ok")
}

async fn list_tags() -> Json<Vec<Tag>> {
    Json(catalog::tags())
}

async fn list_categories() -> Json<Vec<CategorySummary>> {
    Json(Category::ALL.into_iter().map(CategorySummary::from).collect())
}

async fn register_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterUserRequest>,
) -> Result<Json<User>, HttpError> {
    let id = req.id.trim();
    let username = req.username.trim();
    if id.is_empty() || username.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                ErrorCode::Validation,
                "id and username are required",
            )),
        ));
    }
    let user = state
        .storage
        .register_user(&UserId::new(id), username, req.email.trim())
        .await
        .map_err(internal_error)?;
    info!(user_id = %user.id, "user registered");
    Ok(Json(user))
}

async fn list_threads(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListThreadsQuery>,
) -> Result<Json<Vec<ThreadSummary>>, HttpError> {
    let tag_ids: Vec<String> = q
        .tags
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    let tags = validation::resolve_tags(&tag_ids).map_err(validation_error)?;
    let category = match q.category.as_deref() {
        Some(raw) => Some(
            Category::parse(raw)
                .ok_or_else(|| validation_error(ValidationError::UnknownCategory(raw.to_string())))?,
        ),
        None => None,
    };

    let identity = identity_for(&state, q.user_id.as_deref()).await?;
    let board = ThreadBoard::new(state.forum.clone(), identity);
    board.load().await.map_err(forum_error)?;
    for tag in tags {
        board.toggle_tag(tag).await;
    }
    let threads = board.filtered_threads_in(category).await;
    Ok(Json(threads.iter().map(ThreadSummary::from).collect()))
}

async fn create_thread(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(draft): Json<ThreadDraft>,
) -> Result<(StatusCode, Json<Thread>), HttpError> {
    let identity = identity_for(&state, q.user_id.as_deref()).await?;
    let board = ThreadBoard::new(state.forum.clone(), identity);
    let thread = board.create_thread(draft).await.map_err(forum_error)?;
    Ok((StatusCode::CREATED, Json(thread)))
}

async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Thread>, HttpError> {
    let session = open_session(&state, thread_id, q.user_id.as_deref()).await?;
    Ok(Json(session.snapshot().await))
}

async fn edit_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    Query(q): Query<UserQuery>,
    Json(edit): Json<ThreadEdit>,
) -> Result<Json<Thread>, HttpError> {
    let session = open_session(&state, thread_id, q.user_id.as_deref()).await?;
    let thread = session.edit(edit).await.map_err(forum_error)?;
    Ok(Json(thread))
}

async fn add_comment(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    Query(q): Query<UserQuery>,
    Json(req): Json<NewCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), HttpError> {
    let session = open_session(&state, thread_id, q.user_id.as_deref()).await?;
    let comment = session.add_comment(&req.content).await.map_err(forum_error)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn mark_answered(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    Query(q): Query<UserQuery>,
    Json(req): Json<MarkAnsweredRequest>,
) -> Result<Json<AnswerResponse>, HttpError> {
    let session = open_session(&state, thread_id, q.user_id.as_deref()).await?;
    let answered_comment_id = session
        .mark_as_answered(req.comment_id)
        .await
        .map_err(forum_error)?;
    Ok(Json(AnswerResponse {
        answered_comment_id,
    }))
}

async fn toggle_lock(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    Query(q): Query<UserQuery>,
) -> Result<Json<LockResponse>, HttpError> {
    let session = open_session(&state, thread_id, q.user_id.as_deref()).await?;
    let is_locked = session.toggle_lock().await.map_err(forum_error)?;
    Ok(Json(LockResponse { is_locked }))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
