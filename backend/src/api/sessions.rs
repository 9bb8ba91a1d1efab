//! Training session endpoints.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use chrono::Utc;

use super::{created, deleted, success, ApiResult, Deleted};
use crate::auth::AuthContext;
use crate::db::SessionFilter;
use crate::errors::AppError;
use crate::models::{CreateSessionRequest, Session, SessionQuery, UpdateSessionRequest};
use crate::time::{normalize_timestamp, now_timestamp};
use crate::AppState;

/// Load a session of a team or fail with 404.
pub(crate) async fn find_session(
    state: &AppState,
    team_id: i64,
    session_id: i64,
) -> Result<Session, AppError> {
    state
        .repo
        .get_session(team_id, session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))
}

/// GET /api/teams/{team_id}/sessions - Sessions ordered by start time.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(team_id): Path<i64>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> ApiResult<Vec<Session>> {
    ctx.require_member(team_id)?;
    let Query(query) = query?;

    let filter = SessionFilter {
        ends_after: query.upcoming.unwrap_or(false).then(now_timestamp),
        starts_from: query.from.as_deref().map(normalize_timestamp).transpose()?,
        starts_before: query.to.as_deref().map(normalize_timestamp).transpose()?,
    };
    success(state.repo.list_sessions(team_id, &filter).await?)
}

/// GET /api/teams/{team_id}/sessions/{session_id} - A single session.
pub async fn get_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, session_id)): Path<(i64, i64)>,
) -> ApiResult<Session> {
    ctx.require_member(team_id)?;
    success(find_session(&state, team_id, session_id).await?)
}

/// POST /api/teams/{team_id}/sessions - Schedule a session.
pub async fn create_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(team_id): Path<i64>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult<Session> {
    ctx.require_manager(team_id, "create sessions")?;
    let Json(request) = payload?;
    let draft = request.into_draft()?;

    let session = state
        .repo
        .create_session(team_id, ctx.profile_id, &draft)
        .await?;

    let recipients = state.repo.team_emails(team_id, false).await?;
    let body = format!(
        "{}\nStarts: {}\nEnds: {}\nLocation: {}",
        session.title,
        session.start_at,
        session.end_at,
        session.location.as_deref().unwrap_or("TBC")
    );
    state
        .notifier
        .notify_quietly(
            &state.repo,
            &format!("New training session: {}", session.title),
            &body,
            &recipients,
        )
        .await;

    tracing::info!("Session {} created on team {}", session.id, team_id);
    created(session)
}

/// PUT /api/teams/{team_id}/sessions/{session_id} - Partially update a session.
pub async fn update_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, session_id)): Path<(i64, i64)>,
    payload: Result<Json<UpdateSessionRequest>, JsonRejection>,
) -> ApiResult<Session> {
    ctx.require_manager(team_id, "edit sessions")?;
    let Json(request) = payload?;

    let existing = find_session(&state, team_id, session_id).await?;
    if existing.is_locked_at(Utc::now()) {
        return Err(AppError::Forbidden("Session is locked".to_string()));
    }
    if request.is_empty() {
        return success(existing);
    }

    let draft = request.merge(&existing)?;
    let changes = serde_json::to_value(&request)?;
    let session = state
        .repo
        .update_session(team_id, session_id, ctx.profile_id, &draft, &changes)
        .await?;

    success(session)
}

/// DELETE /api/teams/{team_id}/sessions/{session_id} - Cancel a session.
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, session_id)): Path<(i64, i64)>,
) -> ApiResult<Deleted> {
    ctx.require_manager(team_id, "delete sessions")?;

    let existing = find_session(&state, team_id, session_id).await?;
    if existing.is_locked_at(Utc::now()) {
        return Err(AppError::Forbidden("Session is locked".to_string()));
    }

    state
        .repo
        .delete_session(team_id, session_id, ctx.profile_id)
        .await?;

    tracing::info!("Session {} deleted from team {}", session_id, team_id);
    deleted()
}
