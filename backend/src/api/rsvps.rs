//! RSVP endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use chrono::Utc;

use super::sessions::find_session;
use super::{deleted, success, ApiResult, Deleted};
use crate::auth::AuthContext;
use crate::errors::AppError;
use crate::models::{
    sort_rsvps, Rsvp, RsvpListResponse, RsvpStatus, RsvpSummary, RsvpWriteResponse, Session,
    UpsertRsvpRequest,
};
use crate::AppState;

/// GET .../sessions/{session_id}/rsvps - Sorted roster with counts.
pub async fn list_rsvps(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, session_id)): Path<(i64, i64)>,
) -> ApiResult<RsvpListResponse> {
    ctx.require_member(team_id)?;
    find_session(&state, team_id, session_id).await?;

    let mut rsvps = state.repo.list_rsvps(session_id).await?;
    sort_rsvps(&mut rsvps);
    let summary = RsvpSummary::from_rsvps(&rsvps);
    let mine = rsvps
        .iter()
        .find(|r| r.profile_id == ctx.profile_id)
        .map(|r| r.status);

    success(RsvpListResponse {
        rsvps,
        summary,
        mine,
    })
}

/// GET .../rsvps/self - The caller's RSVP, or null.
pub async fn get_own_rsvp(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, session_id)): Path<(i64, i64)>,
) -> ApiResult<Option<Rsvp>> {
    ctx.require_member(team_id)?;
    find_session(&state, team_id, session_id).await?;
    success(state.repo.get_rsvp(session_id, ctx.profile_id).await?)
}

/// PUT .../rsvps/self - Answer for oneself.
pub async fn put_own_rsvp(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, session_id)): Path<(i64, i64)>,
    payload: Result<Json<UpsertRsvpRequest>, JsonRejection>,
) -> ApiResult<RsvpWriteResponse> {
    let Json(request) = payload?;
    let profile_id = ctx.profile_id;
    write_rsvp(&state, &ctx, team_id, session_id, profile_id, request).await
}

/// PUT .../rsvps/{profile_id} - Answer on behalf of a player (managers).
pub async fn put_rsvp(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, session_id, profile_id)): Path<(i64, i64, i64)>,
    payload: Result<Json<UpsertRsvpRequest>, JsonRejection>,
) -> ApiResult<RsvpWriteResponse> {
    let Json(request) = payload?;
    write_rsvp(&state, &ctx, team_id, session_id, profile_id, request).await
}

/// DELETE .../rsvps/{profile_id} - Withdraw an answer.
pub async fn delete_rsvp(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, session_id, profile_id)): Path<(i64, i64, i64)>,
) -> ApiResult<Deleted> {
    authorize_rsvp_target(&state, &ctx, team_id, profile_id).await?;
    let session = find_session(&state, team_id, session_id).await?;
    ensure_window_open(&session)?;

    state
        .repo
        .delete_rsvp(team_id, session_id, profile_id, ctx.profile_id)
        .await?;
    deleted()
}

/// Members may act for themselves; acting for someone else needs a manager.
async fn authorize_rsvp_target(
    state: &AppState,
    ctx: &AuthContext,
    team_id: i64,
    profile_id: i64,
) -> Result<(), AppError> {
    ctx.require_member(team_id)?;
    if profile_id == ctx.profile_id {
        return Ok(());
    }
    ctx.require_manager(team_id, "answer for other players")?;
    state
        .repo
        .member_role(team_id, profile_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Member {} not found", profile_id)))?;
    Ok(())
}

fn ensure_window_open(session: &Session) -> Result<(), AppError> {
    if !session.accepts_rsvps_at(Utc::now()) {
        return Err(AppError::Forbidden("RSVP window closed".to_string()));
    }
    Ok(())
}

async fn write_rsvp(
    state: &AppState,
    ctx: &AuthContext,
    team_id: i64,
    session_id: i64,
    profile_id: i64,
    request: UpsertRsvpRequest,
) -> ApiResult<RsvpWriteResponse> {
    authorize_rsvp_target(state, ctx, team_id, profile_id).await?;
    let status: RsvpStatus = request.status.parse()?;
    let session = find_session(state, team_id, session_id).await?;
    ensure_window_open(&session)?;

    let note = request.note.as_deref().map(str::trim).unwrap_or_default();
    let (write, rsvp) = state
        .repo
        .upsert_rsvp(team_id, session_id, profile_id, ctx.profile_id, status, note)
        .await?;

    let managers = state.repo.team_emails(team_id, true).await?;
    let body = format!(
        "{} answered {} for {} ({}).",
        rsvp.label(),
        status,
        session.title,
        session.start_at
    );
    state
        .notifier
        .notify_quietly(
            &state.repo,
            &format!("RSVP update: {}", session.title),
            &body,
            &managers,
        )
        .await;

    tracing::info!(
        "RSVP {} for session {} profile {}: {}",
        write.as_str(),
        session_id,
        profile_id,
        status
    );
    success(RsvpWriteResponse { status: write, rsvp })
}
