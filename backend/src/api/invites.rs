//! Invite endpoints. An invite is the only way onto a team.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use chrono::{DateTime, TimeDelta, Utc};

use super::{created, deleted, success, ApiResult, Deleted};
use crate::auth::AuthContext;
use crate::errors::AppError;
use crate::models::{normalize_email, CreateInviteRequest, Invite, Role};
use crate::time::format_timestamp;
use crate::AppState;

const INVITE_CODE_LEN: usize = 8;

/// GET /api/teams/{team_id}/invites - Invites of a team.
pub async fn list_invites(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(team_id): Path<i64>,
) -> ApiResult<Vec<Invite>> {
    ctx.require_manager(team_id, "view invites")?;
    success(state.repo.list_invites(team_id).await?)
}

/// POST /api/teams/{team_id}/invites - Invite an e-mail address.
pub async fn create_invite(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(team_id): Path<i64>,
    payload: Result<Json<CreateInviteRequest>, JsonRejection>,
) -> ApiResult<Invite> {
    ctx.require_manager(team_id, "invite members")?;
    let Json(request) = payload?;

    let email = normalize_email(&request.email);
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }
    let role = match request.role.as_deref().map(str::trim) {
        Some(role) if !role.is_empty() => role.parse()?,
        _ => Role::Player,
    };

    let code = invite_code();
    let expires_at = format_timestamp(invite_expiry(Utc::now(), state.config.invite_ttl_hours)?);
    let invite = state
        .repo
        .upsert_invite(team_id, &email, role, &code, ctx.profile_id, &expires_at)
        .await?;

    let link = invite_link(&state.config.base_url, &invite);
    let inviter = ctx.display_name.as_deref().unwrap_or(&ctx.email);
    let body = format!(
        "{} has invited you to join the team as {}.\n\nUse this link to sign in: {}\nInvite code: {}\nValid until: {}",
        inviter, invite.role, link, invite.code, expires_at
    );
    state
        .notifier
        .notify_quietly(
            &state.repo,
            "Your team invite",
            &body,
            std::slice::from_ref(&invite.email),
        )
        .await;

    tracing::info!(
        "Invite {} created for {} on team {} by profile {}",
        invite.id,
        invite.email,
        team_id,
        ctx.profile_id
    );
    created(invite)
}

/// DELETE /api/teams/{team_id}/invites/{invite_id} - Withdraw an invite.
pub async fn delete_invite(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, invite_id)): Path<(i64, i64)>,
) -> ApiResult<Deleted> {
    ctx.require_manager(team_id, "withdraw invites")?;
    state.repo.delete_invite(team_id, invite_id).await?;
    deleted()
}

fn invite_expiry(now: DateTime<Utc>, ttl_hours: i64) -> Result<DateTime<Utc>, AppError> {
    TimeDelta::try_hours(ttl_hours)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| AppError::Internal(format!("Invite TTL of {} hours is out of range", ttl_hours)))
}

fn invite_code() -> String {
    let mut code = uuid::Uuid::new_v4().simple().to_string();
    code.truncate(INVITE_CODE_LEN);
    code.to_uppercase()
}

fn invite_link(base_url: &str, invite: &Invite) -> String {
    format!(
        "{}/accept?code={}&team_id={}&email={}",
        base_url.trim_end_matches('/'),
        invite.code,
        invite.team_id,
        encode_query_value(&invite.email)
    )
}

/// Percent-encode everything except RFC 3986 unreserved characters.
fn encode_query_value(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}
