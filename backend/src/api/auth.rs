//! Sign-in, sign-out and the current caller.

use axum::{extract::rejection::JsonRejection, extract::State, Extension, Json};
use chrono::Utc;
use serde::Serialize;

use super::{success, ApiResult};
use crate::auth::{AuthContext, TokenSigner};
use crate::errors::AppError;
use crate::models::{
    clean_text, normalize_email, LoginResponse, MagicLinkRequest, MeResponse, ProfilePayload,
};
use crate::time::parse_timestamp;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedOut {
    pub logged_out: bool,
}

/// POST /api/auth/magic-link - Exchange an invite for an access token.
pub async fn magic_link(
    State(state): State<AppState>,
    payload: Result<Json<MagicLinkRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let Json(request) = payload?;

    let email = normalize_email(&request.email);
    let code = request.invite_code.trim();
    if email.is_empty() || code.is_empty() {
        return Err(AppError::Validation(
            "Email and invite code are required".to_string(),
        ));
    }

    if !state
        .gate
        .verify(request.season_code.as_deref().unwrap_or_default())
    {
        tracing::info!("Rejected sign-in for {}: bad season code", email);
        return Err(AppError::Forbidden("Invalid season access code".to_string()));
    }

    let invite = state
        .repo
        .find_invite(&email, code)
        .await?
        .ok_or_else(|| AppError::NotFound("Invite not found".to_string()))?;

    if let Some(expires_at) = &invite.expires_at {
        if parse_timestamp(expires_at)? <= Utc::now() {
            return Err(AppError::Gone("Invite has expired".to_string()));
        }
    }

    let details = ProfilePayload {
        display_name: clean_text(request.profile.display_name.as_deref()),
        phone: clean_text(request.profile.phone.as_deref()),
        guardian_name: clean_text(request.profile.guardian_name.as_deref()),
    };

    let raw_token = TokenSigner::generate_raw_token();
    let token = state.signer.sign(&raw_token)?;
    let profile_id = state
        .repo
        .accept_invite(&invite, &details, &raw_token)
        .await?;

    let profile = state
        .repo
        .get_profile(profile_id)
        .await?
        .ok_or_else(|| AppError::Internal("Profile missing after sign-in".to_string()))?;
    let teams = state.repo.list_memberships(profile_id).await?;

    tracing::info!(
        "Profile {} signed in via invite {} to team {}",
        profile_id,
        invite.id,
        invite.team_id
    );

    success(LoginResponse {
        profile,
        teams,
        token,
    })
}

/// POST /api/auth/logout - Revoke the presented token.
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<LoggedOut> {
    state.repo.delete_access_token(&ctx.raw_token).await?;
    tracing::info!("Profile {} signed out", ctx.profile_id);
    success(LoggedOut { logged_out: true })
}

/// GET /api/me - The signed-in profile and its teams.
pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<MeResponse> {
    let profile = state
        .repo
        .get_profile(ctx.profile_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Profile no longer exists".to_string()))?;

    success(MeResponse {
        profile,
        teams: ctx.teams,
    })
}
