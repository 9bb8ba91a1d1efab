//! Bearer-token authentication and team role checks.
//!
//! Tokens are HMAC-signed wrappers around a random value stored in `access_tokens`,
//! so they can be revoked server-side. Signature checks use constant-time comparison.

mod gate;
mod token;

pub use gate::*;
pub use token::*;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{Role, TeamSummary};
use crate::AppState;

/// The authenticated caller, inserted into request extensions by [`bearer_auth_layer`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub profile_id: i64,
    pub email: String,
    pub display_name: Option<String>,
    /// Raw (unsigned) token value, used for logout
    pub raw_token: String,
    pub teams: Vec<TeamSummary>,
}

impl AuthContext {
    /// The caller's role in a team, if a member.
    pub fn role_in(&self, team_id: i64) -> Option<Role> {
        self.teams
            .iter()
            .find(|t| t.team_id == team_id)
            .map(|t| t.role)
    }

    /// Any member of the team passes.
    pub fn require_member(&self, team_id: i64) -> Result<Role, AppError> {
        self.role_in(team_id)
            .ok_or_else(|| AppError::Forbidden("Team access denied".to_string()))
    }

    /// Only managers (and admins) pass; `action` completes "Only managers can ...".
    pub fn require_manager(&self, team_id: i64, action: &str) -> Result<Role, AppError> {
        let role = self.require_member(team_id)?;
        if !role.can_manage() {
            return Err(AppError::Forbidden(format!("Only managers can {}", action)));
        }
        Ok(role)
    }

    pub fn manages_any_team(&self) -> bool {
        self.teams.iter().any(|t| t.role.can_manage())
    }
}

/// Bearer authentication layer for protected routes.
pub async fn bearer_auth_layer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return AppError::Unauthorized("Missing authorization".to_string()).into_response();
    };

    match resolve_context(&state.repo, &state.signer, &token).await {
        Ok(context) => {
            tracing::debug!("Authenticated profile {}", context.profile_id);
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Verify a signed token and load the caller's profile and memberships.
pub async fn resolve_context(
    repo: &Repository,
    signer: &TokenSigner,
    token: &str,
) -> Result<AuthContext, AppError> {
    let raw_token = signer.verify(token)?;
    let profile_id = repo
        .touch_access_token(&raw_token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Token revoked".to_string()))?;
    let profile = repo
        .get_profile(profile_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Token revoked".to_string()))?;
    let teams = repo.list_memberships(profile_id).await?;

    Ok(AuthContext {
        profile_id,
        email: profile.email,
        display_name: profile.display_name,
        raw_token,
        teams,
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Perform constant-time string comparison.
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
