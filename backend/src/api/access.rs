//! Season access gate and access requests.

use axum::{extract::rejection::JsonRejection, extract::State, Extension, Json};

use super::{created, success, ApiResult};
use crate::auth::AuthContext;
use crate::errors::AppError;
use crate::models::{
    clean_text, normalize_email, AccessRequest, CreateAccessRequest, VerifyAccessRequest,
    VerifyAccessResponse,
};
use crate::AppState;

/// POST /api/access/verify - Check a season access code.
pub async fn verify_access(
    State(state): State<AppState>,
    payload: Result<Json<VerifyAccessRequest>, JsonRejection>,
) -> ApiResult<VerifyAccessResponse> {
    let Json(request) = payload?;
    let granted = state.gate.verify(&request.code);
    tracing::debug!("Access code check: granted={}", granted);
    success(VerifyAccessResponse { granted })
}

/// POST /api/access-requests - Ask to be invited.
pub async fn create_access_request(
    State(state): State<AppState>,
    payload: Result<Json<CreateAccessRequest>, JsonRejection>,
) -> ApiResult<AccessRequest> {
    let Json(request) = payload?;

    let email = normalize_email(&request.email);
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }

    let display_name = clean_text(request.display_name.as_deref());
    let message = clean_text(request.message.as_deref());
    let access_request = state
        .repo
        .upsert_access_request(&email, display_name.as_deref(), message.as_deref())
        .await?;

    tracing::info!("Access requested by {}", email);
    created(access_request)
}

/// GET /api/access-requests - Pending requests, for managers of any team.
pub async fn list_access_requests(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Vec<AccessRequest>> {
    if !ctx.manages_any_team() {
        return Err(AppError::Forbidden(
            "Only managers can view access requests".to_string(),
        ));
    }
    success(state.repo.list_access_requests().await?)
}
