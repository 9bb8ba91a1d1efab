//! Team and roster endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};

use super::{deleted, success, ApiResult, Deleted};
use crate::auth::AuthContext;
use crate::errors::AppError;
use crate::models::{MembersResponse, Role, TeamMember, TeamSummary, UpdateMemberRequest};
use crate::AppState;

/// GET /api/teams - Teams of the caller.
pub async fn list_teams(Extension(ctx): Extension<AuthContext>) -> ApiResult<Vec<TeamSummary>> {
    success(ctx.teams)
}

/// GET /api/teams/{team_id}/members - Team roster.
pub async fn list_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(team_id): Path<i64>,
) -> ApiResult<MembersResponse> {
    let role = ctx.require_member(team_id)?;
    let members = state.repo.list_members(team_id).await?;
    success(MembersResponse { members, role })
}

/// PATCH /api/teams/{team_id}/members/{member_id} - Change a member's role.
pub async fn update_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, member_id)): Path<(i64, i64)>,
    payload: Result<Json<UpdateMemberRequest>, JsonRejection>,
) -> ApiResult<TeamMember> {
    ctx.require_manager(team_id, "change roles")?;
    let Json(request) = payload?;
    let role: Role = request.role.parse()?;

    state
        .repo
        .update_member_role(team_id, member_id, role)
        .await?;
    tracing::info!(
        "Member {} of team {} is now {} (by profile {})",
        member_id,
        team_id,
        role,
        ctx.profile_id
    );

    let member = state
        .repo
        .list_members(team_id)
        .await?
        .into_iter()
        .find(|m| m.id == member_id)
        .ok_or_else(|| AppError::NotFound(format!("Member {} not found", member_id)))?;
    success(member)
}

/// DELETE /api/teams/{team_id}/members/{member_id} - Remove a member.
pub async fn delete_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((team_id, member_id)): Path<(i64, i64)>,
) -> ApiResult<Deleted> {
    ctx.require_manager(team_id, "remove members")?;
    state.repo.delete_member(team_id, member_id).await?;
    tracing::info!("Member {} removed from team {}", member_id, team_id);
    deleted()
}
