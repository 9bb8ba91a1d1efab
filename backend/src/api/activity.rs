//! Team activity feed.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Extension,
};

use super::{success, ApiResult};
use crate::auth::AuthContext;
use crate::models::{ActivityEntry, ActivityQuery};
use crate::AppState;

/// GET /api/teams/{team_id}/activity - Latest activity, newest first.
pub async fn list_activity(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(team_id): Path<i64>,
    query: Result<Query<ActivityQuery>, QueryRejection>,
) -> ApiResult<Vec<ActivityEntry>> {
    ctx.require_manager(team_id, "view activity")?;
    let Query(query) = query?;
    success(
        state
            .repo
            .list_activity(team_id, query.effective_limit())
            .await?,
    )
}
