use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::SessionUser;
use crate::services::SyncService;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub data: Option<serde_json::Value>,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub success: bool,
    pub updated_at: i64,
}

/// The user a sync call operates on: the session identity when present,
/// or an explicit `?userId=` in the token-less deployment variant.
fn resolve_user_id(
    state: &AppState,
    session: Option<SessionUser>,
    query_user_id: Option<String>,
) -> Result<String> {
    if let Some(session) = session {
        return Ok(session.id);
    }
    if !state.config.sync.require_session_token {
        if let Some(user_id) = query_user_id.filter(|id| !id.is_empty()) {
            return Ok(user_id);
        }
    }
    Err(AppError::Unauthorized("Missing or invalid session".to_string()))
}

pub async fn pull_data(
    State(state): State<AppState>,
    session: Option<Extension<SessionUser>>,
    Query(query): Query<SyncQuery>,
) -> Result<Json<PullResponse>> {
    let user_id = resolve_user_id(&state, session.map(|Extension(u)| u), query.user_id)?;

    let (data, updated_at) = SyncService::pull(&state.db, &user_id).await?;
    Ok(Json(PullResponse { data, updated_at }))
}

pub async fn push_data(
    State(state): State<AppState>,
    session: Option<Extension<SessionUser>>,
    Query(query): Query<SyncQuery>,
    Json(document): Json<serde_json::Value>,
) -> Result<Json<PushResponse>> {
    let user_id = resolve_user_id(&state, session.map(|Extension(u)| u), query.user_id)?;

    let updated_at = SyncService::push(&state.db, &user_id, &document).await?;
    Ok(Json(PushResponse {
        success: true,
        updated_at,
    }))
}
