use axum::{extract::State, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::services::{TokenCodec, UserService};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Clear the session cookie. Sessions are stateless, so there is nothing
/// to revoke server-side.
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let jar = CookieJar::new().add(TokenCodec::clear_cookie(state.config.session.cookie_secure));
    (jar, Json(SuccessResponse { success: true }))
}

pub async fn delete_account(
    State(state): State<AppState>,
    Json(req): Json<DeleteAccountRequest>,
) -> Result<Json<SuccessResponse>> {
    let user_id = req
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("User ID is required".to_string()))?;

    UserService::delete_account(&state.db, &user_id).await?;

    Ok(Json(SuccessResponse { success: true }))
}
