use axum::{extract::State, http::header, http::HeaderMap, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use webauthn_rs::prelude::*;

use crate::error::{AppError, Result};
use crate::services::{PasskeyService, TokenCodec};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRegisterRequest {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRegisterResponse {
    pub options: CreationChallengeResponse,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRegisterRequest {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub credential: Option<serde_json::Value>,
    pub local_data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRegisterResponse {
    pub success: bool,
    pub user_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartLoginRequest {
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLoginResponse {
    pub options: RequestChallengeResponse,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishLoginRequest {
    pub session_id: Option<String>,
    pub credential: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishLoginResponse {
    pub success: bool,
    pub user_id: String,
    pub name: String,
    pub user_data: Option<serde_json::Value>,
}

fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn start_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartRegisterRequest>,
) -> Result<Json<StartRegisterResponse>> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Name is required".to_string()));
    }
    let email = normalize(req.email);

    let (options, user_id) = PasskeyService::start_register(
        &state.db,
        &state.config,
        request_origin(&headers),
        name,
        email.as_deref(),
    )
    .await?;

    Ok(Json(StartRegisterResponse { options, user_id }))
}

pub async fn finish_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FinishRegisterRequest>,
) -> Result<Json<FinishRegisterResponse>> {
    // The name captured at ceremony start is what gets persisted; the echo
    // here is only validated for shape
    let (user_id, credential) = match (req.user_id, req.name.as_deref(), req.credential) {
        (Some(user_id), Some(name), Some(credential))
            if !user_id.is_empty() && !name.trim().is_empty() =>
        {
            (user_id, credential)
        }
        _ => return Err(AppError::BadRequest("Missing required fields".to_string())),
    };

    PasskeyService::finish_register(
        &state.db,
        &state.config,
        request_origin(&headers),
        &user_id,
        &credential,
        req.local_data.as_ref(),
    )
    .await?;

    Ok(Json(FinishRegisterResponse {
        success: true,
        user_id,
    }))
}

pub async fn start_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<StartLoginRequest>>,
) -> Result<Json<StartLoginResponse>> {
    let email = normalize(payload.and_then(|Json(req)| req.email));

    let (options, session_id) = PasskeyService::start_login(
        &state.db,
        &state.config,
        request_origin(&headers),
        email.as_deref(),
    )
    .await?;

    Ok(Json(StartLoginResponse { options, session_id }))
}

pub async fn finish_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FinishLoginRequest>,
) -> Result<impl IntoResponse> {
    let (session_id, credential) = match (req.session_id, req.credential) {
        (Some(session_id), Some(credential)) if !session_id.is_empty() => (session_id, credential),
        _ => {
            return Err(AppError::BadRequest(
                "Credential and session ID are required".to_string(),
            ))
        }
    };

    let outcome = PasskeyService::finish_login(
        &state.db,
        &state.config,
        request_origin(&headers),
        &session_id,
        &credential,
    )
    .await?;

    let jar = CookieJar::new().add(TokenCodec::session_cookie(
        outcome.token,
        state.config.session.ttl_secs,
        state.config.session.cookie_secure,
    ));

    Ok((
        jar,
        Json(FinishLoginResponse {
            success: true,
            user_id: outcome.user.id,
            name: outcome.user.name,
            user_data: outcome.user_data,
        }),
    ))
}
