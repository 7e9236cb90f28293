use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::ChallengeStore;
use crate::AppState;

/// Liveness/readiness probe: database and challenge-store connectivity
/// plus the relying-party configuration in effect.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let tables: Result<Vec<(String,)>, sqlx::Error> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(state.db.pool())
            .await;

    let (db_ok, table_names) = match tables {
        Ok(rows) => (true, rows.into_iter().map(|(name,)| name).collect::<Vec<_>>()),
        Err(e) => {
            tracing::error!("Health check database error: {:?}", e);
            (false, Vec::new())
        }
    };

    let store_ok = ChallengeStore::put(&state.db, "health:probe", "ok", 10)
        .await
        .is_ok();

    let healthy = db_ok && store_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    let body = json!({
        "status": if healthy { "ok" } else { "error" },
        "database": { "connected": db_ok, "tables": table_names },
        "challenges": { "connected": store_ok },
        "relyingParty": {
            "rpName": state.config.webauthn.rp_name,
            "rpId": state.config.webauthn.rp_id,
            "origin": state.config.webauthn.rp_origin,
        },
    });

    (status, Json(body))
}
