use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::models::SessionUser;
use crate::services::token::{TokenCodec, SESSION_COOKIE};
use crate::AppState;

/// Session middleware.
///
/// Reads the session cookie and, when the token verifies, attaches the
/// session identity to the request. It never rejects on its own: a missing
/// or invalid cookie simply leaves the request unauthenticated and the
/// handler decides what that means.
pub async fn session_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(claims) = TokenCodec::verify(cookie.value(), &state.config.session.secret) {
            request.extensions_mut().insert(SessionUser {
                id: claims.sub,
                email: claims.email,
            });
        }
    }

    next.run(request).await
}
