//! Shared-password login and logout.

use super::extractors::{Authenticated, FormFields, SESSION_COOKIE};
use crate::{errors::AppError, state::AppState};
use axum::{Json, extract::State};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::{Value, json};

/// `POST /login`: exchange the shared password for a session cookie.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    fields: FormFields,
) -> Result<(CookieJar, Json<Value>), AppError> {
    let password = fields.get("password").unwrap_or_default();
    let token = state
        .sessions
        .login(password)
        .ok_or_else(|| AppError::unauthorized("incorrect password"))?;

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    Ok((
        jar.add(cookie),
        Json(json!({ "success": true, "message": "authenticated" })),
    ))
}

/// `POST /logout`: end the caller's session.
pub async fn logout(
    State(state): State<AppState>,
    auth: Authenticated,
    jar: CookieJar,
) -> (CookieJar, Json<Value>) {
    state.sessions.logout(&auth.token);
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Json(json!({ "success": true, "message": "logged out" })),
    )
}
