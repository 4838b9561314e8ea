//! Cookie-carried identity. The cookie only names a user id; it is not
//! signed.

use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use super::{ApiError, AppState};
use crate::catalog::Catalog;
use crate::models::User;

pub const SESSION_COOKIE: &str = "shelf_user";

/// The signed-in user. Rejects with 401 when the cookie is missing,
/// malformed or names no user.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = session_user_id(&parts.headers).ok_or_else(ApiError::unauthorized)?;
        let user = state
            .blocking(move |conn| Catalog::new(conn).user(user_id))
            .await?;
        user.map(CurrentUser).ok_or_else(ApiError::unauthorized)
    }
}

pub fn session_user_id(headers: &HeaderMap) -> Option<i64> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| value.trim().parse().ok())
}

pub fn session_cookie(user_id: i64) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, user_id)
}

pub fn expired_session_cookie() -> String {
    format!("{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax", SESSION_COOKIE)
}
