use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;

use crate::{
    error::AppError,
    web::{
        AppState,
        auth::{self, AuthUser},
    },
};

pub async fn require_admin_user(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<AuthUser, AppError> {
    let auth_user = auth::authenticate(state, headers, jar).await?;

    if !auth_user.is_admin() {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    Ok(auth_user)
}
