use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use tracing::info;

use crate::{
    error::AppError,
    store::{Role, User},
    web::{
        AppState,
        auth::{self, AccountRequest},
    },
};

use super::{auth::require_admin_user, types::UserListQuery};

pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Vec<User>>, AppError> {
    require_admin_user(&state, &headers, &jar).await?;

    let roles: Vec<Role> = match query.role.as_deref().map(str::trim) {
        None | Some("") | Some("all") => Vec::new(),
        Some(raw) => vec![
            Role::parse(raw).ok_or_else(|| AppError::validation(format!("Unknown role: {raw}")))?,
        ],
    };

    Ok(Json(state.store().list_users(&roles).await?))
}

/// Admins may create accounts of any role, admin included. Such accounts start verified.
pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(request): Json<AccountRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let admin = require_admin_user(&state, &headers, &jar).await?;

    let mut new_user = auth::build_account(&request, true)?;
    new_user.is_verified = true;
    let user = auth::create_account(&state, new_user).await?;

    info!(user_id = %user.id, role = %user.role, "admin created account");
    state
        .record_activity(
            Some(admin.id()),
            "user_created",
            Some(json!({ "userId": user.id, "role": user.role })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(user)))
}
