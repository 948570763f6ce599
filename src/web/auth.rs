use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    error::AppError,
    store::{NewUser, Role, StoreError, User},
    web::{ApiMessage, AppState},
};

pub const SESSION_COOKIE: &str = "auth_token";
const MIN_PASSWORD_LEN: usize = 6;

/// The caller behind a valid session token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: Uuid,
}

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<AccountRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let new_user = build_account(&request, false)?;
    let user = create_account(&state, new_user).await?;
    info!(user_id = %user.id, role = %user.role, "account registered");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    let email = normalize_email(&request.email);
    if email.is_empty() || request.password.is_empty() {
        return Err(AppError::validation("Email and password are required"));
    }

    let user = match state.store().find_user_by_email(&email).await? {
        Some(user) if verify_password(&request.password, &user.password_hash) => user,
        _ => return Err(AppError::Unauthorized("Invalid email or password".to_string())),
    };

    let ttl_days = state.config().session_ttl_days;
    let now = Utc::now();
    let session = state
        .store()
        .create_session(user.id, now + ChronoDuration::days(ttl_days))
        .await?;
    state.store().touch_last_login(user.id, now).await?;
    state
        .record_activity(Some(user.id), "login", Some(json!({ "role": user.role })))
        .await;

    let mut cookie = Cookie::new(SESSION_COOKIE, session.token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::days(ttl_days));

    let user = User {
        last_login_at: Some(now),
        ..user
    };
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            token: session.token,
            expires_at: session.expires_at,
            user,
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiMessage>), AppError> {
    let auth = authenticate(&state, &headers, &jar).await?;

    if let Err(err) = state.store().delete_session(auth.token).await {
        error!(?err, "failed to remove session during logout");
    }

    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));

    Ok((jar.remove(removal), Json(ApiMessage::new("Logged out"))))
}

pub async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<User>, AppError> {
    let auth = authenticate(&state, &headers, &jar).await?;
    Ok(Json(auth.user))
}

/// Resolve the caller from a bearer header or the session cookie.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<AuthUser, AppError> {
    authenticate_token(state, session_token(headers, jar, None)).await
}

pub async fn authenticate_token(
    state: &AppState,
    token: Option<Uuid>,
) -> Result<AuthUser, AppError> {
    let token = token.ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

    match state.store().session_user(token).await? {
        Some(user) => Ok(AuthUser { user, token }),
        None => Err(AppError::Unauthorized(
            "Session expired or invalid".to_string(),
        )),
    }
}

/// Token lookup order: `Authorization: Bearer`, the `token` query value, the session cookie.
pub fn session_token(headers: &HeaderMap, jar: &CookieJar, query: Option<&str>) -> Option<Uuid> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token);

    [bearer, query, jar.get(SESSION_COOKIE).map(|cookie| cookie.value())]
        .into_iter()
        .flatten()
        .find_map(|raw| Uuid::parse_str(raw.trim()).ok())
}

pub fn require_role(auth: &AuthUser, allowed: &[Role]) -> Result<(), AppError> {
    if auth.is_admin() || allowed.contains(&auth.role()) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "You do not have access to this resource".to_string(),
        ))
    }
}

/// Validate an account payload and hash its password.
pub(crate) fn build_account(request: &AccountRequest, allow_admin: bool) -> Result<NewUser, AppError> {
    let first_name = request.first_name.trim();
    let last_name = request.last_name.trim();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(AppError::validation("First and last name are required"));
    }

    let email = normalize_email(&request.email);
    if !looks_like_email(&email) {
        return Err(AppError::validation("Please enter a valid email"));
    }

    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }

    let role = request
        .role
        .as_deref()
        .and_then(Role::parse)
        .ok_or_else(|| AppError::validation("Invalid role specified"))?;
    if role == Role::Admin && !allow_admin {
        return Err(AppError::Forbidden(
            "Admin accounts cannot be self-registered".to_string(),
        ));
    }

    let password_hash = hash_password(&request.password)
        .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?;

    Ok(NewUser {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email,
        password_hash,
        role,
        is_verified: false,
    })
}

pub(crate) async fn create_account(state: &AppState, new_user: NewUser) -> Result<User, AppError> {
    match state.store().create_user(new_user).await {
        Ok(user) => Ok(user),
        Err(StoreError::DuplicateEmail) => {
            Err(AppError::Conflict("Email is already registered".to_string()))
        }
        Err(StoreError::Backend(err)) => Err(AppError::Persistence(err)),
    }
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}
