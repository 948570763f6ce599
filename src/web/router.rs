use axum::{
    Json, Router,
    http::{HeaderValue, Method, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::web::{AppState, ApiMessage, admin, auth, json_error, portals, realtime};

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config().cors_origin);

    let mut router = Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/profile", get(auth::profile))
        .nest("/api/admin", admin::router())
        .route("/ws", get(realtime::connect));

    for access in portals::PORTALS {
        router = router.nest(access.path, portals::router(*access));
    }

    router
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = match HeaderValue::from_str(origin) {
        Ok(value) => AllowOrigin::exact(value),
        Err(err) => {
            warn!(?err, origin, "invalid CORS_ORIGIN, cross-origin requests will be refused");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health() -> impl IntoResponse {
    Json(ApiMessage::new("Reputation hub API is running"))
}

async fn not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "Route not found")
}
