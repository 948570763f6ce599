use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::info;

use crate::{
    error::AppError,
    reports::{self, ReportQuery, SentimentReport},
    web::AppState,
};

use super::auth::require_admin_user;

/// Backfills missing tags in scope, then tallies feedback and chat together.
pub async fn sentiment_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<ReportQuery>,
) -> Result<Json<SentimentReport>, AppError> {
    require_admin_user(&state, &headers, &jar).await?;

    let scope = query.scope()?;
    let report = reports::generate_report(state.store(), state.classifier(), &scope).await?;

    info!(
        positive = report.tally.positive,
        negative = report.tally.negative,
        neutral = report.tally.neutral,
        role = ?scope.role,
        "sentiment report generated"
    );
    Ok(Json(report))
}
