use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    feedback,
    store::{ActivityEntry, ChatFilter, ChatMessageView, DateRange, FeedbackFilter, FeedbackThread, Portal},
    reports::ReportQuery,
    web::AppState,
};

use super::{
    auth::require_admin_user,
    types::{ActivityQuery, ChatListQuery, FeedbackListQuery},
};

pub async fn list_feedbacks(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<FeedbackListQuery>,
) -> Result<Json<Vec<FeedbackThread>>, AppError> {
    require_admin_user(&state, &headers, &jar).await?;

    let portal = match query.portal.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(
            Portal::parse(raw).ok_or_else(|| AppError::validation(format!("Unknown portal: {raw}")))?,
        ),
    };
    let range: DateRange = ReportQuery {
        start_date: query.start_date,
        end_date: query.end_date,
        role: None,
    }
    .range()?;

    let filter = FeedbackFilter {
        portal,
        author_id: None,
        range,
    };
    Ok(Json(feedback::list_feedback(state.store(), &filter).await?))
}

pub async fn list_chats(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<ChatListQuery>,
) -> Result<Json<Vec<ChatMessageView>>, AppError> {
    require_admin_user(&state, &headers, &jar).await?;

    let filter = ChatFilter {
        participant: query.user_id,
        peer: None,
    };
    Ok(Json(state.store().list_chats(&filter).await?))
}

pub async fn moderate_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(message_id): Path<Uuid>,
) -> Result<Json<ChatMessageView>, AppError> {
    let admin = require_admin_user(&state, &headers, &jar).await?;

    if !state.store().set_chat_moderated(message_id).await? {
        return Err(AppError::not_found("Chat message not found"));
    }

    state
        .record_activity(
            Some(admin.id()),
            "chat_moderated",
            Some(json!({ "chatId": message_id })),
        )
        .await;

    let view = state
        .store()
        .chat_view(message_id)
        .await?
        .ok_or_else(|| AppError::not_found("Chat message not found"))?;
    Ok(Json(view))
}

pub async fn list_activities(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntry>>, AppError> {
    require_admin_user(&state, &headers, &jar).await?;
    Ok(Json(state.store().list_activities(query.limit()).await?))
}
