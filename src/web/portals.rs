//! Role-scoped portal routes.
//!
//! Every portal is described by a [`PortalAccess`] entry; the router is built
//! from that table and handlers read the entry back through an extension, so
//! the feedback portal is always the one the request arrived on.

use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    chat::{self, MessageDraft},
    error::AppError,
    feedback::{self, FeedbackSubmission},
    reports::{self, ReportQuery, SentimentTally},
    store::{
        ChatMessageView, FeedbackFilter, FeedbackRecord, FeedbackResponse, FeedbackThread, Portal,
        Questionnaire, Role, UserSummary,
    },
    web::{
        AppState,
        auth::{self, AuthUser},
    },
};

/// Whose feedback a portal lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackView {
    /// The caller's own submissions in this portal.
    Own,
    /// Everything submitted to the given portal.
    Reviewing(Portal),
}

#[derive(Debug)]
pub struct PortalAccess {
    pub path: &'static str,
    pub portal: Portal,
    pub roles: &'static [Role],
    pub feedback_view: FeedbackView,
    pub chat_peers: &'static [Role],
    pub sentiment_trends: bool,
}

impl PortalAccess {
    fn responds_to(&self) -> Option<Portal> {
        match self.feedback_view {
            FeedbackView::Reviewing(portal) => Some(portal),
            FeedbackView::Own => None,
        }
    }
}

pub const STUDENT: PortalAccess = PortalAccess {
    path: "/api/student",
    portal: Portal::Student,
    roles: &[Role::Student],
    feedback_view: FeedbackView::Own,
    chat_peers: &[Role::AcademicStaff, Role::NonAcademicStaff],
    sentiment_trends: false,
};

pub const ACADEMIC: PortalAccess = PortalAccess {
    path: "/api/academic",
    portal: Portal::Academic,
    roles: &[Role::AcademicStaff],
    feedback_view: FeedbackView::Reviewing(Portal::Student),
    chat_peers: &[Role::AcademicStaff, Role::NonAcademicStaff, Role::Student],
    sentiment_trends: true,
};

pub const NON_ACADEMIC: PortalAccess = PortalAccess {
    path: "/api/non-academic",
    portal: Portal::NonAcademic,
    roles: &[Role::NonAcademicStaff],
    feedback_view: FeedbackView::Reviewing(Portal::NonAcademic),
    chat_peers: &[Role::AcademicStaff, Role::NonAcademicStaff],
    sentiment_trends: false,
};

pub const ALUMNI: PortalAccess = PortalAccess {
    path: "/api/alumni",
    portal: Portal::Alumni,
    roles: &[Role::Alumni],
    feedback_view: FeedbackView::Own,
    chat_peers: &[Role::AcademicStaff, Role::NonAcademicStaff],
    sentiment_trends: false,
};

pub const PORTALS: &[&PortalAccess] = &[&STUDENT, &ACADEMIC, &NON_ACADEMIC, &ALUMNI];

pub fn router(access: &'static PortalAccess) -> Router<AppState> {
    let mut router = Router::new()
        .route("/feedback", get(list_feedback).post(submit_feedback))
        .route("/chats", get(list_chats).post(send_chat))
        .route("/chat-users", get(chat_users))
        .route("/questionnaires", get(questionnaires));

    if access.responds_to().is_some() {
        router = router.route("/feedback/respond", post(respond_to_feedback));
    }
    if access.sentiment_trends {
        router = router.route("/sentiment-trends", get(sentiment_trends));
    }

    router.layer(Extension(access))
}

async fn enter(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
    access: &PortalAccess,
) -> Result<AuthUser, AppError> {
    let auth = auth::authenticate(state, headers, jar).await?;
    auth::require_role(&auth, access.roles)?;
    Ok(auth)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFeedbackRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub questionnaire_id: Option<Uuid>,
}

async fn submit_feedback(
    State(state): State<AppState>,
    Extension(access): Extension<&'static PortalAccess>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(request): Json<SubmitFeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackRecord>), AppError> {
    let auth = enter(&state, &headers, &jar, access).await?;

    let record = feedback::submit_feedback(
        state.store(),
        state.classifier(),
        FeedbackSubmission {
            author_id: auth.id(),
            content: request.content,
            portal: access.portal,
            questionnaire_id: request.questionnaire_id,
        },
    )
    .await?;

    state
        .record_activity(
            Some(auth.id()),
            "feedback_submitted",
            Some(json!({ "feedbackId": record.id, "portal": record.portal })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_feedback(
    State(state): State<AppState>,
    Extension(access): Extension<&'static PortalAccess>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Vec<FeedbackThread>>, AppError> {
    let auth = enter(&state, &headers, &jar, access).await?;

    let filter = match access.feedback_view {
        FeedbackView::Own => FeedbackFilter {
            portal: Some(access.portal),
            author_id: Some(auth.id()),
            range: query.range()?,
        },
        FeedbackView::Reviewing(portal) => FeedbackFilter {
            portal: Some(portal),
            author_id: None,
            range: query.range()?,
        },
    };

    Ok(Json(feedback::list_feedback(state.store(), &filter).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    pub feedback_id: Uuid,
    #[serde(default)]
    pub response: String,
}

async fn respond_to_feedback(
    State(state): State<AppState>,
    Extension(access): Extension<&'static PortalAccess>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(request): Json<RespondRequest>,
) -> Result<(StatusCode, Json<FeedbackResponse>), AppError> {
    let auth = enter(&state, &headers, &jar, access).await?;

    let response = feedback::respond_to_feedback(
        state.store(),
        request.feedback_id,
        auth.id(),
        &request.response,
        access.responds_to(),
    )
    .await?;

    state
        .record_activity(
            Some(auth.id()),
            "feedback_responded",
            Some(json!({ "feedbackId": response.feedback_id, "responseId": response.id })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct ChatHistoryQuery {
    #[serde(default)]
    pub with: Option<Uuid>,
}

async fn list_chats(
    State(state): State<AppState>,
    Extension(access): Extension<&'static PortalAccess>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<ChatHistoryQuery>,
) -> Result<Json<Vec<ChatMessageView>>, AppError> {
    let auth = enter(&state, &headers, &jar, access).await?;
    Ok(Json(chat::history(state.store(), auth.id(), query.with).await?))
}

/// REST variant of the realtime `sendMessage` event. Same flow, same fan-out.
async fn send_chat(
    State(state): State<AppState>,
    Extension(access): Extension<&'static PortalAccess>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(mut draft): Json<MessageDraft>,
) -> Result<(StatusCode, Json<ChatMessageView>), AppError> {
    let auth = enter(&state, &headers, &jar, access).await?;

    if draft.sender_id.is_none() {
        draft.sender_id = Some(auth.id().to_string());
    }
    let outgoing = draft.validate()?;
    if outgoing.sender_id != auth.id() {
        return Err(AppError::Forbidden(
            "Messages can only be sent as yourself".to_string(),
        ));
    }

    let view =
        chat::send_message(state.store(), state.classifier(), state.hub(), outgoing).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn chat_users(
    State(state): State<AppState>,
    Extension(access): Extension<&'static PortalAccess>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    let auth = enter(&state, &headers, &jar, access).await?;

    let users = state.store().list_users(access.chat_peers).await?;
    Ok(Json(
        users
            .iter()
            .filter(|user| user.id != auth.id())
            .map(UserSummary::from)
            .collect(),
    ))
}

async fn questionnaires(
    State(state): State<AppState>,
    Extension(access): Extension<&'static PortalAccess>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Vec<Questionnaire>>, AppError> {
    enter(&state, &headers, &jar, access).await?;
    Ok(Json(
        state
            .store()
            .list_questionnaires(Some(access.portal))
            .await?,
    ))
}

async fn sentiment_trends(
    State(state): State<AppState>,
    Extension(access): Extension<&'static PortalAccess>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<ReportQuery>,
) -> Result<Json<SentimentTally>, AppError> {
    enter(&state, &headers, &jar, access).await?;
    Ok(Json(
        reports::sentiment_trends(state.store(), query.range()?).await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_paths_are_unique_and_reviewers_respond() {
        let mut paths: Vec<_> = PORTALS.iter().map(|access| access.path).collect();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(paths.len(), PORTALS.len());

        assert_eq!(ACADEMIC.responds_to(), Some(Portal::Student));
        assert_eq!(NON_ACADEMIC.responds_to(), Some(Portal::NonAcademic));
        assert_eq!(STUDENT.responds_to(), None);
    }
}
