use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;

use crate::{
    error::AppError,
    store::{NewQuestionnaire, Portal, QuestionDefinition, Questionnaire},
    web::AppState,
};

use super::{auth::require_admin_user, types::CreateQuestionnaireRequest};

pub async fn list_questionnaires(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Vec<Questionnaire>>, AppError> {
    require_admin_user(&state, &headers, &jar).await?;
    Ok(Json(state.store().list_questionnaires(None).await?))
}

pub async fn create_questionnaire(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(request): Json<CreateQuestionnaireRequest>,
) -> Result<(StatusCode, Json<Questionnaire>), AppError> {
    let admin = require_admin_user(&state, &headers, &jar).await?;

    let questionnaire = state
        .store()
        .insert_questionnaire(validate_questionnaire(request)?)
        .await?;

    state
        .record_activity(
            Some(admin.id()),
            "questionnaire_created",
            Some(json!({ "questionnaireId": questionnaire.id, "portal": questionnaire.portal })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(questionnaire)))
}

fn validate_questionnaire(request: CreateQuestionnaireRequest) -> Result<NewQuestionnaire, AppError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(AppError::validation("Questionnaire title is required"));
    }

    let portal = request
        .portal
        .as_deref()
        .and_then(Portal::parse)
        .ok_or_else(|| AppError::validation("A valid portal is required"))?;

    if request.questions.is_empty() {
        return Err(AppError::validation("At least one question is required"));
    }

    let mut questions = Vec::with_capacity(request.questions.len());
    for question in request.questions {
        let text = question.text.trim();
        if text.is_empty() {
            return Err(AppError::validation("Question text is required"));
        }
        let kind = match question.kind.trim() {
            "" => "text".to_string(),
            kind => kind.to_string(),
        };
        questions.push(QuestionDefinition {
            text: text.to_string(),
            kind,
        });
    }

    Ok(NewQuestionnaire {
        title: title.to_string(),
        questions,
        portal,
    })
}
