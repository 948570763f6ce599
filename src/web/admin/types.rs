use serde::Deserialize;
use uuid::Uuid;

use crate::store::QuestionDefinition;

pub const DEFAULT_ACTIVITY_LIMIT: usize = 100;
pub const MAX_ACTIVITY_LIMIT: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackListQuery {
    pub portal: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListQuery {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

impl ActivityQuery {
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
            .clamp(1, MAX_ACTIVITY_LIMIT)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateQuestionnaireRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub questions: Vec<QuestionDefinition>,
    #[serde(default)]
    pub portal: Option<String>,
}
