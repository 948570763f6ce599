mod memory;
mod models;
mod postgres;

pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::sentiment::{Sentiment, SentimentCategory};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email address is already registered")]
    DuplicateEmail,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence for users, sessions, feedback, chat and the admin-facing records.
///
/// Every write targets a single new or existing row; implementations rely on
/// row-level atomicity and need no application locking. The two `backfill_*`
/// writes only apply while the sentiment is still missing, so concurrent
/// reports over the same range cannot clobber each other.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    /// Users holding any of `roles`, oldest first. An empty slice lists everyone.
    async fn list_users(&self, roles: &[Role]) -> Result<Vec<User>>;
    async fn has_admin(&self) -> Result<bool>;
    async fn touch_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn create_session(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> Result<Session>;
    /// The user behind an unexpired session token.
    async fn session_user(&self, token: Uuid) -> Result<Option<User>>;
    async fn delete_session(&self, token: Uuid) -> Result<()>;

    async fn insert_feedback(&self, feedback: NewFeedback) -> Result<FeedbackRecord>;
    async fn find_feedback(&self, id: Uuid) -> Result<Option<FeedbackRecord>>;
    /// Matching feedback ordered by creation time, with author and responses joined.
    async fn list_feedback(&self, filter: &FeedbackFilter) -> Result<Vec<FeedbackThread>>;
    async fn insert_response(&self, response: NewFeedbackResponse) -> Result<FeedbackResponse>;
    async fn feedback_for_report(&self, scope: &ReportScope) -> Result<Vec<AuthoredFeedback>>;
    /// Sets sentiment and score if the record is still untagged. Returns whether a row changed.
    async fn backfill_feedback_sentiment(&self, id: Uuid, sentiment: Sentiment) -> Result<bool>;

    async fn insert_chat(&self, message: NewChatMessage) -> Result<ChatMessage>;
    async fn chat_view(&self, id: Uuid) -> Result<Option<ChatMessageView>>;
    /// Matching messages oldest first.
    async fn list_chats(&self, filter: &ChatFilter) -> Result<Vec<ChatMessageView>>;
    async fn chats_for_report(&self, scope: &ReportScope) -> Result<Vec<ChatMessageView>>;
    async fn backfill_chat_sentiment(&self, id: Uuid, category: SentimentCategory)
    -> Result<bool>;
    async fn set_chat_moderated(&self, id: Uuid) -> Result<bool>;

    async fn insert_questionnaire(&self, questionnaire: NewQuestionnaire) -> Result<Questionnaire>;
    async fn find_questionnaire(&self, id: Uuid) -> Result<Option<Questionnaire>>;
    async fn list_questionnaires(&self, portal: Option<Portal>) -> Result<Vec<Questionnaire>>;

    async fn record_activity(&self, activity: NewActivity) -> Result<()>;
    /// Most recent first.
    async fn list_activities(&self, limit: usize) -> Result<Vec<ActivityEntry>>;
}
