use std::collections::HashMap;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ActivityEntry, AuthoredFeedback, ChatFilter, ChatMessage, ChatMessageView, FeedbackFilter,
    FeedbackRecord, FeedbackResponse, FeedbackThread, NewActivity, NewChatMessage, NewFeedback,
    NewFeedbackResponse, NewQuestionnaire, NewUser, Portal, Questionnaire, ReportScope,
    ResponseView, Role, Session, Store, StoreError, User, UserSummary,
};
use crate::sentiment::{Sentiment, SentimentCategory};

/// Process-local store used for development runs and the test suite.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    sessions: HashMap<Uuid, Session>,
    feedback: Vec<FeedbackRecord>,
    responses: Vec<FeedbackResponse>,
    chats: Vec<ChatMessage>,
    questionnaires: Vec<Questionnaire>,
    activities: Vec<ActivityEntry>,
}

impl Tables {
    fn user(&self, id: Uuid) -> Option<&User> {
        self.users.iter().find(|user| user.id == id)
    }

    fn summary(&self, id: Uuid) -> Result<UserSummary> {
        self.user(id)
            .map(UserSummary::from)
            .ok_or_else(|| anyhow!("dangling user reference {id}"))
    }

    fn authored(&self, feedback: &FeedbackRecord) -> Result<AuthoredFeedback> {
        Ok(AuthoredFeedback {
            author: self.summary(feedback.author_id)?,
            feedback: feedback.clone(),
        })
    }

    fn chat_view(&self, message: &ChatMessage) -> Result<ChatMessageView> {
        Ok(ChatMessageView {
            sender: self.summary(message.sender_id)?,
            receiver: self.summary(message.receiver_id)?,
            message: message.clone(),
        })
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `Utc::now()` can repeat on coarse clocks; keep insertion order stable for sorting.
fn next_timestamp(latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match latest {
        Some(latest) if latest >= now => latest + chrono::Duration::microseconds(1),
        _ => now,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.inner.write().await;
        if tables
            .users
            .iter()
            .any(|existing| existing.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::DuplicateEmail);
        }

        let created_at = next_timestamp(tables.users.last().map(|u| u.created_at));
        let record = User {
            id: Uuid::new_v4(),
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            is_verified: user.is_verified,
            last_login_at: None,
            created_at,
        };
        tables.users.push(record.clone());
        Ok(record)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.inner.read().await.user(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.inner.read().await;
        Ok(tables
            .users
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self, roles: &[Role]) -> Result<Vec<User>> {
        let tables = self.inner.read().await;
        Ok(tables
            .users
            .iter()
            .filter(|user| roles.is_empty() || roles.contains(&user.role))
            .cloned()
            .collect())
    }

    async fn has_admin(&self) -> Result<bool> {
        let tables = self.inner.read().await;
        Ok(tables.users.iter().any(|user| user.role == Role::Admin))
    }

    async fn touch_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.inner.write().await;
        if let Some(user) = tables.users.iter_mut().find(|user| user.id == user_id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn create_session(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> Result<Session> {
        let session = Session {
            token: Uuid::new_v4(),
            user_id,
            expires_at,
        };
        self.inner
            .write()
            .await
            .sessions
            .insert(session.token, session.clone());
        Ok(session)
    }

    async fn session_user(&self, token: Uuid) -> Result<Option<User>> {
        let tables = self.inner.read().await;
        let now = Utc::now();
        Ok(tables
            .sessions
            .get(&token)
            .filter(|session| session.expires_at > now)
            .and_then(|session| tables.user(session.user_id))
            .cloned())
    }

    async fn delete_session(&self, token: Uuid) -> Result<()> {
        self.inner.write().await.sessions.remove(&token);
        Ok(())
    }

    async fn insert_feedback(&self, feedback: NewFeedback) -> Result<FeedbackRecord> {
        let mut tables = self.inner.write().await;
        if tables.user(feedback.author_id).is_none() {
            return Err(anyhow!("feedback author {} does not exist", feedback.author_id));
        }

        let created_at = next_timestamp(tables.feedback.last().map(|f| f.created_at));
        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            author_id: feedback.author_id,
            questionnaire_id: feedback.questionnaire_id,
            content: feedback.content,
            sentiment: Some(feedback.sentiment),
            portal: feedback.portal,
            created_at,
        };
        tables.feedback.push(record.clone());
        Ok(record)
    }

    async fn find_feedback(&self, id: Uuid) -> Result<Option<FeedbackRecord>> {
        let tables = self.inner.read().await;
        Ok(tables.feedback.iter().find(|f| f.id == id).cloned())
    }

    async fn list_feedback(&self, filter: &FeedbackFilter) -> Result<Vec<FeedbackThread>> {
        let tables = self.inner.read().await;
        let mut threads = Vec::new();

        for feedback in tables.feedback.iter().filter(|f| {
            filter.portal.is_none_or(|portal| f.portal == portal)
                && filter.author_id.is_none_or(|author| f.author_id == author)
                && filter.range.contains(f.created_at)
        }) {
            let responses = tables
                .responses
                .iter()
                .filter(|response| response.feedback_id == feedback.id)
                .map(|response| {
                    Ok(ResponseView {
                        responder: tables.summary(response.responder_id)?,
                        response: response.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let authored = tables.authored(feedback)?;
            threads.push(FeedbackThread {
                feedback: authored.feedback,
                author: authored.author,
                responses,
            });
        }

        threads.sort_by_key(|thread| thread.feedback.created_at);
        Ok(threads)
    }

    async fn insert_response(&self, response: NewFeedbackResponse) -> Result<FeedbackResponse> {
        let mut tables = self.inner.write().await;
        if !tables.feedback.iter().any(|f| f.id == response.feedback_id) {
            return Err(anyhow!("feedback {} does not exist", response.feedback_id));
        }

        let created_at = next_timestamp(tables.responses.last().map(|r| r.created_at));
        let record = FeedbackResponse {
            id: Uuid::new_v4(),
            feedback_id: response.feedback_id,
            responder_id: response.responder_id,
            response: response.response,
            created_at,
        };
        tables.responses.push(record.clone());
        Ok(record)
    }

    async fn feedback_for_report(&self, scope: &ReportScope) -> Result<Vec<AuthoredFeedback>> {
        let tables = self.inner.read().await;
        tables
            .feedback
            .iter()
            .filter(|f| scope.range.contains(f.created_at))
            .map(|f| tables.authored(f))
            .filter(|item| match (item, scope.role) {
                (Ok(item), Some(role)) => item.author.role == role,
                _ => true,
            })
            .collect()
    }

    async fn backfill_feedback_sentiment(&self, id: Uuid, sentiment: Sentiment) -> Result<bool> {
        let mut tables = self.inner.write().await;
        match tables
            .feedback
            .iter_mut()
            .find(|f| f.id == id && f.sentiment.is_none())
        {
            Some(record) => {
                record.sentiment = Some(sentiment);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_chat(&self, message: NewChatMessage) -> Result<ChatMessage> {
        let mut tables = self.inner.write().await;
        for participant in [message.sender_id, message.receiver_id] {
            if tables.user(participant).is_none() {
                return Err(anyhow!("chat participant {participant} does not exist"));
            }
        }

        let created_at = next_timestamp(tables.chats.last().map(|c| c.created_at));
        let record = ChatMessage {
            id: Uuid::new_v4(),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            message: message.message,
            sentiment: Some(message.sentiment),
            is_moderated: false,
            created_at,
        };
        tables.chats.push(record.clone());
        Ok(record)
    }

    async fn chat_view(&self, id: Uuid) -> Result<Option<ChatMessageView>> {
        let tables = self.inner.read().await;
        tables
            .chats
            .iter()
            .find(|message| message.id == id)
            .map(|message| tables.chat_view(message))
            .transpose()
    }

    async fn list_chats(&self, filter: &ChatFilter) -> Result<Vec<ChatMessageView>> {
        let tables = self.inner.read().await;
        let mut views = tables
            .chats
            .iter()
            .filter(|message| filter.matches(message))
            .map(|message| tables.chat_view(message))
            .collect::<Result<Vec<_>>>()?;
        views.sort_by_key(|view| view.message.created_at);
        Ok(views)
    }

    async fn chats_for_report(&self, scope: &ReportScope) -> Result<Vec<ChatMessageView>> {
        let tables = self.inner.read().await;
        tables
            .chats
            .iter()
            .filter(|message| scope.range.contains(message.created_at))
            .map(|message| tables.chat_view(message))
            .filter(|view| match (view, scope.role) {
                (Ok(view), Some(role)) => view.sender.role == role,
                _ => true,
            })
            .collect()
    }

    async fn backfill_chat_sentiment(
        &self,
        id: Uuid,
        category: SentimentCategory,
    ) -> Result<bool> {
        let mut tables = self.inner.write().await;
        match tables
            .chats
            .iter_mut()
            .find(|message| message.id == id && message.sentiment.is_none())
        {
            Some(message) => {
                message.sentiment = Some(category);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_chat_moderated(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.inner.write().await;
        match tables.chats.iter_mut().find(|message| message.id == id) {
            Some(message) => {
                message.is_moderated = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_questionnaire(&self, questionnaire: NewQuestionnaire) -> Result<Questionnaire> {
        let mut tables = self.inner.write().await;
        let created_at = next_timestamp(tables.questionnaires.last().map(|q| q.created_at));
        let record = Questionnaire {
            id: Uuid::new_v4(),
            title: questionnaire.title,
            questions: questionnaire.questions,
            portal: questionnaire.portal,
            created_at,
        };
        tables.questionnaires.push(record.clone());
        Ok(record)
    }

    async fn find_questionnaire(&self, id: Uuid) -> Result<Option<Questionnaire>> {
        let tables = self.inner.read().await;
        Ok(tables.questionnaires.iter().find(|q| q.id == id).cloned())
    }

    async fn list_questionnaires(&self, portal: Option<Portal>) -> Result<Vec<Questionnaire>> {
        let tables = self.inner.read().await;
        Ok(tables
            .questionnaires
            .iter()
            .filter(|q| portal.is_none_or(|portal| q.portal == portal))
            .cloned()
            .collect())
    }

    async fn record_activity(&self, activity: NewActivity) -> Result<()> {
        let mut tables = self.inner.write().await;
        let user = activity
            .user_id
            .and_then(|id| tables.user(id))
            .map(UserSummary::from);
        let created_at = next_timestamp(tables.activities.last().map(|a| a.created_at));
        tables.activities.push(ActivityEntry {
            id: Uuid::new_v4(),
            user_id: activity.user_id,
            action: activity.action,
            details: activity.details,
            created_at,
            user,
        });
        Ok(())
    }

    async fn list_activities(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        let tables = self.inner.read().await;
        Ok(tables.activities.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Inserts feedback with no sentiment, as rows written before classification existed.
    pub async fn insert_untagged_feedback(
        &self,
        author_id: Uuid,
        content: &str,
        portal: Portal,
    ) -> FeedbackRecord {
        let mut tables = self.inner.write().await;
        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            author_id,
            questionnaire_id: None,
            content: content.to_string(),
            sentiment: None,
            portal,
            created_at: next_timestamp(tables.feedback.last().map(|f| f.created_at)),
        };
        tables.feedback.push(record.clone());
        record
    }

    pub async fn insert_untagged_chat(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        message: &str,
    ) -> ChatMessage {
        let mut tables = self.inner.write().await;
        let record = ChatMessage {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            message: message.to_string(),
            sentiment: None,
            is_moderated: false,
            created_at: next_timestamp(tables.chats.last().map(|c| c.created_at)),
        };
        tables.chats.push(record.clone());
        record
    }
}
