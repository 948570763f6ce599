use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, postgres::PgPoolOptions, types::Json};
use uuid::Uuid;

use super::{
    ActivityEntry, AuthoredFeedback, ChatFilter, ChatMessage, ChatMessageView, FeedbackFilter,
    FeedbackRecord, FeedbackResponse, FeedbackThread, NewActivity, NewChatMessage, NewFeedback,
    NewFeedbackResponse, NewQuestionnaire, NewUser, Portal, QuestionDefinition, Questionnaire,
    ReportScope, ResponseView, Role, Session, Store, StoreError, User, UserSummary,
};
use crate::sentiment::{Sentiment, SentimentCategory};

const USER_COLUMNS: &str = "id, first_name, last_name, email, password_hash, role, is_verified, last_login_at, created_at";

const FEEDBACK_SELECT: &str = "SELECT f.id, f.user_id, f.questionnaire_id, f.content, f.sentiment, f.score, f.portal, f.created_at, \
            u.first_name AS author_first_name, u.last_name AS author_last_name, u.role AS author_role \
     FROM feedback f JOIN users u ON u.id = f.user_id";

const CHAT_SELECT: &str = "SELECT c.id, c.sender_id, c.receiver_id, c.message, c.sentiment, c.is_moderated, c.created_at, \
            s.first_name AS sender_first_name, s.last_name AS sender_last_name, s.role AS sender_role, \
            r.first_name AS receiver_first_name, r.last_name AS receiver_last_name, r.role AS receiver_role \
     FROM chat_messages c \
     JOIN users s ON s.id = c.sender_id \
     JOIN users r ON r.id = c.receiver_id";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        Ok(Self { pool })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    password_hash: String,
    role: String,
    is_verified: bool,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            password_hash: row.password_hash,
            role: parse_role(&row.role)?,
            is_verified: row.is_verified,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct FeedbackRow {
    id: Uuid,
    user_id: Uuid,
    questionnaire_id: Option<Uuid>,
    content: String,
    sentiment: Option<String>,
    score: Option<f64>,
    portal: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<FeedbackRow> for FeedbackRecord {
    type Error = anyhow::Error;

    fn try_from(row: FeedbackRow) -> Result<Self> {
        Ok(FeedbackRecord {
            id: row.id,
            author_id: row.user_id,
            questionnaire_id: row.questionnaire_id,
            content: row.content,
            sentiment: parse_sentiment(row.sentiment.as_deref(), row.score)?,
            portal: parse_portal(&row.portal)?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct AuthoredFeedbackRow {
    #[sqlx(flatten)]
    feedback: FeedbackRow,
    author_first_name: String,
    author_last_name: String,
    author_role: String,
}

impl TryFrom<AuthoredFeedbackRow> for AuthoredFeedback {
    type Error = anyhow::Error;

    fn try_from(row: AuthoredFeedbackRow) -> Result<Self> {
        let author = UserSummary {
            id: row.feedback.user_id,
            first_name: row.author_first_name,
            last_name: row.author_last_name,
            role: parse_role(&row.author_role)?,
        };
        Ok(AuthoredFeedback {
            feedback: row.feedback.try_into()?,
            author,
        })
    }
}

#[derive(FromRow)]
struct ResponseRow {
    id: Uuid,
    feedback_id: Uuid,
    responder_id: Uuid,
    response: String,
    created_at: DateTime<Utc>,
    responder_first_name: String,
    responder_last_name: String,
    responder_role: String,
}

impl TryFrom<ResponseRow> for ResponseView {
    type Error = anyhow::Error;

    fn try_from(row: ResponseRow) -> Result<Self> {
        Ok(ResponseView {
            responder: UserSummary {
                id: row.responder_id,
                first_name: row.responder_first_name,
                last_name: row.responder_last_name,
                role: parse_role(&row.responder_role)?,
            },
            response: FeedbackResponse {
                id: row.id,
                feedback_id: row.feedback_id,
                responder_id: row.responder_id,
                response: row.response,
                created_at: row.created_at,
            },
        })
    }
}

#[derive(FromRow)]
struct ChatRow {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    message: String,
    sentiment: Option<String>,
    is_moderated: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChatRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(row: ChatRow) -> Result<Self> {
        Ok(ChatMessage {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            message: row.message,
            sentiment: row.sentiment.as_deref().map(parse_category).transpose()?,
            is_moderated: row.is_moderated,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ChatViewRow {
    #[sqlx(flatten)]
    chat: ChatRow,
    sender_first_name: String,
    sender_last_name: String,
    sender_role: String,
    receiver_first_name: String,
    receiver_last_name: String,
    receiver_role: String,
}

impl TryFrom<ChatViewRow> for ChatMessageView {
    type Error = anyhow::Error;

    fn try_from(row: ChatViewRow) -> Result<Self> {
        let sender = UserSummary {
            id: row.chat.sender_id,
            first_name: row.sender_first_name,
            last_name: row.sender_last_name,
            role: parse_role(&row.sender_role)?,
        };
        let receiver = UserSummary {
            id: row.chat.receiver_id,
            first_name: row.receiver_first_name,
            last_name: row.receiver_last_name,
            role: parse_role(&row.receiver_role)?,
        };
        Ok(ChatMessageView {
            message: row.chat.try_into()?,
            sender,
            receiver,
        })
    }
}

#[derive(FromRow)]
struct QuestionnaireRow {
    id: Uuid,
    title: String,
    questions: Json<Vec<QuestionDefinition>>,
    portal: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<QuestionnaireRow> for Questionnaire {
    type Error = anyhow::Error;

    fn try_from(row: QuestionnaireRow) -> Result<Self> {
        Ok(Questionnaire {
            id: row.id,
            title: row.title,
            questions: row.questions.0,
            portal: parse_portal(&row.portal)?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ActivityRow {
    id: Uuid,
    user_id: Option<Uuid>,
    action: String,
    details: Option<Value>,
    created_at: DateTime<Utc>,
    first_name: Option<String>,
    last_name: Option<String>,
    role: Option<String>,
}

impl TryFrom<ActivityRow> for ActivityEntry {
    type Error = anyhow::Error;

    fn try_from(row: ActivityRow) -> Result<Self> {
        let user = match (row.user_id, row.first_name, row.last_name, row.role) {
            (Some(id), Some(first_name), Some(last_name), Some(role)) => Some(UserSummary {
                id,
                first_name,
                last_name,
                role: parse_role(&role)?,
            }),
            _ => None,
        };
        Ok(ActivityEntry {
            id: row.id,
            user_id: row.user_id,
            action: row.action,
            details: row.details,
            created_at: row.created_at,
            user,
        })
    }
}

fn parse_role(value: &str) -> Result<Role> {
    Role::parse(value).ok_or_else(|| anyhow!("unknown role stored: {value}"))
}

fn parse_portal(value: &str) -> Result<Portal> {
    Portal::parse(value).ok_or_else(|| anyhow!("unknown portal stored: {value}"))
}

fn parse_category(value: &str) -> Result<SentimentCategory> {
    SentimentCategory::parse(value).ok_or_else(|| anyhow!("unknown sentiment stored: {value}"))
}

fn parse_sentiment(category: Option<&str>, score: Option<f64>) -> Result<Option<Sentiment>> {
    match (category, score) {
        (Some(category), Some(score)) => Ok(Some(Sentiment {
            category: parse_category(category)?,
            score,
        })),
        _ => Ok(None),
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = anyhow::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let result = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, first_name, last_name, email, password_hash, role, is_verified) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.is_verified)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.try_into()?),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Err(StoreError::DuplicateEmail)
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to insert user")
                .into()),
        }
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch user")?
            .map(User::try_from)
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch user by email")?
        .map(User::try_from)
        .transpose()
    }

    async fn list_users(&self, roles: &[Role]) -> Result<Vec<User>> {
        let roles: Vec<&str> = roles.iter().map(Role::as_str).collect();
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE cardinality($1::text[]) = 0 OR role = ANY($1) \
             ORDER BY created_at, id"
        ))
        .bind(&roles)
        .fetch_all(&self.pool)
        .await
        .context("failed to list users")?;

        convert_all(rows)
    }

    async fn has_admin(&self) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE role = 'admin')")
            .fetch_one(&self.pool)
            .await
            .context("failed to verify admin presence")
    }

    async fn touch_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .context("failed to update last login")?;
        Ok(())
    }

    async fn create_session(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> Result<Session> {
        let token = Uuid::new_v4();
        sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .context("failed to create session")?;

        Ok(Session {
            token,
            user_id,
            expires_at,
        })
    }

    async fn session_user(&self, token: Uuid) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT users.id, users.first_name, users.last_name, users.email, users.password_hash, \
                    users.role, users.is_verified, users.last_login_at, users.created_at \
             FROM sessions JOIN users ON users.id = sessions.user_id \
             WHERE sessions.id = $1 AND sessions.expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("failed to resolve session")?
        .map(User::try_from)
        .transpose()
    }

    async fn delete_session(&self, token: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn insert_feedback(&self, feedback: NewFeedback) -> Result<FeedbackRecord> {
        sqlx::query_as::<_, FeedbackRow>(
            "INSERT INTO feedback (id, user_id, questionnaire_id, content, sentiment, score, portal) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, user_id, questionnaire_id, content, sentiment, score, portal, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(feedback.author_id)
        .bind(feedback.questionnaire_id)
        .bind(&feedback.content)
        .bind(feedback.sentiment.category.as_str())
        .bind(feedback.sentiment.score)
        .bind(feedback.portal.as_str())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert feedback")?
        .try_into()
    }

    async fn find_feedback(&self, id: Uuid) -> Result<Option<FeedbackRecord>> {
        sqlx::query_as::<_, FeedbackRow>(
            "SELECT id, user_id, questionnaire_id, content, sentiment, score, portal, created_at \
             FROM feedback WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch feedback")?
        .map(FeedbackRecord::try_from)
        .transpose()
    }

    async fn list_feedback(&self, filter: &FeedbackFilter) -> Result<Vec<FeedbackThread>> {
        let rows = sqlx::query_as::<_, AuthoredFeedbackRow>(&format!(
            "{FEEDBACK_SELECT} \
             WHERE ($1::text IS NULL OR f.portal = $1) \
               AND ($2::uuid IS NULL OR f.user_id = $2) \
               AND ($3::timestamptz IS NULL OR f.created_at >= $3) \
               AND ($4::timestamptz IS NULL OR f.created_at <= $4) \
             ORDER BY f.created_at, f.id"
        ))
        .bind(filter.portal.map(|portal| portal.as_str()))
        .bind(filter.author_id)
        .bind(filter.range.start)
        .bind(filter.range.end)
        .fetch_all(&self.pool)
        .await
        .context("failed to list feedback")?;

        let authored: Vec<AuthoredFeedback> = convert_all(rows)?;
        let ids: Vec<Uuid> = authored.iter().map(|item| item.feedback.id).collect();

        let response_rows = sqlx::query_as::<_, ResponseRow>(
            "SELECT r.id, r.feedback_id, r.responder_id, r.response, r.created_at, \
                    u.first_name AS responder_first_name, u.last_name AS responder_last_name, \
                    u.role AS responder_role \
             FROM feedback_responses r JOIN users u ON u.id = r.responder_id \
             WHERE r.feedback_id = ANY($1) \
             ORDER BY r.created_at, r.id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .context("failed to load feedback responses")?;

        let mut responses: HashMap<Uuid, Vec<ResponseView>> = HashMap::new();
        for row in response_rows {
            let view = ResponseView::try_from(row)?;
            responses
                .entry(view.response.feedback_id)
                .or_default()
                .push(view);
        }

        Ok(authored
            .into_iter()
            .map(|item| FeedbackThread {
                responses: responses.remove(&item.feedback.id).unwrap_or_default(),
                feedback: item.feedback,
                author: item.author,
            })
            .collect())
    }

    async fn insert_response(&self, response: NewFeedbackResponse) -> Result<FeedbackResponse> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, Uuid, String, DateTime<Utc>)>(
            "INSERT INTO feedback_responses (id, feedback_id, responder_id, response) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, feedback_id, responder_id, response, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(response.feedback_id)
        .bind(response.responder_id)
        .bind(&response.response)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert feedback response")?;

        Ok(FeedbackResponse {
            id: row.0,
            feedback_id: row.1,
            responder_id: row.2,
            response: row.3,
            created_at: row.4,
        })
    }

    async fn feedback_for_report(&self, scope: &ReportScope) -> Result<Vec<AuthoredFeedback>> {
        let rows = sqlx::query_as::<_, AuthoredFeedbackRow>(&format!(
            "{FEEDBACK_SELECT} \
             WHERE ($1::timestamptz IS NULL OR f.created_at >= $1) \
               AND ($2::timestamptz IS NULL OR f.created_at <= $2) \
               AND ($3::text IS NULL OR u.role = $3) \
             ORDER BY f.created_at, f.id"
        ))
        .bind(scope.range.start)
        .bind(scope.range.end)
        .bind(scope.role.map(|role| role.as_str()))
        .fetch_all(&self.pool)
        .await
        .context("failed to load feedback for report")?;

        convert_all(rows)
    }

    async fn backfill_feedback_sentiment(&self, id: Uuid, sentiment: Sentiment) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE feedback SET sentiment = $2, score = $3 WHERE id = $1 AND sentiment IS NULL",
        )
        .bind(id)
        .bind(sentiment.category.as_str())
        .bind(sentiment.score)
        .execute(&self.pool)
        .await
        .context("failed to backfill feedback sentiment")?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_chat(&self, message: NewChatMessage) -> Result<ChatMessage> {
        sqlx::query_as::<_, ChatRow>(
            "INSERT INTO chat_messages (id, sender_id, receiver_id, message, sentiment) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, sender_id, receiver_id, message, sentiment, is_moderated, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.message)
        .bind(message.sentiment.as_str())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert chat message")?
        .try_into()
    }

    async fn chat_view(&self, id: Uuid) -> Result<Option<ChatMessageView>> {
        sqlx::query_as::<_, ChatViewRow>(&format!("{CHAT_SELECT} WHERE c.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch chat message")?
            .map(ChatMessageView::try_from)
            .transpose()
    }

    async fn list_chats(&self, filter: &ChatFilter) -> Result<Vec<ChatMessageView>> {
        let rows = sqlx::query_as::<_, ChatViewRow>(&format!(
            "{CHAT_SELECT} \
             WHERE ($1::uuid IS NULL OR c.sender_id = $1 OR c.receiver_id = $1) \
               AND ($2::uuid IS NULL OR c.sender_id = $2 OR c.receiver_id = $2) \
             ORDER BY c.created_at, c.id"
        ))
        .bind(filter.participant)
        .bind(filter.peer)
        .fetch_all(&self.pool)
        .await
        .context("failed to list chat messages")?;

        convert_all(rows)
    }

    async fn chats_for_report(&self, scope: &ReportScope) -> Result<Vec<ChatMessageView>> {
        let rows = sqlx::query_as::<_, ChatViewRow>(&format!(
            "{CHAT_SELECT} \
             WHERE ($1::timestamptz IS NULL OR c.created_at >= $1) \
               AND ($2::timestamptz IS NULL OR c.created_at <= $2) \
               AND ($3::text IS NULL OR s.role = $3) \
             ORDER BY c.created_at, c.id"
        ))
        .bind(scope.range.start)
        .bind(scope.range.end)
        .bind(scope.role.map(|role| role.as_str()))
        .fetch_all(&self.pool)
        .await
        .context("failed to load chat messages for report")?;

        convert_all(rows)
    }

    async fn backfill_chat_sentiment(
        &self,
        id: Uuid,
        category: SentimentCategory,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE chat_messages SET sentiment = $2 WHERE id = $1 AND sentiment IS NULL",
        )
        .bind(id)
        .bind(category.as_str())
        .execute(&self.pool)
        .await
        .context("failed to backfill chat sentiment")?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_chat_moderated(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE chat_messages SET is_moderated = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to moderate chat message")?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_questionnaire(&self, questionnaire: NewQuestionnaire) -> Result<Questionnaire> {
        sqlx::query_as::<_, QuestionnaireRow>(
            "INSERT INTO questionnaires (id, title, questions, portal) VALUES ($1, $2, $3, $4) \
             RETURNING id, title, questions, portal, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&questionnaire.title)
        .bind(Json(&questionnaire.questions))
        .bind(questionnaire.portal.as_str())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert questionnaire")?
        .try_into()
    }

    async fn find_questionnaire(&self, id: Uuid) -> Result<Option<Questionnaire>> {
        sqlx::query_as::<_, QuestionnaireRow>(
            "SELECT id, title, questions, portal, created_at FROM questionnaires WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch questionnaire")?
        .map(Questionnaire::try_from)
        .transpose()
    }

    async fn list_questionnaires(&self, portal: Option<Portal>) -> Result<Vec<Questionnaire>> {
        let rows = sqlx::query_as::<_, QuestionnaireRow>(
            "SELECT id, title, questions, portal, created_at FROM questionnaires \
             WHERE ($1::text IS NULL OR portal = $1) \
             ORDER BY created_at, id",
        )
        .bind(portal.map(|portal| portal.as_str()))
        .fetch_all(&self.pool)
        .await
        .context("failed to list questionnaires")?;

        convert_all(rows)
    }

    async fn record_activity(&self, activity: NewActivity) -> Result<()> {
        sqlx::query(
            "INSERT INTO activity_logs (id, user_id, action, details) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(activity.user_id)
        .bind(&activity.action)
        .bind(activity.details)
        .execute(&self.pool)
        .await
        .context("failed to record activity")?;
        Ok(())
    }

    async fn list_activities(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            "SELECT a.id, a.user_id, a.action, a.details, a.created_at, \
                    u.first_name, u.last_name, u.role \
             FROM activity_logs a LEFT JOIN users u ON u.id = a.user_id \
             ORDER BY a.created_at DESC, a.id \
             LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to list activity logs")?;

        convert_all(rows)
    }
}
