use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::sentiment::{Sentiment, SentimentCategory};

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value.trim() {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let value = String::deserialize(deserializer)?;
                $name::parse(&value).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        value
                    ))
                })
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Student,
    AcademicStaff,
    NonAcademicStaff,
    Alumni,
    Community,
    Admin,
}

string_enum!(Role {
    Student => "student",
    AcademicStaff => "academic_staff",
    NonAcademicStaff => "non_academic_staff",
    Alumni => "alumni",
    Community => "community",
    Admin => "admin",
});

/// Feedback partition. Admin is a portal for routing but never tags feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Portal {
    Student,
    Academic,
    NonAcademic,
    Alumni,
}

string_enum!(Portal {
    Student => "student",
    Academic => "academic",
    NonAcademic => "non_academic",
    Alumni => "alumni",
});

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub is_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Display attributes carried alongside records so clients can render without a second lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_verified: bool,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A feedback submission. `sentiment` carries category and score together.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub author_id: Uuid,
    pub questionnaire_id: Option<Uuid>,
    pub content: String,
    pub sentiment: Option<Sentiment>,
    pub portal: Portal,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackWire<'a> {
    id: Uuid,
    user_id: Uuid,
    questionnaire_id: Option<Uuid>,
    content: &'a str,
    sentiment: Option<SentimentCategory>,
    score: Option<f64>,
    portal: Portal,
    created_at: DateTime<Utc>,
}

impl Serialize for FeedbackRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        FeedbackWire {
            id: self.id,
            user_id: self.author_id,
            questionnaire_id: self.questionnaire_id,
            content: &self.content,
            sentiment: self.sentiment.map(|s| s.category),
            score: self.sentiment.map(|s| s.score),
            portal: self.portal,
            created_at: self.created_at,
        }
        .serialize(serializer)
    }
}

/// Insert payload. A sentiment is mandatory: records are classified before they are stored.
#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub author_id: Uuid,
    pub questionnaire_id: Option<Uuid>,
    pub content: String,
    pub sentiment: Sentiment,
    pub portal: Portal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    pub id: Uuid,
    pub feedback_id: Uuid,
    pub responder_id: Uuid,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeedbackResponse {
    pub feedback_id: Uuid,
    pub responder_id: Uuid,
    pub response: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseView {
    #[serde(flatten)]
    pub response: FeedbackResponse,
    pub responder: UserSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthoredFeedback {
    #[serde(flatten)]
    pub feedback: FeedbackRecord,
    pub author: UserSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackThread {
    #[serde(flatten)]
    pub feedback: FeedbackRecord,
    pub author: UserSummary,
    pub responses: Vec<ResponseView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub message: String,
    pub sentiment: Option<SentimentCategory>,
    pub is_moderated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub message: String,
    pub sentiment: SentimentCategory,
}

/// Chat message joined with both participants; this is the realtime wire payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessageView {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub sender: UserSummary,
    pub receiver: UserSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDefinition {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Questionnaire {
    pub id: Uuid,
    pub title: String,
    pub questions: Vec<QuestionDefinition>,
    pub portal: Portal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewQuestionnaire {
    pub title: String,
    pub questions: Vec<QuestionDefinition>,
    pub portal: Portal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub user: Option<UserSummary>,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub details: Option<Value>,
}

/// Inclusive creation-time window; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Whole calendar days: `start` at 00:00:00.000, `end` at 23:59:59.999 (UTC).
    pub fn from_days(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
        Self {
            start: start.map(|day| day.and_time(NaiveTime::MIN).and_utc()),
            end: end.map(|day| day.and_time(end_of_day).and_utc()),
        }
    }

    pub fn is_inverted(&self) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if start > end)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| at >= start) && self.end.is_none_or(|end| at <= end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackFilter {
    pub portal: Option<Portal>,
    pub author_id: Option<Uuid>,
    pub range: DateRange,
}

#[derive(Debug, Clone, Default)]
pub struct ChatFilter {
    /// Messages sent or received by this user; `None` lists everything.
    pub participant: Option<Uuid>,
    /// Narrow to the conversation between `participant` and `peer`.
    pub peer: Option<Uuid>,
}

impl ChatFilter {
    pub fn matches(&self, message: &ChatMessage) -> bool {
        let involves = |user: Uuid| message.sender_id == user || message.receiver_id == user;
        self.participant.is_none_or(involves) && self.peer.is_none_or(involves)
    }
}

/// Records considered by a sentiment report.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportScope {
    pub range: DateRange,
    /// Role of the feedback author or chat sender.
    pub role: Option<Role>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_range_covers_whole_days() {
        let range = DateRange::from_days(
            NaiveDate::from_ymd_opt(2024, 3, 1),
            NaiveDate::from_ymd_opt(2024, 3, 2),
        );

        let first = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let last = Utc.with_ymd_and_hms(2024, 3, 2, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();

        assert!(range.contains(first));
        assert!(range.contains(last));
        assert!(!range.contains(after));
        assert!(!range.contains(before));
        assert!(!range.is_inverted());
    }

    #[test]
    fn open_ended_range_matches_everything() {
        let range = DateRange::default();
        assert!(range.contains(Utc::now()));
        assert!(!range.is_inverted());
    }

    #[test]
    fn feedback_serializes_sentiment_and_score_side_by_side() {
        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            questionnaire_id: None,
            content: "The library hours are inconvenient".to_string(),
            sentiment: Some(Sentiment {
                category: SentimentCategory::Negative,
                score: -0.6,
            }),
            portal: Portal::Student,
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["sentiment"], "negative");
        assert_eq!(value["score"], -0.6);
        assert_eq!(value["portal"], "student");
        assert_eq!(value["userId"], record.author_id.to_string());
    }

    #[test]
    fn roles_round_trip_through_their_wire_names() {
        assert_eq!(Role::parse("non_academic_staff"), Some(Role::NonAcademicStaff));
        assert_eq!(Portal::parse("non_academic"), Some(Portal::NonAcademic));
        assert_eq!(Role::parse("superuser"), None);
    }
}
