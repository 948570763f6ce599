//! Sentiment aggregation over feedback and chat.
//!
//! Reports run in two phases: [`backfill_missing_sentiment`] classifies and
//! stores tags for records that never got one, then [`compute_tally`] counts.
//! Backfill writes only land while a record is still untagged, so a second run
//! over the same range makes no classifier calls.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::AppError,
    sentiment::{SentimentCategory, SentimentClient},
    store::{AuthoredFeedback, ChatMessageView, DateRange, ReportScope, Role, Store},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SentimentTally {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl SentimentTally {
    /// Untagged records count as neutral.
    pub fn record(&mut self, category: Option<SentimentCategory>) {
        match category {
            Some(SentimentCategory::Positive) => self.positive += 1,
            Some(SentimentCategory::Negative) => self.negative += 1,
            Some(SentimentCategory::Neutral) | None => self.neutral += 1,
        }
    }

    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.positive + self.negative + self.neutral
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportDetails {
    pub feedbacks: Vec<AuthoredFeedback>,
    pub chats: Vec<ChatMessageView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentReport {
    #[serde(flatten)]
    pub tally: SentimentTally,
    pub details: ReportDetails,
}

/// Report filters as they arrive on the query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl ReportQuery {
    pub fn range(&self) -> Result<DateRange, AppError> {
        let range = DateRange::from_days(
            parse_day("startDate", self.start_date.as_deref())?,
            parse_day("endDate", self.end_date.as_deref())?,
        );
        if range.is_inverted() {
            return Err(AppError::validation("startDate must not be after endDate"));
        }
        Ok(range)
    }

    pub fn scope(&self) -> Result<ReportScope, AppError> {
        let role = match self.role.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(raw) => Some(
                Role::parse(raw)
                    .ok_or_else(|| AppError::validation(format!("Unknown role: {raw}")))?,
            ),
        };

        Ok(ReportScope {
            range: self.range()?,
            role,
        })
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp; only the calendar day is kept.
fn parse_day(field: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|at| at.date_naive())
        })
        .map(Some)
        .ok_or_else(|| AppError::validation(format!("Invalid {field}: {raw}")))
}

/// Classify and store tags for in-scope records that have none. Returns how many were written.
pub async fn backfill_missing_sentiment(
    store: &dyn Store,
    classifier: &SentimentClient,
    scope: &ReportScope,
) -> Result<usize, AppError> {
    let mut written = 0;

    for item in store.feedback_for_report(scope).await? {
        if item.feedback.sentiment.is_some() {
            continue;
        }
        let sentiment = classifier.classify(&item.feedback.content).await;
        if store
            .backfill_feedback_sentiment(item.feedback.id, sentiment)
            .await?
        {
            written += 1;
        }
    }

    for view in store.chats_for_report(scope).await? {
        if view.message.sentiment.is_some() {
            continue;
        }
        let sentiment = classifier.classify(&view.message.message).await;
        if store
            .backfill_chat_sentiment(view.message.id, sentiment.category)
            .await?
        {
            written += 1;
        }
    }

    if written > 0 {
        info!(written, "backfilled missing sentiment tags");
    }
    Ok(written)
}

/// Count feedback and chat tags in scope. Read-only.
pub async fn compute_tally(
    store: &dyn Store,
    scope: &ReportScope,
) -> Result<SentimentReport, AppError> {
    let feedbacks = store.feedback_for_report(scope).await?;
    let chats = store.chats_for_report(scope).await?;

    let mut tally = SentimentTally::default();
    for item in &feedbacks {
        tally.record(item.feedback.sentiment.map(|s| s.category));
    }
    for view in &chats {
        tally.record(view.message.sentiment);
    }

    Ok(SentimentReport {
        tally,
        details: ReportDetails { feedbacks, chats },
    })
}

pub async fn generate_report(
    store: &dyn Store,
    classifier: &SentimentClient,
    scope: &ReportScope,
) -> Result<SentimentReport, AppError> {
    backfill_missing_sentiment(store, classifier, scope).await?;
    compute_tally(store, scope).await
}

/// Feedback-only counts across every portal. Never classifies.
pub async fn sentiment_trends(
    store: &dyn Store,
    range: DateRange,
) -> Result<SentimentTally, AppError> {
    let scope = ReportScope { range, role: None };
    let mut tally = SentimentTally::default();
    for item in store.feedback_for_report(&scope).await? {
        tally.record(item.feedback.sentiment.map(|s| s.category));
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::{
        sentiment::Sentiment,
        store::{MemoryStore, NewChatMessage, NewFeedback, Portal},
        testing::{FakeSentimentService, FakeVerdict, seed_user},
    };

    async fn tagged_feedback(store: &MemoryStore, author: uuid::Uuid, category: SentimentCategory) {
        store
            .insert_feedback(NewFeedback {
                author_id: author,
                questionnaire_id: None,
                content: "tagged".to_string(),
                sentiment: Sentiment {
                    category,
                    score: 0.0,
                },
                portal: Portal::Student,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn report_backfills_then_counts_feedback_and_chat() {
        let service = FakeSentimentService::start(FakeVerdict::Lexicon).await;
        let classifier = SentimentClient::new(&service.settings()).unwrap();
        let store = MemoryStore::new();
        let student = seed_user(&store, "Stu", Role::Student).await;
        let staff = seed_user(&store, "Sta", Role::AcademicStaff).await;

        tagged_feedback(&store, student.id, SentimentCategory::Positive).await;
        tagged_feedback(&store, student.id, SentimentCategory::Positive).await;
        store
            .insert_untagged_feedback(student.id, "great mentoring", Portal::Student)
            .await;
        store
            .insert_untagged_chat(student.id, staff.id, "bad timetable")
            .await;
        store
            .insert_chat(NewChatMessage {
                sender_id: staff.id,
                receiver_id: student.id,
                message: "noted".to_string(),
                sentiment: SentimentCategory::Neutral,
            })
            .await
            .unwrap();

        let report = generate_report(&store, &classifier, &ReportScope::default())
            .await
            .unwrap();

        assert_eq!(
            report.tally,
            SentimentTally {
                positive: 3,
                negative: 1,
                neutral: 1,
            }
        );
        assert_eq!(report.details.feedbacks.len(), 3);
        assert_eq!(report.details.chats.len(), 2);
        assert_eq!(service.calls(), 2);
        assert!(
            report
                .details
                .feedbacks
                .iter()
                .all(|item| item.feedback.sentiment.is_some())
        );

        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["positive"], json!(3));
        assert!(body["details"]["feedbacks"].is_array());
    }

    #[tokio::test]
    async fn second_report_makes_no_classifier_calls() {
        let service = FakeSentimentService::start(FakeVerdict::Lexicon).await;
        let classifier = SentimentClient::new(&service.settings()).unwrap();
        let store = MemoryStore::new();
        let student = seed_user(&store, "Ida", Role::Student).await;
        store
            .insert_untagged_feedback(student.id, "bad parking", Portal::Student)
            .await;

        let scope = ReportScope::default();
        let first = generate_report(&store, &classifier, &scope).await.unwrap();
        assert_eq!(service.calls(), 1);

        let second = generate_report(&store, &classifier, &scope).await.unwrap();
        assert_eq!(service.calls(), 1);
        assert_eq!(first.tally, second.tally);
        assert_eq!(
            backfill_missing_sentiment(&store, &classifier, &scope)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn tally_alone_never_classifies_and_counts_untagged_as_neutral() {
        let service = FakeSentimentService::start(FakeVerdict::Lexicon).await;
        let store = MemoryStore::new();
        let student = seed_user(&store, "Uma", Role::Student).await;
        store
            .insert_untagged_feedback(student.id, "great lab", Portal::Student)
            .await;

        let report = compute_tally(&store, &ReportScope::default()).await.unwrap();
        assert_eq!(report.tally.neutral, 1);
        assert_eq!(service.calls(), 0);

        let trends = sentiment_trends(&store, DateRange::default()).await.unwrap();
        assert_eq!(trends.total(), 1);
        assert_eq!(trends.neutral, 1);
    }

    #[tokio::test]
    async fn role_filter_applies_to_author_and_sender() {
        let service = FakeSentimentService::start(FakeVerdict::Lexicon).await;
        let classifier = SentimentClient::new(&service.settings()).unwrap();
        let store = MemoryStore::new();
        let student = seed_user(&store, "Viv", Role::Student).await;
        let alum = seed_user(&store, "Wes", Role::Alumni).await;

        tagged_feedback(&store, student.id, SentimentCategory::Negative).await;
        tagged_feedback(&store, alum.id, SentimentCategory::Positive).await;
        store
            .insert_untagged_chat(alum.id, student.id, "great event")
            .await;

        let scope = ReportScope {
            role: Some(Role::Alumni),
            ..ReportScope::default()
        };
        let report = generate_report(&store, &classifier, &scope).await.unwrap();

        assert_eq!(report.tally.positive, 2);
        assert_eq!(report.tally.negative, 0);
        assert_eq!(report.details.feedbacks.len(), 1);
        assert_eq!(report.details.chats[0].sender.id, alum.id);
    }

    #[tokio::test]
    async fn date_range_excludes_records_outside_the_window() {
        let store = MemoryStore::new();
        let student = seed_user(&store, "Xan", Role::Student).await;
        tagged_feedback(&store, student.id, SentimentCategory::Positive).await;

        let today = Utc::now().date_naive();
        let yesterday = today.pred_opt().unwrap();

        let within = sentiment_trends(&store, DateRange::from_days(Some(today), Some(today)))
            .await
            .unwrap();
        assert_eq!(within.positive, 1);

        let before = sentiment_trends(&store, DateRange::from_days(None, Some(yesterday)))
            .await
            .unwrap();
        assert_eq!(before.total(), 0);
    }

    #[test]
    fn query_parsing_validates_dates_and_roles() {
        let query = ReportQuery {
            start_date: Some("2024-03-01".to_string()),
            end_date: Some("2024-03-31T10:00:00Z".to_string()),
            role: Some("alumni".to_string()),
        };
        let scope = query.scope().unwrap();
        assert_eq!(scope.role, Some(Role::Alumni));
        assert!(scope.range.start.is_some() && scope.range.end.is_some());

        let inverted = ReportQuery {
            start_date: Some("2024-04-01".to_string()),
            end_date: Some("2024-03-01".to_string()),
            role: None,
        };
        assert!(matches!(inverted.scope(), Err(AppError::Validation(_))));

        let garbage = ReportQuery {
            start_date: Some("yesterday".to_string()),
            ..ReportQuery::default()
        };
        assert!(garbage.range().is_err());

        let unknown_role = ReportQuery {
            role: Some("dean".to_string()),
            ..ReportQuery::default()
        };
        assert!(unknown_role.scope().is_err());

        let all = ReportQuery {
            role: Some("all".to_string()),
            ..ReportQuery::default()
        };
        assert_eq!(all.scope().unwrap().role, None);
    }
}
