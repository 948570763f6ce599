use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    sentiment::SentimentClient,
    store::{
        FeedbackFilter, FeedbackRecord, FeedbackResponse, FeedbackThread, NewFeedback,
        NewFeedbackResponse, Portal, Store,
    },
};

/// A feedback submission as accepted by a portal route.
#[derive(Debug, Clone)]
pub struct FeedbackSubmission {
    pub author_id: Uuid,
    pub content: String,
    /// Always the portal of the route the request arrived on.
    pub portal: Portal,
    pub questionnaire_id: Option<Uuid>,
}

/// Classify and persist one feedback record.
///
/// The classifier never fails, so an outage still stores the record, tagged neutral.
pub async fn submit_feedback(
    store: &dyn Store,
    classifier: &SentimentClient,
    submission: FeedbackSubmission,
) -> Result<FeedbackRecord, AppError> {
    let content = submission.content.trim();
    if content.is_empty() {
        return Err(AppError::validation("Feedback content is required"));
    }

    if let Some(questionnaire_id) = submission.questionnaire_id {
        if store.find_questionnaire(questionnaire_id).await?.is_none() {
            return Err(AppError::not_found("Questionnaire not found"));
        }
    }

    let sentiment = classifier.classify(content).await;

    let record = store
        .insert_feedback(NewFeedback {
            author_id: submission.author_id,
            questionnaire_id: submission.questionnaire_id,
            content: content.to_string(),
            sentiment,
            portal: submission.portal,
        })
        .await?;

    info!(
        feedback_id = %record.id,
        portal = %record.portal,
        sentiment = %sentiment.category,
        "feedback stored"
    );

    Ok(record)
}

/// Append a staff response. The parent record is never modified.
///
/// With `reviewing` set, feedback from any other portal is reported as missing.
pub async fn respond_to_feedback(
    store: &dyn Store,
    feedback_id: Uuid,
    responder_id: Uuid,
    text: &str,
    reviewing: Option<Portal>,
) -> Result<FeedbackResponse, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::validation("Response text is required"));
    }

    let feedback = store
        .find_feedback(feedback_id)
        .await?
        .filter(|feedback| reviewing.is_none_or(|portal| feedback.portal == portal))
        .ok_or_else(|| AppError::not_found("Feedback not found"))?;

    let response = store
        .insert_response(NewFeedbackResponse {
            feedback_id: feedback.id,
            responder_id,
            response: text.to_string(),
        })
        .await?;

    info!(feedback_id = %feedback.id, response_id = %response.id, "feedback response stored");
    Ok(response)
}

pub async fn list_feedback(
    store: &dyn Store,
    filter: &FeedbackFilter,
) -> Result<Vec<FeedbackThread>, AppError> {
    if filter.range.is_inverted() {
        return Err(AppError::validation("startDate must not be after endDate"));
    }
    Ok(store.list_feedback(filter).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sentiment::{Sentiment, SentimentCategory},
        store::{MemoryStore, NewQuestionnaire, QuestionDefinition, Role},
        testing::{FakeSentimentService, FakeVerdict, seed_user, unreachable_settings},
    };

    fn submission(author_id: Uuid, content: &str) -> FeedbackSubmission {
        FeedbackSubmission {
            author_id,
            content: content.to_string(),
            portal: Portal::Student,
            questionnaire_id: None,
        }
    }

    #[tokio::test]
    async fn submission_is_classified_before_it_is_stored() {
        let service = FakeSentimentService::start(FakeVerdict::fixed("negative", -0.6)).await;
        let classifier = SentimentClient::new(&service.settings()).unwrap();
        let store = MemoryStore::new();
        let student = seed_user(&store, "Sam", Role::Student).await;

        let record = submit_feedback(
            &store,
            &classifier,
            submission(student.id, "  The library hours are inconvenient "),
        )
        .await
        .unwrap();

        assert_eq!(record.content, "The library hours are inconvenient");
        assert_eq!(record.portal, Portal::Student);
        assert_eq!(
            record.sentiment,
            Some(Sentiment {
                category: SentimentCategory::Negative,
                score: -0.6,
            })
        );
        assert_eq!(service.calls(), 1);

        let listed = list_feedback(
            &store,
            &FeedbackFilter {
                author_id: Some(student.id),
                ..FeedbackFilter::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].feedback, record);
        assert_eq!(listed[0].author.first_name, "Sam");
    }

    #[tokio::test]
    async fn classifier_outage_still_stores_neutral_feedback() {
        let classifier = SentimentClient::new(&unreachable_settings().await).unwrap();
        let store = MemoryStore::new();
        let alum = seed_user(&store, "Ali", Role::Alumni).await;

        let mut input = submission(alum.id, "Great reunion");
        input.portal = Portal::Alumni;
        let record = submit_feedback(&store, &classifier, input).await.unwrap();

        assert_eq!(record.sentiment, Some(Sentiment::NEUTRAL));
    }

    #[tokio::test]
    async fn blank_content_is_rejected_without_calling_the_classifier() {
        let service = FakeSentimentService::start(FakeVerdict::Lexicon).await;
        let classifier = SentimentClient::new(&service.settings()).unwrap();
        let store = MemoryStore::new();
        let student = seed_user(&store, "Bo", Role::Student).await;

        let err = submit_feedback(&store, &classifier, submission(student.id, "   \n"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(service.calls(), 0);
        assert!(
            store
                .list_feedback(&FeedbackFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unknown_questionnaire_is_not_found() {
        let service = FakeSentimentService::start(FakeVerdict::Lexicon).await;
        let classifier = SentimentClient::new(&service.settings()).unwrap();
        let store = MemoryStore::new();
        let student = seed_user(&store, "Cat", Role::Student).await;

        let mut input = submission(student.id, "bad wifi");
        input.questionnaire_id = Some(Uuid::new_v4());
        let err = submit_feedback(&store, &classifier, input).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let questionnaire = store
            .insert_questionnaire(NewQuestionnaire {
                title: "Facilities".to_string(),
                questions: vec![QuestionDefinition {
                    text: "How is the wifi?".to_string(),
                    kind: "text".to_string(),
                }],
                portal: Portal::Student,
            })
            .await
            .unwrap();

        let mut input = submission(student.id, "bad wifi");
        input.questionnaire_id = Some(questionnaire.id);
        let record = submit_feedback(&store, &classifier, input).await.unwrap();
        assert_eq!(record.questionnaire_id, Some(questionnaire.id));
        assert_eq!(
            record.sentiment.map(|s| s.category),
            Some(SentimentCategory::Negative)
        );
    }

    #[tokio::test]
    async fn responses_append_without_touching_the_feedback() {
        let service = FakeSentimentService::start(FakeVerdict::fixed("negative", -0.6)).await;
        let classifier = SentimentClient::new(&service.settings()).unwrap();
        let store = MemoryStore::new();
        let student = seed_user(&store, "Dee", Role::Student).await;
        let lecturer = seed_user(&store, "Lee", Role::AcademicStaff).await;

        let record = submit_feedback(&store, &classifier, submission(student.id, "Too loud"))
            .await
            .unwrap();

        for text in ["Thanks, we will look into it", "Quiet zones are now marked"] {
            respond_to_feedback(&store, record.id, lecturer.id, text, Some(Portal::Student))
                .await
                .unwrap();
        }

        let threads = list_feedback(
            &store,
            &FeedbackFilter {
                portal: Some(Portal::Student),
                ..FeedbackFilter::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].responses.len(), 2);
        assert_eq!(threads[0].responses[1].responder.id, lecturer.id);
        assert_eq!(threads[0].feedback, record, "parent record unchanged");
    }

    #[tokio::test]
    async fn responding_rejects_blank_text_and_unknown_feedback() {
        let store = MemoryStore::new();
        let lecturer = seed_user(&store, "Ray", Role::AcademicStaff).await;

        let err = respond_to_feedback(&store, Uuid::new_v4(), lecturer.id, " ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = respond_to_feedback(&store, Uuid::new_v4(), lecturer.id, "noted", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn feedback_outside_the_reviewed_portal_is_hidden() {
        let store = MemoryStore::new();
        let alum = seed_user(&store, "Ola", Role::Alumni).await;
        let lecturer = seed_user(&store, "Kim", Role::AcademicStaff).await;
        let record = store
            .insert_feedback(NewFeedback {
                author_id: alum.id,
                questionnaire_id: None,
                content: "Alumni portal is slow".to_string(),
                sentiment: Sentiment::NEUTRAL,
                portal: Portal::Alumni,
            })
            .await
            .unwrap();

        let err = respond_to_feedback(&store, record.id, lecturer.id, "ok", Some(Portal::Student))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
