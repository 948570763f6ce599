pub mod hub;

pub use hub::{ChatHub, RoomSubscription};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    sentiment::SentimentClient,
    store::{ChatFilter, ChatMessageView, NewChatMessage, Store},
};

pub const INVALID_MESSAGE: &str = "Invalid message data";

/// Message payload as clients send it, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A validated chat message ready for classification.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub message: String,
}

impl MessageDraft {
    pub fn validate(&self) -> Result<OutgoingMessage, AppError> {
        let parse_id = |raw: &Option<String>| {
            raw.as_deref()
                .and_then(|value| Uuid::parse_str(value.trim()).ok())
        };

        let sender_id = parse_id(&self.sender_id);
        let receiver_id = parse_id(&self.receiver_id);
        let message = self.message.as_deref().map(str::trim).unwrap_or_default();

        match (sender_id, receiver_id) {
            (Some(sender_id), Some(receiver_id)) if !message.is_empty() => Ok(OutgoingMessage {
                sender_id,
                receiver_id,
                message: message.to_string(),
            }),
            _ => Err(AppError::validation(INVALID_MESSAGE)),
        }
    }
}

/// Classify, persist and fan out one chat message.
///
/// The stored row is re-read with both participants joined, and that view is
/// what the receiver and sender rooms get and what the caller returns.
pub async fn send_message(
    store: &dyn Store,
    classifier: &SentimentClient,
    hub: &ChatHub,
    outgoing: OutgoingMessage,
) -> Result<ChatMessageView, AppError> {
    if store.find_user(outgoing.sender_id).await?.is_none() {
        return Err(AppError::not_found("Sender not found"));
    }
    if store.find_user(outgoing.receiver_id).await?.is_none() {
        return Err(AppError::not_found("Receiver not found"));
    }

    let sentiment = classifier.classify(&outgoing.message).await;

    let stored = store
        .insert_chat(NewChatMessage {
            sender_id: outgoing.sender_id,
            receiver_id: outgoing.receiver_id,
            message: outgoing.message,
            sentiment: sentiment.category,
        })
        .await?;

    let view = store
        .chat_view(stored.id)
        .await?
        .ok_or_else(|| AppError::not_found("Chat message not found"))?;

    let connections = hub.emit(&[view.message.receiver_id, view.message.sender_id], view.clone());
    info!(
        message_id = %view.message.id,
        sentiment = %sentiment.category,
        connections,
        "chat message delivered"
    );

    Ok(view)
}

/// Conversation history for `participant`, optionally narrowed to one peer. Oldest first.
pub async fn history(
    store: &dyn Store,
    participant: Uuid,
    peer: Option<Uuid>,
) -> Result<Vec<ChatMessageView>, AppError> {
    Ok(store
        .list_chats(&ChatFilter {
            participant: Some(participant),
            peer,
        })
        .await?)
}

/// A room reference: either a bare user id or an object carrying one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(Uuid),
    Object {
        #[serde(rename = "userId", alias = "id")]
        user_id: Uuid,
    },
}

impl UserRef {
    pub fn user_id(&self) -> Uuid {
        match self {
            UserRef::Id(id) | UserRef::Object { user_id: id } => *id,
        }
    }
}

/// Frames a realtime client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    Join {
        data: UserRef,
    },
    Leave {
        data: UserRef,
    },
    SendMessage {
        #[serde(default)]
        data: MessageDraft,
        #[serde(default)]
        ack: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AckPayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessageView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckPayload {
    pub fn delivered(message: ChatMessageView) -> Self {
        Self {
            success: true,
            message: Some(message),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Frames the server pushes to realtime clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    ReceiveMessage { data: ChatMessageView },
    Ack { ack: u64, data: AckPayload },
    Error { data: ErrorPayload },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            data: ErrorPayload {
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        sentiment::SentimentCategory,
        store::{MemoryStore, Role},
        testing::{FakeSentimentService, FakeVerdict, seed_user, unreachable_settings},
    };

    fn draft(sender: Uuid, receiver: Uuid, message: &str) -> MessageDraft {
        MessageDraft {
            sender_id: Some(sender.to_string()),
            receiver_id: Some(receiver.to_string()),
            message: Some(message.to_string()),
        }
    }

    #[tokio::test]
    async fn classifier_outage_still_delivers_to_both_rooms() {
        let classifier = SentimentClient::new(&unreachable_settings().await).unwrap();
        let store = MemoryStore::new();
        let hub = ChatHub::default();
        let alice = seed_user(&store, "Alice", Role::Student).await;
        let bob = seed_user(&store, "Bob", Role::AcademicStaff).await;

        let mut alice_conn = hub.subscribe();
        alice_conn.join(alice.id);
        let mut bob_conn = hub.subscribe();
        bob_conn.join(bob.id);

        let outgoing = draft(alice.id, bob.id, "Office hours?").validate().unwrap();
        let view = send_message(&store, &classifier, &hub, outgoing).await.unwrap();

        assert_eq!(view.message.sentiment, Some(SentimentCategory::Neutral));
        assert_eq!(view.sender.first_name, "Alice");
        assert_eq!(view.receiver.role, Role::AcademicStaff);
        assert_eq!(bob_conn.recv().await, view.clone());
        assert_eq!(alice_conn.recv().await, view.clone());

        let stored = history(&store, bob.id, Some(alice.id)).await.unwrap();
        assert_eq!(stored, vec![view]);
    }

    #[tokio::test]
    async fn message_is_tagged_with_the_classifier_verdict() {
        let service = FakeSentimentService::start(FakeVerdict::Lexicon).await;
        let classifier = SentimentClient::new(&service.settings()).unwrap();
        let store = MemoryStore::new();
        let hub = ChatHub::default();
        let alice = seed_user(&store, "Ann", Role::Student).await;
        let bob = seed_user(&store, "Ben", Role::NonAcademicStaff).await;

        let outgoing = draft(alice.id, bob.id, "great canteen").validate().unwrap();
        let view = send_message(&store, &classifier, &hub, outgoing).await.unwrap();

        assert_eq!(view.message.sentiment, Some(SentimentCategory::Positive));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn whitespace_message_is_rejected_and_nothing_is_stored() {
        let store = MemoryStore::new();
        let alice = seed_user(&store, "Ada", Role::Student).await;
        let bob = seed_user(&store, "Bea", Role::AcademicStaff).await;

        let err = draft(alice.id, bob.id, "   ").validate().unwrap_err();
        assert_eq!(err.public_message(), INVALID_MESSAGE);
        assert!(history(&store, alice.id, None).await.unwrap().is_empty());
    }

    #[test]
    fn malformed_ids_are_invalid_message_data() {
        let draft = MessageDraft {
            sender_id: Some("not-a-uuid".to_string()),
            receiver_id: Some(Uuid::new_v4().to_string()),
            message: Some("hello".to_string()),
        };
        assert!(matches!(draft.validate(), Err(AppError::Validation(_))));
        assert!(MessageDraft::default().validate().is_err());
    }

    #[tokio::test]
    async fn unknown_receiver_is_not_found() {
        let classifier = SentimentClient::new(&unreachable_settings().await).unwrap();
        let store = MemoryStore::new();
        let alice = seed_user(&store, "Avi", Role::Student).await;

        let outgoing = draft(alice.id, Uuid::new_v4(), "hello?").validate().unwrap();
        let err = send_message(&store, &classifier, &ChatHub::default(), outgoing)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn join_accepts_bare_ids_and_objects() {
        let id = Uuid::new_v4();
        for frame in [
            json!({ "event": "join", "data": id.to_string() }),
            json!({ "event": "join", "data": { "userId": id.to_string() } }),
            json!({ "event": "join", "data": { "id": id.to_string() } }),
        ] {
            match serde_json::from_value::<ClientEvent>(frame).unwrap() {
                ClientEvent::Join { data } => assert_eq!(data.user_id(), id),
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    #[test]
    fn send_frame_carries_optional_ack() {
        let frame = json!({
            "event": "sendMessage",
            "data": { "senderId": "a", "receiverId": "b", "message": "hi" },
            "ack": 7
        });
        match serde_json::from_value::<ClientEvent>(frame).unwrap() {
            ClientEvent::SendMessage { data, ack } => {
                assert_eq!(ack, Some(7));
                assert_eq!(data.message.as_deref(), Some("hi"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn failed_ack_serializes_without_message() {
        let value = serde_json::to_value(ServerEvent::Ack {
            ack: 3,
            data: AckPayload::failed(INVALID_MESSAGE),
        })
        .unwrap();

        assert_eq!(
            value,
            json!({
                "event": "ack",
                "ack": 3,
                "data": { "success": false, "error": "Invalid message data" }
            })
        );
    }
}
