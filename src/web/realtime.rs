//! Websocket transport for the chat fan-out channel.
//!
//! One task per connection multiplexes inbound client frames and hub
//! deliveries. Failures are reported back on the socket and never close it.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    chat::{self, AckPayload, ClientEvent, INVALID_MESSAGE, RoomSubscription, ServerEvent},
    error::AppError,
    web::{
        AppState,
        auth::{self, AuthUser},
    },
};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn connect(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = auth::session_token(&headers, &jar, query.token.as_deref());
    let auth_user = auth::authenticate_token(&state, token).await?;

    Ok(ws.on_upgrade(move |socket| serve_connection(state, auth_user, socket)))
}

async fn serve_connection(state: AppState, auth_user: AuthUser, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let mut subscription = state.hub().subscribe();
    info!(user_id = %auth_user.id(), "realtime connection opened");

    loop {
        let outgoing = tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, &auth_user, &mut subscription, &text).await
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => None,
                Some(Err(err)) => {
                    debug!(?err, "realtime connection errored");
                    break;
                }
            },
            view = subscription.recv() => Some(ServerEvent::ReceiveMessage { data: view }),
        };

        if let Some(event) = outgoing {
            if send_event(&mut sink, &event).await.is_err() {
                break;
            }
        }
    }

    info!(user_id = %auth_user.id(), "realtime connection closed");
}

async fn handle_frame(
    state: &AppState,
    auth_user: &AuthUser,
    subscription: &mut RoomSubscription,
    text: &str,
) -> Option<ServerEvent> {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            debug!(?err, "unreadable realtime frame");
            return Some(ServerEvent::error(INVALID_MESSAGE));
        }
    };

    match event {
        ClientEvent::Join { data } => {
            let room = data.user_id();
            if room != auth_user.id() && !auth_user.is_admin() {
                warn!(user_id = %auth_user.id(), %room, "refused join for another user's room");
                return Some(ServerEvent::error("You can only join your own room"));
            }
            if subscription.join(room) {
                debug!(user_id = %auth_user.id(), %room, "joined room");
            }
            None
        }
        ClientEvent::Leave { data } => {
            if subscription.leave(data.user_id()) {
                debug!(user_id = %auth_user.id(), room = %data.user_id(), "left room");
            }
            None
        }
        ClientEvent::SendMessage { data, ack } => {
            let result = async {
                let outgoing = data.validate()?;
                if outgoing.sender_id != auth_user.id() {
                    return Err(AppError::Forbidden(
                        "Messages can only be sent as yourself".to_string(),
                    ));
                }
                chat::send_message(state.store(), state.classifier(), state.hub(), outgoing).await
            }
            .await;

            match (result, ack) {
                (Ok(view), Some(ack)) => Some(ServerEvent::Ack {
                    ack,
                    data: AckPayload::delivered(view),
                }),
                (Ok(_), None) => None,
                (Err(err), ack) => {
                    warn!(user_id = %auth_user.id(), error = %err, "realtime send failed");
                    let message = err.public_message();
                    Some(match ack {
                        Some(ack) => ServerEvent::Ack {
                            ack,
                            data: AckPayload::failed(message),
                        },
                        None => ServerEvent::error(message),
                    })
                }
            }
        }
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(?err, "failed to encode realtime event");
            return Ok(());
        }
    };
    sink.send(Message::Text(payload)).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        sentiment::SentimentCategory,
        store::{Role, Store},
        testing::{seed_user, unreachable_settings},
    };

    async fn session_for(state: &AppState, role: Role, name: &str) -> AuthUser {
        let user = seed_user(state.store(), name, role).await;
        AuthUser {
            token: uuid::Uuid::new_v4(),
            user,
        }
    }

    #[tokio::test]
    async fn join_is_limited_to_own_room_unless_admin() {
        let (state, _store) = AppState::for_tests(unreachable_settings().await);
        let student = session_for(&state, Role::Student, "Sol").await;
        let admin = session_for(&state, Role::Admin, "Ada").await;

        let mut conn = state.hub().subscribe();
        let frame = json!({ "event": "join", "data": admin.id() }).to_string();
        let reply = handle_frame(&state, &student, &mut conn, &frame).await;
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));
        assert!(!conn.is_member(admin.id()));

        let frame = json!({ "event": "join", "data": { "userId": student.id() } }).to_string();
        assert!(handle_frame(&state, &student, &mut conn, &frame).await.is_none());
        assert!(conn.is_member(student.id()));

        let mut admin_conn = state.hub().subscribe();
        let frame = json!({ "event": "join", "data": student.id() }).to_string();
        assert!(handle_frame(&state, &admin, &mut admin_conn, &frame).await.is_none());
        assert!(admin_conn.is_member(student.id()));

        let frame = json!({ "event": "leave", "data": student.id() }).to_string();
        assert!(handle_frame(&state, &admin, &mut admin_conn, &frame).await.is_none());
        assert!(!admin_conn.is_member(student.id()));
    }

    #[tokio::test]
    async fn send_acks_success_and_delivers_to_the_receiver_room() {
        let (state, store) = AppState::for_tests(unreachable_settings().await);
        let student = session_for(&state, Role::Student, "Sue").await;
        let lecturer = session_for(&state, Role::AcademicStaff, "Len").await;

        let mut lecturer_conn = state.hub().subscribe();
        lecturer_conn.join(lecturer.id());
        let mut student_conn = state.hub().subscribe();

        let frame = json!({
            "event": "sendMessage",
            "data": {
                "senderId": student.id(),
                "receiverId": lecturer.id(),
                "message": "Is the exam open book?"
            },
            "ack": 1
        })
        .to_string();

        match handle_frame(&state, &student, &mut student_conn, &frame).await {
            Some(ServerEvent::Ack { ack, data }) => {
                assert_eq!(ack, 1);
                assert!(data.success);
                let view = data.message.unwrap();
                assert_eq!(view.message.sentiment, Some(SentimentCategory::Neutral));
            }
            other => panic!("expected ack, got {other:?}"),
        }

        let delivered = lecturer_conn.recv().await;
        assert_eq!(delivered.message.message, "Is the exam open book?");
        assert_eq!(store.list_chats(&Default::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_message_fails_the_ack_and_stores_nothing() {
        let (state, store) = AppState::for_tests(unreachable_settings().await);
        let student = session_for(&state, Role::Student, "Tia").await;
        let lecturer = session_for(&state, Role::AcademicStaff, "Uri").await;
        let mut conn = state.hub().subscribe();

        let frame = json!({
            "event": "sendMessage",
            "data": { "senderId": student.id(), "receiverId": lecturer.id(), "message": "   " },
            "ack": 9
        })
        .to_string();

        match handle_frame(&state, &student, &mut conn, &frame).await {
            Some(ServerEvent::Ack { ack: 9, data }) => {
                assert!(!data.success);
                assert_eq!(data.error.as_deref(), Some(INVALID_MESSAGE));
            }
            other => panic!("expected failed ack, got {other:?}"),
        }
        assert!(store.list_chats(&Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn impersonation_without_ack_yields_error_event() {
        let (state, _store) = AppState::for_tests(unreachable_settings().await);
        let student = session_for(&state, Role::Student, "Vic").await;
        let other = session_for(&state, Role::Student, "Wyn").await;
        let mut conn = state.hub().subscribe();

        let frame = json!({
            "event": "sendMessage",
            "data": { "senderId": other.id(), "receiverId": student.id(), "message": "hi" }
        })
        .to_string();

        let reply = handle_frame(&state, &student, &mut conn, &frame).await;
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));
    }

    #[tokio::test]
    async fn garbage_frames_get_an_error_event() {
        let (state, _store) = AppState::for_tests(unreachable_settings().await);
        let student = session_for(&state, Role::Student, "Xia").await;
        let mut conn = state.hub().subscribe();

        let reply = handle_frame(&state, &student, &mut conn, "not json").await;
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));
    }
}
