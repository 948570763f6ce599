//! Shared fixtures for unit tests: a fake sentiment service and seeded users.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::{
    config::SentimentSettings,
    store::{NewUser, Role, Store, User},
    web::auth::hash_password,
};

#[derive(Debug, Clone)]
pub enum FakeVerdict {
    Fixed { category: String, score: f64 },
    /// Positive when the text mentions "great", negative for "bad", else neutral.
    Lexicon,
    Status(u16),
    Delayed(Duration),
}

impl FakeVerdict {
    pub fn fixed(category: &str, score: f64) -> Self {
        FakeVerdict::Fixed {
            category: category.to_string(),
            score,
        }
    }
}

#[derive(Clone)]
struct FakeState {
    calls: Arc<AtomicUsize>,
    last_library: Arc<Mutex<Option<String>>>,
    verdict: Arc<Mutex<FakeVerdict>>,
}

pub struct FakeSentimentService {
    base_url: String,
    state: FakeState,
}

impl FakeSentimentService {
    pub async fn start(verdict: FakeVerdict) -> Self {
        let state = FakeState {
            calls: Arc::new(AtomicUsize::new(0)),
            last_library: Arc::new(Mutex::new(None)),
            verdict: Arc::new(Mutex::new(verdict)),
        };

        let app = Router::new()
            .route("/analyze", post(analyze))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn settings(&self) -> SentimentSettings {
        SentimentSettings {
            base_url: self.base_url.clone(),
            library: "vader".to_string(),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn last_library(&self) -> Option<String> {
        self.state.last_library.lock().unwrap().clone()
    }

    pub fn set_verdict(&self, verdict: FakeVerdict) {
        *self.state.verdict.lock().unwrap() = verdict;
    }
}

async fn analyze(
    State(state): State<FakeState>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    *state.last_library.lock().unwrap() = query.get("library").cloned();

    let verdict = state.verdict.lock().unwrap().clone();
    let text = body
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();

    match verdict {
        FakeVerdict::Fixed { category, score } => {
            Json(json!({ "score": score, "category": category })).into_response()
        }
        FakeVerdict::Lexicon => {
            let (category, score) = if text.contains("great") {
                ("positive", 0.8)
            } else if text.contains("bad") {
                ("negative", -0.7)
            } else {
                ("neutral", 0.0)
            };
            Json(json!({ "score": score, "category": category })).into_response()
        }
        FakeVerdict::Status(code) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(json!({ "detail": "unavailable" }))).into_response()
        }
        FakeVerdict::Delayed(delay) => {
            tokio::time::sleep(delay).await;
            Json(json!({ "score": 0.5, "category": "positive" })).into_response()
        }
    }
}

/// Settings pointing at a port nothing listens on.
pub async fn unreachable_settings() -> SentimentSettings {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    SentimentSettings {
        base_url: format!("http://{addr}"),
        library: "vader".to_string(),
        timeout: Duration::from_millis(500),
    }
}

pub async fn seed_user(store: &dyn Store, first_name: &str, role: Role) -> User {
    let password_hash = hash_password("correct horse").unwrap();
    store
        .create_user(NewUser {
            first_name: first_name.to_string(),
            last_name: "Tester".to_string(),
            email: format!(
                "{}.{}@uni.example",
                first_name.to_ascii_lowercase(),
                Uuid::new_v4().simple()
            ),
            password_hash,
            role,
            is_verified: true,
        })
        .await
        .unwrap()
}
