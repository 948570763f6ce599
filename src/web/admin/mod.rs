mod auth;
mod monitoring;
mod questionnaires;
mod reports;
mod types;
mod users;

use axum::{
    Router,
    routing::{get, put},
};

use crate::web::AppState;

pub use monitoring::{list_activities, list_chats, list_feedbacks, moderate_chat};
pub use questionnaires::{create_questionnaire, list_questionnaires};
pub use reports::sentiment_report;
pub use users::{create_user, list_users};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reports/sentiment", get(sentiment_report))
        .route("/feedbacks", get(list_feedbacks))
        .route("/chats", get(list_chats))
        .route("/chats/:id/moderate", put(moderate_chat))
        .route("/users", get(list_users).post(create_user))
        .route("/activities", get(list_activities))
        .route(
            "/questionnaires",
            get(list_questionnaires).post(create_questionnaire),
        )
}
