pub mod admin;
pub mod auth;
pub mod portals;
pub mod realtime;
pub mod responses;
pub mod router;
pub mod state;

pub use responses::{ApiMessage, json_error};
pub use state::AppState;
