use crate::state::AppState;
use axum::Router;

mod dto;
pub mod error;
pub(crate) mod extractors;
pub mod handlers;
pub mod password;
pub mod repo;
mod repo_types;
pub mod revocation;
pub mod services;
pub mod token;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}
