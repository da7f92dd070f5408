use axum::Router;

use crate::{
    auth::{claims::Role, middleware::protect},
    state::AppState,
};

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(protect(handlers::admin_routes(), state, Some(Role::Admin)))
        .merge(protect(handlers::member_routes(), state, None))
}
