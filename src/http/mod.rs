//! HTTP surface (ambient; the core never depends on this module). Wires the
//! `VoteService` facade to the routes in the external interfaces table: an
//! `/internal/*` group for the server/room manager, a `/system/*` group for
//! authenticated participants, plus a public health check.

pub mod error;
pub mod internal;
pub mod system;

use crate::service::VoteService;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<VoteService>,
    pub internal_token: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    let internal = Router::new()
        .route("/vote/start", post(internal::start))
        .route("/vote/stop", post(internal::stop))
        .route("/vote/clear", post(internal::clear))
        .route("/vote/clear_all", post(internal::clear_all))
        .route("/vote/all_voted_ids", get(internal::all_voted_ids))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            internal::require_internal_token,
        ));

    let system = Router::new()
        .route("/vote", post(system::vote))
        .route("/vote/voted", get(system::voted))
        .route("/vote/health", get(system::health));

    Router::new()
        .nest("/internal", internal)
        .nest("/system", system)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
