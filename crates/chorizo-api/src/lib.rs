//! # chorizo-api — JSON Entity Service
//!
//! Serves every entity type registered from the schema directory through
//! one generic set of routes, persisted in PostgreSQL or in memory.
//!
//! ## API Surface
//!
//! | Route                         | Module                 | Access            |
//! |-------------------------------|------------------------|-------------------|
//! | `POST /v1/{type}`             | [`routes::entities`]   | write permissions |
//! | `GET /v1/{type}/{id}`         | [`routes::entities`]   | read permissions  |
//! | `PATCH /v1/{type}/{id}`       | [`routes::entities`]   | write permissions |
//! | `DELETE /v1/{type}/{id}`      | [`routes::entities`]   | write permissions |
//! | `GET /health`, `GET /metrics` | [`routes::health`]     | public            |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → track_requests → authenticate → route guard → Handler
//! ```
//!
//! `authenticate` resolves the bearer token into a [`auth::Caller`]; each
//! route's guard then checks the permissions it was registered with.

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod guard;
pub mod metrics;
pub mod routes;
pub mod state;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use crate::config::AppConfig;
pub use crate::error::AppError;
pub use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health and metrics are mounted outside the auth middleware so they stay
/// reachable without credentials.
pub fn app(state: AppState) -> Router {
    let api = routes::entities::router(&state)
        .layer(from_fn_with_state(state.clone(), auth::authenticate));

    Router::new()
        .merge(routes::health::router())
        .merge(api)
        .layer(from_fn(metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
