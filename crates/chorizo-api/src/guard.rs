//! # Route Options
//!
//! Per-route policy attached as a route layer:
//!
//! - `restricted`: permissions the caller's token must grant. Checked
//!   against the [`Caller`] injected by [`authenticate`](crate::auth::authenticate).
//! - `validation`: a registered schema the JSON body must satisfy. The
//!   normalised record is handed to the handler as [`ValidatedBody`];
//!   failures are answered with 422 and field-level details.
//!
//! ```ignore
//! let route = RouteOptions::new()
//!     .restricted(["reports:write"])
//!     .validation("report")
//!     .apply(&state, post(create_report));
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use chorizo_core::{AuthError, Record};
use chorizo_entity::Engine;
use chorizo_schema::Mode;
use serde_json::{Map, Value};

use crate::auth::{self, Caller};
use crate::error::AppError;
use crate::state::AppState;

/// Largest request body the validation layer will buffer.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Permission and validation policy for one route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOptions {
    restricted: BTreeSet<String>,
    validation: Option<String>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require every permission in `permissions`.
    pub fn restricted<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.restricted.extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Validate the JSON body against the registered schema `schema`.
    pub fn validation(mut self, schema: impl Into<String>) -> Self {
        self.validation = Some(schema.into());
        self
    }

    pub fn required_permissions(&self) -> &BTreeSet<String> {
        &self.restricted
    }

    /// Wrap `route` so these options are enforced before its handlers run.
    pub fn apply<S>(self, state: &AppState, route: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let guard = Guard {
            engine: state.engine.clone(),
            options: Arc::new(self),
        };
        route.route_layer(from_fn_with_state(guard, check))
    }
}

#[derive(Clone)]
struct Guard {
    engine: Engine,
    options: Arc<RouteOptions>,
}

async fn check(State(guard): State<Guard>, request: Request, next: Next) -> Response {
    let options = &guard.options;
    if !options.restricted.is_empty() {
        let allowed = match request.extensions().get::<Caller>() {
            Some(caller) => caller.require(&options.restricted),
            None => Err(AuthError::MissingCredential),
        };
        if let Err(e) = allowed {
            return auth::reject(e);
        }
    }

    let Some(schema) = options.validation.as_deref() else {
        return next.run(request).await;
    };

    let (mut parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return AppError::BadRequest(format!("cannot read request body: {e}")).into_response(),
    };
    let payload: Value = if bytes.is_empty() {
        Value::Object(Map::new())
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(payload) => payload,
            Err(e) => return AppError::BadRequest(format!("body is not valid JSON: {e}")).into_response(),
        }
    };

    match guard.engine.registry().schemas().validate(schema, &payload, Mode::Create) {
        Ok(record) => {
            parts.extensions.insert(ValidatedBody(record));
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        Err(e) => {
            tracing::debug!(schema = %schema, error = %e, "rejected request body");
            AppError::Validation(e).into_response()
        }
    }
}

/// The request body after schema validation and normalisation.
#[derive(Debug, Clone)]
pub struct ValidatedBody(pub Record);

impl<S: Send + Sync> FromRequestParts<S> for ValidatedBody {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ValidatedBody>()
            .cloned()
            .ok_or_else(|| AppError::Internal("route has no validation schema".into()))
    }
}
