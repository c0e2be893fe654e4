//! # Application State
//!
//! The context object built once at process start and handed to every
//! handler through Axum's `State` extractor. Holds the configuration, the
//! entity engine (registry + backend), the authenticator with its caches,
//! and the metrics handle. Nothing here is a global.

use std::collections::BTreeSet;
use std::sync::Arc;

use chorizo_entity::{Engine, MemoryBackend, TypeRegistry};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::auth::Authenticator;
use crate::config::AppConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Engine,
    /// `None` disables authentication.
    pub auth: Option<Arc<Authenticator>>,
    pub metrics: Option<PrometheusHandle>,
    read_permissions: Arc<BTreeSet<String>>,
    write_permissions: Arc<BTreeSet<String>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("auth", &self.auth)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl AppState {
    /// State over an existing engine, with authentication disabled.
    pub fn new(config: AppConfig, engine: Engine) -> Self {
        let read_permissions = Arc::new(config.read_permission_set());
        let write_permissions = Arc::new(config.write_permission_set());
        Self {
            config: Arc::new(config),
            engine,
            auth: None,
            metrics: None,
            read_permissions,
            write_permissions,
        }
    }

    /// Default configuration over `registry` with an in-memory backend.
    pub fn in_memory(registry: TypeRegistry) -> Self {
        Self::new(
            AppConfig::default(),
            Engine::new(Arc::new(registry), Arc::new(MemoryBackend::new())),
        )
    }

    pub fn with_auth(mut self, authenticator: Authenticator) -> Self {
        self.auth = Some(Arc::new(authenticator));
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Permissions required by the entity read route.
    pub fn read_permissions(&self) -> &Arc<BTreeSet<String>> {
        &self.read_permissions
    }

    /// Permissions required by the entity write routes.
    pub fn write_permissions(&self) -> &Arc<BTreeSet<String>> {
        &self.write_permissions
    }
}
