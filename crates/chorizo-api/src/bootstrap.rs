//! # Service Bootstrap
//!
//! Builds the [`AppState`] from configuration at startup.
//!
//! ## Bootstrap Sequence
//!
//! 1. **Validate configuration**: pool bounds and cache wiring.
//! 2. **Load schemas**: every definition under `SCHEMA_DIR`.
//! 3. **Select the backend**: PostgreSQL when `DATABASE_URL` is set,
//!    otherwise rows live in memory.
//! 4. **Wire authentication**: key set and revocation caches when
//!    `KEYSET_URL` is set, warmed once so the first request does not pay
//!    for the fetch.
//!
//! A failed warm-up is logged and tolerated; the caches retry on the next
//! lookup.

use std::sync::Arc;

use chorizo_cache::{KeySetCache, RevocationCache};
use chorizo_core::{CacheFetchError, SchemaDefinitionError};
use chorizo_entity::{Engine, MemoryBackend, PersistenceBackend, TypeRegistry};
use chorizo_schema::SchemaValidator;

use crate::auth::Authenticator;
use crate::config::AppConfig;
use crate::db;
use crate::state::AppState;

/// Errors during startup.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("schema loading failed: {0}")]
    Schema(#[from] SchemaDefinitionError),

    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache setup failed: {0}")]
    Cache(#[from] CacheFetchError),
}

/// Build the application state described by `config`.
pub async fn bootstrap(config: AppConfig) -> Result<AppState, BootstrapError> {
    config.validate().map_err(BootstrapError::Config)?;

    let registry = load_registry(&config)?;
    let backend = select_backend(&config).await?;
    let engine = Engine::new(Arc::new(registry), backend);

    let authenticator = build_authenticator(&config)?;
    let mut state = AppState::new(config, engine);
    if let Some(authenticator) = authenticator {
        warm(&authenticator).await;
        state = state.with_auth(authenticator);
    } else {
        tracing::warn!("KEYSET_URL not set; authentication is disabled");
    }
    Ok(state)
}

// ─── Phases ─────────────────────────────────────────────────────────

fn load_registry(config: &AppConfig) -> Result<TypeRegistry, BootstrapError> {
    let mut schemas = SchemaValidator::new()?;
    match &config.schema_dir {
        Some(dir) => {
            let loaded = schemas.load_dir(dir)?;
            tracing::info!(dir = %dir.display(), types = ?loaded, "entity schemas loaded");
        }
        None => tracing::warn!("SCHEMA_DIR not set; no entity types are registered"),
    }
    Ok(TypeRegistry::with_schemas(schemas))
}

async fn select_backend(config: &AppConfig) -> Result<Arc<dyn PersistenceBackend>, BootstrapError> {
    match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url, config).await?;
            Ok(Arc::new(db::PgBackend::new(pool)))
        }
        None => {
            tracing::warn!(
                max_connections = config.db_max_connections,
                "DATABASE_URL not set; entities are kept in memory and lost on restart"
            );
            Ok(Arc::new(MemoryBackend::with_max_connections(
                config.db_max_connections as usize,
            )))
        }
    }
}

fn build_authenticator(config: &AppConfig) -> Result<Option<Authenticator>, BootstrapError> {
    let Some(keyset_url) = &config.keyset_url else {
        return Ok(None);
    };
    let keys = KeySetCache::from_url(
        keyset_url.clone(),
        config.cache_ttl(),
        config.fetch_timeout(),
        config.cache_failure_policy,
    )?;
    let revocation = config
        .revocation_url
        .as_ref()
        .map(|url| {
            RevocationCache::from_url(
                url.clone(),
                config.cache_ttl(),
                config.fetch_timeout(),
                config.cache_failure_policy,
            )
        })
        .transpose()?;
    tracing::info!(
        keyset = %keyset_url,
        revocation = config.revocation_url.is_some(),
        ttl_secs = config.cache_ttl_secs,
        "authentication enabled"
    );
    Ok(Some(Authenticator::new(keys, revocation)))
}

async fn warm(authenticator: &Authenticator) {
    match authenticator.keys().get().await {
        Ok(table) => tracing::info!(keys = table.len(), "key set loaded"),
        Err(e) => tracing::warn!(error = %e, "initial key set fetch failed"),
    }
}
