//! # Database Persistence Layer
//!
//! PostgreSQL implementation of the entity persistence contract via SQLx.
//!
//! The database layer is **optional**. When `DATABASE_URL` is set, entity
//! rows live in PostgreSQL tables named by each schema's `table`. When
//! absent, the service uses the in-memory backend from `chorizo-entity`.
//!
//! Tables are expected to exist with one column per declared field; this
//! crate does not create or migrate them.

pub mod entities;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::AppConfig;

pub use entities::PgBackend;

/// Build the connection pool with the configured `[min, max]` bounds.
///
/// Checkout waits up to the acquire timeout when every connection is busy.
pub async fn init_pool(url: &str, config: &AppConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .min_connections(config.db_min_connections)
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout())
        .connect(url)
        .await?;

    tracing::info!(
        min = config.db_min_connections,
        max = config.db_max_connections,
        "connected to PostgreSQL"
    );
    Ok(pool)
}
