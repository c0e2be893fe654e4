//! # Service Configuration
//!
//! [`AppConfig`] is parsed once at process start from CLI flags, each with an
//! environment variable fallback, and then carried inside
//! [`AppState`](crate::state::AppState). Nothing reads the environment after
//! startup.
//!
//! Unset `DATABASE_URL` selects the in-memory backend. Unset `KEYSET_URL`
//! disables authentication: every request runs as an anonymous caller with
//! no permission checks.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use chorizo_cache::FailurePolicy;
use clap::{Parser, ValueEnum};
use url::Url;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Runtime configuration for the chorizo API service.
///
/// Custom `Debug` redacts database credentials.
#[derive(Clone, Parser)]
#[command(name = "chorizo-api", version, about = "Schema-driven JSON entity API", long_about = None)]
pub struct AppConfig {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// PostgreSQL connection URL. Rows are kept in memory when unset.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Connections the pool keeps open.
    #[arg(long, env = "DB_MIN_CONNECTIONS", default_value_t = 1)]
    pub db_min_connections: u32,

    /// Upper bound on pooled connections.
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub db_max_connections: u32,

    /// Seconds to wait for a pooled connection before failing the request.
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub db_acquire_timeout_secs: u64,

    /// Remote verification key set. Authentication is disabled when unset.
    #[arg(long, env = "KEYSET_URL")]
    pub keyset_url: Option<Url>,

    /// Remote token revocation list.
    #[arg(long, env = "REVOCATION_URL")]
    pub revocation_url: Option<Url>,

    /// Freshness window for both remote caches.
    #[arg(long, env = "CACHE_TTL_SECS", default_value_t = 3600)]
    pub cache_ttl_secs: u64,

    /// Timeout for each remote fetch.
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    /// What a caller joined on a failed cache refresh receives.
    #[arg(long, env = "CACHE_FAILURE_POLICY", default_value = "serve-stale")]
    pub cache_failure_policy: FailurePolicy,

    /// Directory of `*.schema.{json,yaml,yml}` entity definitions.
    #[arg(long, env = "SCHEMA_DIR")]
    pub schema_dir: Option<PathBuf>,

    /// Permissions required to read entities (comma separated).
    #[arg(long, env = "READ_PERMISSIONS", value_delimiter = ',', default_value = "entities:read")]
    pub read_permissions: Vec<String>,

    /// Permissions required to create, update, or delete entities (comma separated).
    #[arg(long, env = "WRITE_PERMISSIONS", value_delimiter = ',', default_value = "entities:write")]
    pub write_permissions: Vec<String>,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            db_min_connections: 1,
            db_max_connections: 20,
            db_acquire_timeout_secs: 5,
            keyset_url: None,
            revocation_url: None,
            cache_ttl_secs: 3600,
            fetch_timeout_secs: 10,
            cache_failure_policy: FailurePolicy::ServeStale,
            schema_dir: None,
            read_permissions: vec!["entities:read".into()],
            write_permissions: vec!["entities:write".into()],
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Reject settings that cannot work together.
    pub fn validate(&self) -> Result<(), String> {
        if self.db_max_connections == 0 {
            return Err("DB_MAX_CONNECTIONS must be at least 1".into());
        }
        if self.db_min_connections > self.db_max_connections {
            return Err(format!(
                "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                self.db_min_connections, self.db_max_connections
            ));
        }
        if self.revocation_url.is_some() && self.keyset_url.is_none() {
            return Err("REVOCATION_URL requires KEYSET_URL".into());
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
    }

    pub fn read_permission_set(&self) -> BTreeSet<String> {
        permission_set(&self.read_permissions)
    }

    pub fn write_permission_set(&self) -> BTreeSet<String> {
        permission_set(&self.write_permissions)
    }
}

fn permission_set(raw: &[String]) -> BTreeSet<String> {
    raw.iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Replace the password of a connection URL, if any.
fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("[REDACTED]"));
            url.to_string()
        }
        Ok(url) => url.to_string(),
        Err(_) => "[REDACTED]".to_string(),
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("database_url", &self.database_url.as_deref().map(redact_url))
            .field("db_min_connections", &self.db_min_connections)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("keyset_url", &self.keyset_url.as_ref().map(Url::as_str))
            .field("revocation_url", &self.revocation_url.as_ref().map(Url::as_str))
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("cache_failure_policy", &self.cache_failure_policy)
            .field("schema_dir", &self.schema_dir)
            .field("read_permissions", &self.read_permissions)
            .field("write_permissions", &self.write_permissions)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse() {
        let config = AppConfig::try_parse_from([
            "chorizo-api",
            "--port",
            "9000",
            "--keyset-url",
            "https://auth.example.com/keys",
            "--cache-failure-policy",
            "propagate",
            "--write-permissions",
            "entities:write,admin",
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.cache_failure_policy, FailurePolicy::Propagate);
        assert_eq!(
            config.write_permission_set(),
            BTreeSet::from(["admin".to_string(), "entities:write".to_string()])
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_failure_policy_is_rejected() {
        let parsed = AppConfig::try_parse_from(["chorizo-api", "--cache-failure-policy", "retry"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_pool_bounds_must_be_ordered() {
        let config = AppConfig {
            db_min_connections: 10,
            db_max_connections: 2,
            ..AppConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("DB_MIN_CONNECTIONS"));
    }

    #[test]
    fn test_revocation_without_keyset_is_rejected() {
        let config = AppConfig {
            revocation_url: Some("https://auth.example.com/revoked".parse().unwrap()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_database_password() {
        let config = AppConfig {
            database_url: Some("postgres://chorizo:hunter2@db:5432/chorizo".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"), "password leaked: {debug}");
        assert!(debug.contains("REDACTED"));
        assert!(debug.contains("db:5432"));
    }
}
