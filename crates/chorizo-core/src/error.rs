//! # Error Types — Structured Error Hierarchy
//!
//! Defines the error kinds shared across chorizo. All enums use `thiserror`
//! for derive-based `Display` and `Error` implementations.
//!
//! ## Design
//!
//! - Schema definition errors are fatal at registration and carry every
//!   meta-schema violation, not just the first.
//! - Validation errors map each offending field to its reasons so callers can
//!   render field-level detail.
//! - Persistence errors never carry driver types; backends map their native
//!   errors at the boundary.
//! - Cache fetch errors are `Clone` so every caller joined on one in-flight
//!   refresh observes the same failure.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Schema Definition ───────────────────────────────────────────────

/// A single meta-schema violation with structured context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON Pointer path to the violating location in the schema definition.
    pub path: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "  (root): {}", self.message)
        } else {
            write!(f, "  {}: {}", self.path, self.message)
        }
    }
}

/// Collection of meta-schema violations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violations(Vec<Violation>);

impl Violations {
    /// Wrap a list of violations.
    pub fn new(violations: Vec<Violation>) -> Self {
        Self(violations)
    }

    /// Returns the number of violations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no violations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a slice of all violations.
    pub fn as_slice(&self) -> &[Violation] {
        &self.0
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// A schema definition was rejected at registration time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaDefinitionError {
    /// The definition did not conform to the schema meta-schema.
    #[error("schema '{schema}' is malformed:\n{violations}")]
    Malformed {
        /// Name of the rejected schema.
        schema: String,
        /// Every violation found.
        violations: Violations,
    },

    /// A type with this name has already been registered.
    #[error("schema '{schema}' is already registered")]
    AlreadyRegistered {
        /// Name of the duplicate schema.
        schema: String,
    },

    /// The schema names a base type that is not registered.
    #[error("schema '{schema}' extends unknown base '{base}'")]
    UnknownBase {
        /// Name of the rejected schema.
        schema: String,
        /// The missing base type.
        base: String,
    },

    /// The schema declares more than one primary key field.
    #[error("schema '{schema}' declares more than one primary key: {fields:?}")]
    MultiplePrimaryKeys {
        /// Name of the rejected schema.
        schema: String,
        /// The competing primary key fields.
        fields: Vec<String>,
    },

    /// The schema source could not be read or parsed.
    #[error("schema '{schema}' could not be loaded: {reason}")]
    Load {
        /// File name or identifier of the schema source.
        schema: String,
        /// Reason the source could not be loaded.
        reason: String,
    },
}

// ─── Payload Validation ──────────────────────────────────────────────

/// A payload failed the rules derived from an entity schema.
///
/// Maps each offending field to one or more human-readable reasons. Reasons
/// that do not belong to a single field are recorded under `"(root)"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationError {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationError {
    /// Key used for reasons that are not attached to a single field.
    pub const ROOT: &'static str = "(root)";

    /// Create an empty error accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an error with a single field reason.
    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.add(field, reason);
        err
    }

    /// Record a reason against a field.
    pub fn add(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.fields.entry(field.into()).or_default().push(reason.into());
    }

    /// Whether no reasons have been recorded.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields with their reasons, ordered by field name.
    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }

    /// Reasons recorded against one field.
    pub fn reasons(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` if nothing was recorded, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("payload failed validation")?;
        for (i, (field, reasons)) in self.fields.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{field}: {}", reasons.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

// ─── Persistence ─────────────────────────────────────────────────────

/// A backend insert, update, fetch, or delete failed.
///
/// The entity's committed snapshot is left unchanged whenever one of these
/// is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// No connection could be obtained.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The addressed row does not exist.
    #[error("{table} row with key {key} not found")]
    NotFound {
        /// Table that was addressed.
        table: String,
        /// Primary key value, rendered as JSON.
        key: String,
    },

    /// The store rejected the write (constraint, type, or conflict).
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The backend does not implement this operation.
    #[error("operation '{operation}' is not supported by this backend")]
    Unsupported {
        /// Name of the missing capability.
        operation: &'static str,
    },

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

// ─── Cache Fetch ─────────────────────────────────────────────────────

/// A cache refresh could not produce data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheFetchError {
    /// The request never produced a response.
    #[error("transport error fetching {url}: {reason}")]
    Transport {
        /// Endpoint that was fetched.
        url: String,
        /// Transport failure description.
        reason: String,
    },

    /// The upstream answered with a non-success status.
    #[error("upstream {url} returned status {status}")]
    Status {
        /// Endpoint that was fetched.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("could not decode payload: {0}")]
    Decode(String),

    /// The refresh task ended without reporting a result.
    #[error("refresh task ended without a result")]
    Abandoned,
}

// ─── Authentication ──────────────────────────────────────────────────

/// Why a request was refused by the authentication collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header was sent.
    #[error("missing authorization header")]
    MissingCredential,

    /// The header or token could not be parsed.
    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    /// The token's `kid` is not in the current key set.
    #[error("unknown signing key '{kid}'")]
    UnknownKey {
        /// The key identifier taken from the unverified header.
        kid: String,
    },

    /// The signature did not verify.
    #[error("token signature is invalid")]
    InvalidSignature,

    /// The token's `exp` claim is in the past.
    #[error("token has expired")]
    Expired,

    /// The token's `jti` is on the revocation list.
    #[error("token has been revoked")]
    Revoked,

    /// The key set could not be obtained.
    #[error("verification keys unavailable: {0}")]
    KeysUnavailable(#[from] CacheFetchError),

    /// The token is valid but lacks required permissions.
    #[error("insufficient permission; missing {missing:?}")]
    InsufficientPermission {
        /// Required permissions absent from the `perm` claim.
        missing: Vec<String>,
    },
}

impl AuthError {
    /// Machine-readable cause, stable across releases.
    pub fn cause(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MalformedCredential(_) => "malformed_credential",
            Self::UnknownKey { .. } => "unknown_key",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::KeysUnavailable(_) => "keys_unavailable",
            Self::InsufficientPermission { .. } => "insufficient_permission",
        }
    }
}
