//! # chorizo-core — Foundational Types
//!
//! The leaf crate of the chorizo workspace. Every other crate depends on it;
//! it depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Validated field names.** [`FieldName`] can only be constructed from a
//!    string matching `^[A-Za-z0-9_]+$`. No bare strings reach a schema.
//!
//! 2. **Closed type enum.** [`FieldType`] has exactly eight variants. Adding a
//!    type forces every `match` in the validator and the backends to handle it.
//!
//! 3. **Ordered records, no reflection.** Entity values live in a [`Record`]:
//!    a value vector laid out once per schema by a shared [`Layout`]. Field
//!    access is an index lookup, never attribute interception.
//!
//! 4. **One error kind per failure class.** Schema definition, payload
//!    validation, persistence, cache fetch, and authentication failures are
//!    distinct types so callers can tell them apart.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `chorizo-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod field;
pub mod record;

pub use error::{
    AuthError, CacheFetchError, PersistenceError, SchemaDefinitionError, ValidationError,
    Violation, Violations,
};
pub use field::{FieldName, FieldType};
pub use record::{Layout, Record, UnknownField};
