//! # chorizo-schema — Entity Schema Validation
//!
//! Turns declarative entity schema definitions into payload validators.
//!
//! ## Modules
//!
//! - [`meta`]: the meta-schema every definition must satisfy.
//! - [`definition`]: [`EntitySchema`] and [`FieldSpec`], with base-type
//!   inheritance.
//! - [`payload`]: [`PayloadValidator`], derived once per schema; applies
//!   defaults, checks required fields and types, normalises values.
//! - [`validate`]: [`SchemaValidator`], the registry keyed by schema name,
//!   plus JSON/YAML schema file loading.
//!
//! ## Crate Policy
//!
//! - Definitions are checked in full at registration. A schema that
//!   registers successfully never fails on first use.
//! - Validation never touches storage.

pub mod definition;
pub mod meta;
pub mod payload;
pub mod validate;

pub use definition::{EntitySchema, FieldSpec};
pub use meta::MetaSchema;
pub use payload::{Mode, PayloadValidator};
pub use validate::{load_file, SchemaValidator};
