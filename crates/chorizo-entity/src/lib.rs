//! # chorizo-entity — Schema-Driven Entity Engine
//!
//! Creation, update, dirty tracking, and variant projection for entities
//! described by registered schemas.
//!
//! ## Design
//!
//! - **No reflection.** Field access goes through the ordered
//!   [`Record`](chorizo_core::Record) container built once per schema.
//! - **Explicit projection.** The [`TypeRegistry`] maps
//!   `(type, predicate over payload)` to a more specific type and resolves
//!   with a visited set, so a cyclic rule set cannot hang creation.
//! - **Privately owned state.** An [`Entity`] is owned by whoever holds it;
//!   the engine shares nothing mutable across operations. Storage is
//!   reached only through [`PersistenceBackend`].
//!
//! ## Crate Policy
//!
//! - Committed values change only after the backend confirms a write.
//! - Backend failures surface as [`PersistenceError`](chorizo_core::PersistenceError)
//!   and never partially apply.

pub mod backend;
pub mod engine;
pub mod entity;
pub mod error;
pub mod registry;

pub use backend::{MemoryBackend, PersistenceBackend, WriteCall};
pub use engine::Engine;
pub use entity::Entity;
pub use error::EngineError;
pub use registry::TypeRegistry;
