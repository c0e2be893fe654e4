//! Entity engine error type.

use chorizo_core::{PersistenceError, SchemaDefinitionError, ValidationError};
use thiserror::Error;

/// Failure of an entity engine operation.
///
/// Whenever one of these is returned the entity involved is left exactly as
/// it was before the call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The payload failed the schema's rules.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The backend could not complete the operation.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// A schema definition was rejected.
    #[error(transparent)]
    Registration(#[from] SchemaDefinitionError),

    /// No schema is registered under this name.
    #[error("unknown entity type '{0}'")]
    UnknownType(String),

    /// The operation needs a primary key value and the entity has none.
    #[error("entity of type '{0}' has no primary key value")]
    NoPrimaryKey(String),
}

impl EngineError {
    /// Whether the caller supplied bad input, as opposed to a backend or
    /// configuration failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnknownType(_))
    }
}
