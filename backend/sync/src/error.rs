use bank::{Collection, DocumentId, GroupKey, ValidationError};
use thiserror::Error;

use crate::config::ConfigError;

/// Failures reported by a document store gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Document {id} not found in {collection}")]
    NotFound {
        collection: Collection,
        id: DocumentId,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Malformed stored document: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum PantryError {
    #[error("No active pantry group")]
    NoActiveGroup,

    #[error("Pantry group {0} does not exist")]
    GroupNotFound(GroupKey),

    #[error("No free group key after {0} attempts")]
    GroupKeyExhausted(usize),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PantryError {
    /// Mutations without a group are dropped quietly, like a disabled button.
    pub fn is_silent(&self) -> bool {
        matches!(self, PantryError::NoActiveGroup)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PantryError::Gateway(GatewayError::NotFound { .. }))
    }

    /// Store failures are worth retrying, everything else needs new input.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PantryError::Gateway(GatewayError::Unavailable(_) | GatewayError::Redis(_))
        )
    }
}
