use super::validation::ValidationError;
use thiserror::Error;

/// Errors returned by tracker store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Database unreachable: {0}")]
    Connectivity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Schema error: {0:#}")]
    Schema(anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
