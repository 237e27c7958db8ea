use crate::semantic::{EmbeddingError, IndexError};

#[derive(thiserror::Error, Debug)]
pub enum MatchError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("item with id {0:?} already exists")]
    DuplicateId(String),

    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("similarity for candidate at position {position} is not a number")]
    InvalidSimilarity { position: usize },

    #[error("record store error: {0:?}")]
    Store(#[source] anyhow::Error),

    #[error("unexpected error: {0}")]
    Internal(String),
}

impl MatchError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Caller errors, as opposed to faults of the service itself.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::DuplicateId(_))
    }
}
