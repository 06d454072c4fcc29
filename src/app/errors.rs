use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::images::ImageError;
use crate::llm::LlmError;
use crate::search::SearchError;
use crate::semantic::{EmbeddingError, IndexError, VectorStorageError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("embedding provider failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector index failed: {0}")]
    Index(#[from] IndexError),

    #[error("language model failed: {0}")]
    Llm(#[from] LlmError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("vector cache error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Validation(msg) => AppError::Validation(msg),
            SearchError::NotFound(msg) => AppError::NotFound(msg),
            SearchError::Embedding(e) => AppError::Embedding(e),
            SearchError::Index(e) => AppError::Index(e),
        }
    }
}

impl From<ImageError> for AppError {
    fn from(err: ImageError) -> Self {
        AppError::Validation(err.to_string())
    }
}
