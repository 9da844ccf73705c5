//! Error taxonomy for repository, index and preview operations.
//!
//! Absence (missing resource, version or content language) is never an
//! error; those paths return `None` or `false`. Errors are reserved for
//! state violations, referential integrity conflicts and failing I/O.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by content repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("content repository is not connected")]
    NotConnected,

    #[error("content repository has already been connected")]
    AlreadyConnected,

    #[error("content repository is read-only")]
    ReadOnly,

    #[error("illegal repository state: {0}")]
    State(String),

    #[error("resource is still referenced by {referenced_by}")]
    ReferentialIntegrity { referenced_by: Uuid },

    #[error("no resource serializer registered for type '{0}'")]
    NoSerializer(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("error fetching external content: {0}")]
    External(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the content index and its backing search engine.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index has been closed")]
    Closed,

    #[error("no resource serializer registered for type '{0}'")]
    NoSerializer(String),

    #[error("live path '{0}' is already taken by another resource")]
    PathConflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while rendering a single preview.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("resource has no content for language '{0}'")]
    MissingContent(String),

    #[error("unsupported preview format '{0}'")]
    UnsupportedFormat(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("error fetching external content: {0}")]
    External(#[from] reqwest::Error),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
