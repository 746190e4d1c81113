//! Error taxonomy for the recommendation pipeline.
//!
//! Only [`RecommendError`] ever reaches a caller of the pipeline. Service
//! failures ([`crate::llm::ServiceError`], [`crate::metadata::MetadataError`])
//! are downgraded to deterministic fallbacks before they get that far.

use thiserror::Error;

/// Errors surfaced by [`crate::pipeline::Recommender::recommend`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecommendError {
    /// Malformed request. Raised before any external call is made.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The catalog holds fewer tracks than were requested.
    #[error("catalog holds {available} tracks, cannot select {requested}")]
    InsufficientCatalog { requested: usize, available: usize },

    /// Lookup of an id that the catalog does not contain.
    #[error("track not found: {0}")]
    NotFound(String),
}

impl RecommendError {
    /// Process exit code used by the CLI for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::InsufficientCatalog { .. } => 3,
            Self::NotFound(_) => 1,
        }
    }
}

/// Errors raised while loading the track dataset.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed catalog: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog is missing required column `{0}`")]
    MissingColumn(&'static str),
}
