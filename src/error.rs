//! Error types for quadmap.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuadmapError>;

/// Coarse classification used by the build job and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input; raised before any output collection exists.
    Input,
    /// Constrained k-means could not produce centroids.
    Clustering,
    /// Insert, flush or query against persistent storage failed.
    Storage,
    /// A tiling invariant did not hold.
    Invariant,
}

#[derive(Debug, Error)]
pub enum QuadmapError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dataset '{0}' is not registered")]
    UnknownDataset(String),

    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),

    #[error("collection '{name}' already holds {entities} entities; rebuild with repopulate")]
    CollectionExists { name: String, entities: usize },

    #[error("clustering failed: {0}")]
    Clustering(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("query of {requested} keys exceeds the per-request limit of {limit}")]
    QueryTooLarge { requested: usize, limit: usize },

    #[error("parent tile {0} is neither resident nor persisted")]
    MissingTile(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("invalid snapshot format")]
    InvalidFormat,

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QuadmapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuadmapError::InvalidInput(_)
            | QuadmapError::InvalidConfig(_)
            | QuadmapError::UnknownDataset(_)
            | QuadmapError::CollectionNotFound(_)
            | QuadmapError::CollectionExists { .. } => ErrorKind::Input,
            QuadmapError::Clustering(_) => ErrorKind::Clustering,
            QuadmapError::Invariant(_) => ErrorKind::Invariant,
            QuadmapError::Storage(_)
            | QuadmapError::QueryTooLarge { .. }
            | QuadmapError::MissingTile(_)
            | QuadmapError::InvalidFormat
            | QuadmapError::InvalidTimestamp
            | QuadmapError::Io(_)
            | QuadmapError::Serialization(_) => ErrorKind::Storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            QuadmapError::InvalidInput("empty".into()).kind(),
            ErrorKind::Input
        );
        assert_eq!(
            QuadmapError::Clustering("nan".into()).kind(),
            ErrorKind::Clustering
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        assert_eq!(QuadmapError::from(io).kind(), ErrorKind::Storage);
        assert_eq!(
            QuadmapError::MissingTile("1/0/0".into()).kind(),
            ErrorKind::Storage
        );
        assert_eq!(
            QuadmapError::UnknownDataset("wikiart".into()).kind(),
            ErrorKind::Input
        );
    }

    #[test]
    fn test_display_mentions_collection() {
        let err = QuadmapError::CollectionExists {
            name: "wikiart_image_to_tile".into(),
            entities: 12,
        };
        assert!(err.to_string().contains("wikiart_image_to_tile"));
    }
}
