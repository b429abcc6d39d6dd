//! Error types for the animtree crate

use thiserror::Error;

/// Main error type for tree construction and configuration.
///
/// Per-frame work (ticking and evaluating a bound tree) never fails; it degrades to the
/// reference pose instead. Only building skeletons, wiring nodes and loading definitions
/// report errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Skeleton error: {0}")]
    Skeleton(String),

    #[error("Unknown bone: {0}")]
    UnknownBone(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Unknown clip: {0}")]
    UnknownClip(String),

    #[error("Tree error: {0}")]
    Tree(String),

    #[error("Definition error: {0}")]
    Definition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
