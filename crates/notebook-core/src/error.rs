//! Error types for notebook-core.

use thiserror::Error;

/// Result type for notebook-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in notebook-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected by the security validator.
    #[error("security rejection: {0}")]
    SecurityRejection(String),

    /// The cell's source failed to parse or raised during evaluation.
    #[error("execution error: {0}")]
    Execution(String),

    /// Cell tracker bookkeeping failed (snapshot, retraction, attribution).
    ///
    /// Callers should surface this as a WARNING output and continue; it must
    /// never fail the cell that triggered it.
    #[error("tracker error: {0}")]
    Tracker(String),

    /// Widget lookup or coercion failed.
    #[error("widget error: {0}")]
    Widget(String),

    /// Session with this id was not found, or has expired.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session with this id already exists.
    #[error("session already exists: {0}")]
    SessionExists(String),

    /// The session manager has reached its configured cap.
    #[error("session cap reached: {0}")]
    SessionCapReached(usize),

    /// Neither the primary nor legacy notebook source path could be resolved.
    #[error("notebook source not found: {0}")]
    NotebookNotFound(String),

    /// Asset fetch failed (non-fatal; logged and surfaced for callers who care).
    #[error("asset fetch error: {0}")]
    AssetFetch(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Underlying object-store error.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Embedded interpreter engine error.
    #[error("interpreter error: {0}")]
    Interpreter(#[from] Box<rhai::EvalAltResult>),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
