//! Error types for planning.

use thiserror::Error;

/// Errors that can occur while constructing, running or exporting a planner.
///
/// Configuration and model-contract problems are reported at construction time; numeric
/// round-off is clamped locally and never surfaces here. Broken cache invariants panic.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SolverError {
    /// Invalid or inconsistent solver configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A bound representation that the model cannot support (e.g. convex bounds on a plain MDP).
    #[error("incompatible model: {0}")]
    IncompatibleModel(String),

    /// The model violates its contract (probabilities not summing to one, bad dimensions, ...).
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// A query was made before `plan_init`.
    #[error("planner not initialized")]
    NotInitialized,

    /// The requested operation is not available for the active bounds.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A policy file parsed but its contents are inconsistent.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed policy, script or config document.
    #[error("format error: {0}")]
    Format(#[from] serde_json::Error),
}

pub type SolverResult<T> = Result<T, SolverError>;
