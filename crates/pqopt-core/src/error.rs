//! Error types for the equation optimizer

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, PqError>;

/// Errors surfaced at the public boundary.
///
/// Internal invariants (shape mismatches after a committed substitution,
/// id collisions) are `debug_assert!`s, not error values: they indicate a
/// bug in the optimizer rather than bad input.
#[derive(Error, Debug)]
pub enum PqError {
    /// The input string could not be parsed into a tensor expression.
    #[error("malformed input: {message} (token: `{token}`)")]
    MalformedInput { token: String, message: String },

    /// Rejected at configuration time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A capacity limit (`max_temps`) was reached. The optimizer keeps
    /// the partial result; callers only see this when they ask for more.
    #[error("capacity reached: {0}")]
    CapacityReached(String),

    /// An internal invariant was violated.
    #[error("logic error: {0}")]
    Logic(String),
}
