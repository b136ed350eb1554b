//! Shared error types

use thiserror::Error;

/// Errors raised while building or checking leaderboard requests and pages
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("malformed leaderboard page: {0}")]
    MalformedPage(String),
}
