//! Validation run before any request leaves the process

use crate::{
    CoreError, LeaderboardQuery, RankQuery, ScoreSubmission, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Clamp a requested page size into `1..=MAX_PAGE_LIMIT`. Zero falls back to
/// the default size.
pub fn clamp_limit(limit: u32) -> u32 {
    if limit == 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        limit.min(MAX_PAGE_LIMIT)
    }
}

fn require(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

fn require_optional(field: &str, value: Option<&str>) -> Result<(), CoreError> {
    match value {
        Some(value) => require(field, value),
        None => Ok(()),
    }
}

/// Validate a score submission
pub fn validate_submission(submission: &ScoreSubmission) -> Result<(), CoreError> {
    require("leaderboard_id", &submission.leaderboard_id)?;
    require("player_id", &submission.player_id)?;

    if let Some(key) = &submission.idempotency_key {
        require("idempotency_key", key)?;
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(CoreError::Validation(format!(
                "idempotency_key longer than {} bytes",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
    }

    Ok(())
}

/// Validate a leaderboard read
pub fn validate_query(query: &LeaderboardQuery) -> Result<(), CoreError> {
    require("leaderboard_id", &query.leaderboard_id)?;
    require_optional("view", query.view.as_deref())
}

/// Validate a rank lookup
pub fn validate_rank_query(query: &RankQuery) -> Result<(), CoreError> {
    require("leaderboard_id", &query.leaderboard_id)?;
    require("player_id", &query.player_id)?;
    require_optional("view", query.view.as_deref())
}
