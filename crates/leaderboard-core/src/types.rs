//! Shared request and outcome types for the leaderboard facade

use std::{fmt, str::FromStr};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::{
    format_description::well_known::{Iso8601, Rfc3339},
    OffsetDateTime, UtcOffset,
};

use crate::{clamp_limit, CoreError};

/// Page size used when the caller does not ask for one
pub const DEFAULT_PAGE_LIMIT: u32 = 10;
/// Largest page the service will hand back
pub const MAX_PAGE_LIMIT: u32 = 100;

/// The three request kinds the facade issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    SubmitScore,
    GetLeaderboard,
    GetPlayerRank,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmitScore => "SubmitScore",
            Self::GetLeaderboard => "GetLeaderboard",
            Self::GetPlayerRank => "GetPlayerRank",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failed outcome of any operation. Always delivered as data, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub operation: Operation,
    pub message: String,
}

impl OperationFailure {
    pub fn new(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.message)
    }
}

/// Time window a leaderboard read or rank lookup applies to.
///
/// Parsed from `""` (all-time), `"current"`, `"previous"` or an ISO-8601
/// timestamp with offset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Period {
    #[default]
    AllTime,
    Current,
    Previous,
    At(OffsetDateTime),
}

impl Period {
    /// Value sent as the `period` query parameter, `None` for all-time
    pub fn as_query_value(&self) -> Option<String> {
        match self {
            Self::AllTime => None,
            other => Some(other.to_string()),
        }
    }

    pub fn is_all_time(&self) -> bool {
        matches!(self, Self::AllTime)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllTime => f.write_str("all_time"),
            Self::Current => f.write_str("current"),
            Self::Previous => f.write_str("previous"),
            // Always rendered in UTC. Years outside 0..=9999 fall back to
            // unix seconds.
            Self::At(at) => match at.to_offset(UtcOffset::UTC).format(&Rfc3339) {
                Ok(formatted) => f.write_str(&formatted),
                Err(_) => write!(f, "{}", at.unix_timestamp()),
            },
        }
    }
}

impl FromStr for Period {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "all_time" => Ok(Self::AllTime),
            "current" => Ok(Self::Current),
            "previous" => Ok(Self::Previous),
            other => OffsetDateTime::parse(other, &Iso8601::DEFAULT)
                .map(Self::At)
                .map_err(|e| CoreError::InvalidPeriod(format!("{:?}: {}", other, e))),
        }
    }
}

impl TryFrom<String> for Period {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.to_string()
    }
}

/// Opaque caller-defined payload attached to a score. Passed through
/// unmodified; travels as base64 on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(Vec<u8>);

impl Metadata {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Metadata {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for Metadata {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl From<String> for Metadata {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<&str> for Metadata {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// A score-write request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSubmission {
    pub leaderboard_id: String,
    pub player_id: String,
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Lets the service deduplicate a retried submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl ScoreSubmission {
    pub fn new(leaderboard_id: impl Into<String>, player_id: impl Into<String>, score: i64) -> Self {
        Self {
            leaderboard_id: leaderboard_id.into(),
            player_id: player_id.into(),
            score,
            metadata: None,
            idempotency_key: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Metadata>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Outcome of a successful submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score_id: String,
    pub rank: u64,
    pub is_new_best: bool,
}

/// How a leaderboard read selects its page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    First,
    Cursor(String),
    Offset(u64),
    /// One-shot jump to a window centered on the given rank
    AroundRank(u64),
}

/// A leaderboard read request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardQuery {
    pub leaderboard_id: String,
    pub limit: u32,
    pub cursor: Option<String>,
    pub offset: Option<u64>,
    pub around_rank: Option<u64>,
    pub period: Period,
    pub view: Option<String>,
}

impl LeaderboardQuery {
    pub fn new(leaderboard_id: impl Into<String>) -> Self {
        Self {
            leaderboard_id: leaderboard_id.into(),
            limit: DEFAULT_PAGE_LIMIT,
            cursor: None,
            offset: None,
            around_rank: None,
            period: Period::AllTime,
            view: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn around_rank(mut self, rank: u64) -> Self {
        self.around_rank = Some(rank);
        self
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }

    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        let view = view.into();
        self.view = (!view.is_empty()).then_some(view);
        self
    }

    /// Resolves the pagination mode. A non-empty cursor wins over
    /// `around_rank`, which wins over `offset`; an empty cursor and a zero
    /// rank or offset count as absent.
    pub fn pagination(&self) -> Pagination {
        if let Some(cursor) = self.cursor.as_deref().filter(|c| !c.is_empty()) {
            return Pagination::Cursor(cursor.to_owned());
        }
        if let Some(rank) = self.around_rank.filter(|rank| *rank > 0) {
            return Pagination::AroundRank(rank);
        }
        match self.offset {
            Some(offset) if offset > 0 => Pagination::Offset(offset),
            _ => Pagination::First,
        }
    }

    /// Page size actually sent to the service
    pub fn effective_limit(&self) -> u32 {
        clamp_limit(self.limit)
    }
}

/// Named tier an entry belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    pub name: String,
    /// Display color, `#RRGGBB`
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub player_id: String,
    pub score: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bracket: Option<Bracket>,
}

/// Immutable snapshot of one page of a leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub entries: Vec<LeaderboardEntry>,
    pub total_entries: u64,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl LeaderboardPage {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            total_entries: 0,
            has_more: false,
            next_cursor: None,
        }
    }

    /// Orders entries by ascending rank and checks the page invariants:
    /// ranks start at 1, no rank repeats, and `has_more` comes with a
    /// non-empty cursor.
    pub fn normalize(mut self) -> Result<Self, CoreError> {
        self.entries.sort_by_key(|entry| entry.rank);

        if self.entries.iter().any(|entry| entry.rank == 0) {
            return Err(CoreError::MalformedPage(
                "entry with rank 0 in a page".into(),
            ));
        }
        if let Some(pair) = self
            .entries
            .windows(2)
            .find(|pair| pair[0].rank == pair[1].rank)
        {
            return Err(CoreError::MalformedPage(format!(
                "duplicate rank {}",
                pair[0].rank
            )));
        }

        if self.next_cursor.as_deref() == Some("") {
            self.next_cursor = None;
        }
        if self.has_more && self.next_cursor.is_none() {
            return Err(CoreError::MalformedPage(
                "has_more set without a next cursor".into(),
            ));
        }

        Ok(self)
    }

    pub fn max_rank(&self) -> Option<u64> {
        self.entries.last().map(|entry| entry.rank)
    }

    pub fn min_rank(&self) -> Option<u64> {
        self.entries.first().map(|entry| entry.rank)
    }
}

/// A single-player rank lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankQuery {
    pub leaderboard_id: String,
    pub player_id: String,
    pub period: Period,
    pub view: Option<String>,
}

impl RankQuery {
    pub fn new(leaderboard_id: impl Into<String>, player_id: impl Into<String>) -> Self {
        Self {
            leaderboard_id: leaderboard_id.into(),
            player_id: player_id.into(),
            period: Period::AllTime,
            view: None,
        }
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }

    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        let view = view.into();
        self.view = (!view.is_empty()).then_some(view);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankResult {
    /// 0 when the player has no score on the board
    pub rank: u64,
    pub score: i64,
    /// Service-computed share of entries this player outperforms
    pub percentile: f64,
}

impl RankResult {
    pub fn unranked() -> Self {
        Self {
            rank: 0,
            score: 0,
            percentile: 0.0,
        }
    }

    pub fn is_ranked(&self) -> bool {
        self.rank > 0
    }
}
