use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as CURSOR_ENCODING, Engine};
use leaderboard_core::{
    Bracket, LeaderboardEntry, LeaderboardPage, LeaderboardQuery, Metadata, Pagination, Period,
    RankQuery, RankResult, ScoreResult, ScoreSubmission,
};
use log::{debug, info};
use time::OffsetDateTime;
use uuid::Uuid;

use super::client::{Connector, Error, LeaderboardService};
use crate::config::ClientConfig;

/// View that decorates entries with brackets
pub const BRACKETS_VIEW: &str = "brackets";

struct StoredScore {
    score_id: String,
    player_id: String,
    score: i64,
    metadata: Option<Metadata>,
    submitted_at: OffsetDateTime,
    sequence: u64,
}

#[derive(Default)]
struct Board {
    scores: Vec<StoredScore>,
    submissions: HashMap<String, ScoreResult>,
}

/// A player's best score within one period
struct Standing<'a> {
    rank: u64,
    best: &'a StoredScore,
}

impl Board {
    /// Per-player bests, highest score first, earlier submission winning ties
    fn standings(&self, period: &Period, period_start: OffsetDateTime) -> Vec<Standing<'_>> {
        let mut best: HashMap<&str, &StoredScore> = HashMap::new();
        for score in self
            .scores
            .iter()
            .filter(|s| in_period(s.submitted_at, period, period_start))
        {
            best.entry(score.player_id.as_str())
                .and_modify(|current| {
                    if score.score > current.score {
                        *current = score;
                    }
                })
                .or_insert(score);
        }

        let mut ordered: Vec<&StoredScore> = best.into_values().collect();
        ordered.sort_by(|a, b| b.score.cmp(&a.score).then(a.sequence.cmp(&b.sequence)));
        ordered
            .into_iter()
            .enumerate()
            .map(|(index, best)| Standing {
                rank: index as u64 + 1,
                best,
            })
            .collect()
    }
}

fn in_period(at: OffsetDateTime, period: &Period, period_start: OffsetDateTime) -> bool {
    match period {
        Period::AllTime => true,
        Period::Current => at >= period_start,
        Period::Previous => at < period_start,
        Period::At(until) => at <= *until,
    }
}

fn bracket_for(rank: u64, total: u64) -> Bracket {
    let (name, color) = if rank * 10 <= total {
        ("gold", "#FFD700")
    } else if rank * 2 <= total {
        ("silver", "#C0C0C0")
    } else {
        ("bronze", "#CD7F32")
    };
    Bracket {
        name: name.to_string(),
        color: color.to_string(),
    }
}

fn encode_cursor(offset: u64) -> String {
    CURSOR_ENCODING.encode(format!("offset:{}", offset))
}

fn decode_cursor(cursor: &str) -> Result<u64, Error> {
    let invalid = || Error::Service {
        status: 400,
        message: format!("invalid cursor {:?}", cursor),
    };
    let decoded = CURSOR_ENCODING.decode(cursor).map_err(|_| invalid())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
    decoded
        .strip_prefix("offset:")
        .and_then(|offset| offset.parse().ok())
        .ok_or_else(invalid)
}

fn not_found(leaderboard_id: &str) -> Error {
    Error::Service {
        status: 404,
        message: format!("leaderboard {} not found", leaderboard_id),
    }
}

/// In-memory leaderboard service used by tests and the demo binary
pub struct MockLeaderboard {
    boards: RwLock<HashMap<String, Board>>,
    period_start: RwLock<OffsetDateTime>,
    latency: RwLock<Option<Duration>>,
    failures: Mutex<VecDeque<Error>>,
    last_query: Mutex<Option<LeaderboardQuery>>,
    calls: AtomicUsize,
    sequence: AtomicUsize,
}

impl Default for MockLeaderboard {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLeaderboard {
    pub fn new() -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            period_start: RwLock::new(OffsetDateTime::now_utc()),
            latency: RwLock::new(None),
            failures: Mutex::new(VecDeque::new()),
            last_query: Mutex::new(None),
            calls: AtomicUsize::new(0),
            sequence: AtomicUsize::new(0),
        }
    }

    pub fn with_boards(leaderboard_ids: &[&str]) -> Self {
        let mock = Self::new();
        for id in leaderboard_ids {
            mock.create_leaderboard(id);
        }
        mock
    }

    pub fn create_leaderboard(&self, leaderboard_id: &str) {
        self.boards
            .write()
            .unwrap()
            .entry(leaderboard_id.to_string())
            .or_default();
    }

    /// Delay applied to every call before it is answered
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().unwrap() = latency;
    }

    /// The next call fails with `error` instead of being served
    pub fn queue_failure(&self, error: Error) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Starts a new period: everything submitted so far becomes "previous"
    pub fn roll_period(&self) {
        *self.period_start.write().unwrap() = OffsetDateTime::now_utc();
    }

    /// Calls that reached the service, including injected failures
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<LeaderboardQuery> {
        self.last_query.lock().unwrap().clone()
    }

    pub fn score_count(&self, leaderboard_id: &str) -> usize {
        self.boards
            .read()
            .unwrap()
            .get(leaderboard_id)
            .map(|board| board.scores.len())
            .unwrap_or(0)
    }

    /// Metadata stored with a score, exactly as submitted
    pub fn metadata_for(&self, leaderboard_id: &str, score_id: &str) -> Option<Metadata> {
        self.boards
            .read()
            .unwrap()
            .get(leaderboard_id)?
            .scores
            .iter()
            .find(|score| score.score_id == score_id)?
            .metadata
            .clone()
    }

    pub fn reset(&self) {
        self.boards.write().unwrap().clear();
        self.failures.lock().unwrap().clear();
        *self.last_query.lock().unwrap() = None;
        self.calls.store(0, Ordering::SeqCst);
    }

    async fn begin_call(&self) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.read().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LeaderboardService for MockLeaderboard {
    async fn submit_score(&self, submission: ScoreSubmission) -> Result<ScoreResult, Error> {
        self.begin_call().await?;

        let period_start = *self.period_start.read().unwrap();
        let mut boards = self.boards.write().unwrap();
        let board = boards
            .get_mut(&submission.leaderboard_id)
            .ok_or_else(|| not_found(&submission.leaderboard_id))?;

        if let Some(key) = &submission.idempotency_key {
            if let Some(previous) = board.submissions.get(key) {
                debug!("Mock leaderboard: replaying submission {}", key);
                return Ok(previous.clone());
            }
        }

        let previous_best = board
            .scores
            .iter()
            .filter(|s| s.player_id == submission.player_id)
            .map(|s| s.score)
            .max();

        let score_id = Uuid::now_v7().to_string();
        board.scores.push(StoredScore {
            score_id: score_id.clone(),
            player_id: submission.player_id.clone(),
            score: submission.score,
            metadata: submission.metadata,
            submitted_at: OffsetDateTime::now_utc(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) as u64,
        });

        let rank = board
            .standings(&Period::AllTime, period_start)
            .iter()
            .find(|standing| standing.best.player_id == submission.player_id)
            .map(|standing| standing.rank)
            .unwrap_or_default();

        let result = ScoreResult {
            score_id,
            rank,
            is_new_best: previous_best.map_or(true, |best| submission.score > best),
        };
        if let Some(key) = submission.idempotency_key {
            board.submissions.insert(key, result.clone());
        }

        info!(
            "Mock leaderboard: {} scored {} on {} (rank {})",
            submission.player_id, submission.score, submission.leaderboard_id, rank
        );
        Ok(result)
    }

    async fn get_leaderboard(&self, query: LeaderboardQuery) -> Result<LeaderboardPage, Error> {
        self.begin_call().await?;
        *self.last_query.lock().unwrap() = Some(query.clone());

        let with_brackets = match query.view.as_deref() {
            None => false,
            Some(BRACKETS_VIEW) => true,
            Some(view) => {
                return Err(Error::Service {
                    status: 404,
                    message: format!("view {} not found", view),
                })
            }
        };

        let period_start = *self.period_start.read().unwrap();
        let boards = self.boards.read().unwrap();
        let board = boards
            .get(&query.leaderboard_id)
            .ok_or_else(|| not_found(&query.leaderboard_id))?;
        let standings = board.standings(&query.period, period_start);

        let total = standings.len() as u64;
        let limit = u64::from(query.effective_limit());
        let start = match query.pagination() {
            Pagination::First => 0,
            Pagination::Offset(offset) => offset,
            Pagination::Cursor(cursor) => decode_cursor(&cursor)?,
            Pagination::AroundRank(rank) => (rank - 1)
                .saturating_sub(limit / 2)
                .min(total.saturating_sub(limit)),
        }
        .min(total);
        let end = (start + limit).min(total);

        let entries = standings[start as usize..end as usize]
            .iter()
            .map(|standing| LeaderboardEntry {
                rank: standing.rank,
                player_id: standing.best.player_id.clone(),
                score: standing.best.score,
                submitted_at: standing.best.submitted_at,
                bracket: with_brackets.then(|| bracket_for(standing.rank, total)),
            })
            .collect();

        let has_more = end < total;
        Ok(LeaderboardPage {
            entries,
            total_entries: total,
            has_more,
            next_cursor: has_more.then(|| encode_cursor(end)),
        })
    }

    async fn get_player_rank(&self, query: RankQuery) -> Result<RankResult, Error> {
        self.begin_call().await?;

        let period_start = *self.period_start.read().unwrap();
        let boards = self.boards.read().unwrap();
        let board = boards
            .get(&query.leaderboard_id)
            .ok_or_else(|| not_found(&query.leaderboard_id))?;
        let standings = board.standings(&query.period, period_start);
        let total = standings.len() as u64;

        Ok(standings
            .iter()
            .find(|standing| standing.best.player_id == query.player_id)
            .map(|standing| RankResult {
                rank: standing.rank,
                score: standing.best.score,
                percentile: (total - standing.rank) as f64 / total as f64 * 100.0,
            })
            .unwrap_or_else(RankResult::unranked))
    }
}

/// Hands out sessions on a shared [`MockLeaderboard`] and counts the ones
/// still alive.
pub struct MockConnector {
    service: Arc<MockLeaderboard>,
    live: Arc<AtomicUsize>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl MockConnector {
    pub fn new(service: Arc<MockLeaderboard>) -> Self {
        Self {
            service,
            live: Arc::new(AtomicUsize::new(0)),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        }
    }

    pub fn service(&self) -> &Arc<MockLeaderboard> {
        &self.service
    }

    /// Sessions handed out and not yet dropped
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Makes later connects fail, as an unreachable endpoint would
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    fn connect(&self, config: &ClientConfig) -> Result<Arc<dyn LeaderboardService>, Error> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Config(format!("{} refused connection", config.endpoint)));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            service: self.service.clone(),
            live: self.live.clone(),
        }))
    }
}

struct MockSession {
    service: Arc<MockLeaderboard>,
    live: Arc<AtomicUsize>,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaderboardService for MockSession {
    async fn submit_score(&self, submission: ScoreSubmission) -> Result<ScoreResult, Error> {
        self.service.submit_score(submission).await
    }

    async fn get_leaderboard(&self, query: LeaderboardQuery) -> Result<LeaderboardPage, Error> {
        self.service.get_leaderboard(query).await
    }

    async fn get_player_rank(&self, query: RankQuery) -> Result<RankResult, Error> {
        self.service.get_player_rank(query).await
    }
}
