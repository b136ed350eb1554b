use crate::{
    config::{ClientConfig, ClientSettings, Command, Settings},
    domain::{Inbox, LeaderboardFacade, LeaderboardObserver, RequestId},
    infra::client::{Connector, Error, HttpConnector},
};

// Mock implementations only available with mock-service feature or debug builds
#[cfg(any(feature = "mock-service", debug_assertions))]
use crate::infra::mock::{MockConnector, MockLeaderboard};
use anyhow::anyhow;
use http::Extensions;
use leaderboard_core::{
    LeaderboardPage, LeaderboardQuery, OperationFailure, Period, RankQuery, RankResult,
    ScoreResult, ScoreSubmission,
};
use log::{info, warn};
use reqwest_middleware::{
    reqwest::{self, Client},
    ClientBuilder, ClientWithMiddleware, Middleware,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::runtime::{Builder, Runtime};

/// How often the host loop drains the inbox
const TICK: Duration = Duration::from_millis(16);
/// Slack past the operation timeout before the host gives up waiting
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Demo host: a single-threaded loop that owns the inbox and a background
/// runtime that performs the network calls.
pub struct Application {
    runtime: Runtime,
    facade: LeaderboardFacade,
    inbox: Inbox,
    timeout: Duration,
}

impl Application {
    pub fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("leaderboard-io")
            .enable_all()
            .build()?;

        let client_config = ClientConfig::try_from(&config.client_settings)?;
        let timeout = client_config.timeout;
        let connector = build_connector(&config.client_settings)?;
        let (facade, inbox) =
            LeaderboardFacade::with_connector(client_config, runtime.handle().clone(), connector);
        info!("Leaderboard facade {}", facade.status());

        Ok(Self {
            runtime,
            facade,
            inbox,
            timeout,
        })
    }

    pub fn run(mut self, command: Command) -> Result<(), anyhow::Error> {
        let request = self.issue(command)?;
        let mut printer = ConsolePrinter::new(request);

        let deadline = Instant::now() + self.timeout + DRAIN_GRACE;
        while !printer.done {
            self.inbox.pump(&mut printer);
            if printer.done {
                break;
            }
            if Instant::now() > deadline {
                warn!("No outcome for {} before deadline", request);
                break;
            }
            std::thread::sleep(TICK);
        }

        self.facade.shutdown();
        let Self {
            runtime, facade, ..
        } = self;
        drop(facade);
        runtime.shutdown_timeout(Duration::from_secs(5));
        info!("Shutdown complete");

        match printer.failure {
            Some(failure) => Err(anyhow!("{}", failure)),
            None if printer.done => Ok(()),
            None => Err(anyhow!("timed out waiting for {}", request)),
        }
    }

    fn issue(&self, command: Command) -> Result<RequestId, anyhow::Error> {
        let request = match command {
            Command::Submit {
                leaderboard,
                player,
                score,
                metadata,
                idempotency_key,
            } => {
                let mut submission = ScoreSubmission::new(leaderboard, player, score);
                if let Some(metadata) = metadata {
                    submission = submission.with_metadata(metadata);
                }
                if let Some(key) = idempotency_key {
                    submission = submission.with_idempotency_key(key);
                }
                self.facade.submit_score(submission)
            }
            Command::Top {
                leaderboard,
                limit,
                cursor,
                offset,
                around_rank,
                period,
                view,
            } => {
                let mut query = LeaderboardQuery::new(leaderboard)
                    .with_limit(limit)
                    .with_period(period.parse::<Period>()?);
                query.cursor = cursor;
                query.offset = offset;
                query.around_rank = around_rank;
                if let Some(view) = view {
                    query = query.with_view(view);
                }
                self.facade.get_leaderboard(query)
            }
            Command::Rank {
                leaderboard,
                player,
                period,
                view,
            } => {
                let mut query =
                    RankQuery::new(leaderboard, player).with_period(period.parse::<Period>()?);
                if let Some(view) = view {
                    query = query.with_view(view);
                }
                self.facade.get_player_rank(query)
            }
        };
        info!("Issued request {}", request);
        Ok(request)
    }
}

struct ConsolePrinter {
    waiting_for: RequestId,
    done: bool,
    failure: Option<OperationFailure>,
}

impl ConsolePrinter {
    fn new(waiting_for: RequestId) -> Self {
        Self {
            waiting_for,
            done: false,
            failure: None,
        }
    }

    fn finish(&mut self, request: RequestId) -> bool {
        if request != self.waiting_for {
            warn!("Ignoring outcome for unexpected request {}", request);
            return false;
        }
        self.done = true;
        true
    }
}

impl LeaderboardObserver for ConsolePrinter {
    fn on_score_submitted(&mut self, request: RequestId, result: ScoreResult) {
        if self.finish(request) {
            println!(
                "score {} ranked #{}{}",
                result.score_id,
                result.rank,
                if result.is_new_best {
                    " (new personal best)"
                } else {
                    ""
                }
            );
        }
    }

    fn on_leaderboard(&mut self, request: RequestId, page: LeaderboardPage) {
        if !self.finish(request) {
            return;
        }
        for entry in &page.entries {
            let bracket = entry
                .bracket
                .as_ref()
                .map(|b| format!(" [{}]", b.name))
                .unwrap_or_default();
            println!(
                "{:>5}  {:<24} {:>12}{}",
                entry.rank, entry.player_id, entry.score, bracket
            );
        }
        println!("{} entries total", page.total_entries);
        if let Some(cursor) = page.next_cursor.filter(|_| page.has_more) {
            println!("next cursor: {}", cursor);
        }
    }

    fn on_player_rank(&mut self, request: RequestId, rank: RankResult) {
        if !self.finish(request) {
            return;
        }
        if rank.is_ranked() {
            println!(
                "rank #{} with {} (percentile {:.1})",
                rank.rank, rank.score, rank.percentile
            );
        } else {
            println!("unranked");
        }
    }

    fn on_failure(&mut self, request: RequestId, failure: OperationFailure) {
        if self.finish(request) {
            self.failure = Some(failure);
        }
    }
}

#[cfg(any(feature = "mock-service", debug_assertions))]
fn build_connector(settings: &ClientSettings) -> Result<Arc<dyn Connector>, anyhow::Error> {
    if settings.mock_enabled {
        info!("Mock leaderboard service configured");
        let service = Arc::new(MockLeaderboard::new());
        Ok(Arc::new(MockConnector::new(service)))
    } else {
        Ok(Arc::new(HttpConnector))
    }
}

#[cfg(not(any(feature = "mock-service", debug_assertions)))]
fn build_connector(settings: &ClientSettings) -> Result<Arc<dyn Connector>, anyhow::Error> {
    if settings.mock_enabled {
        return Err(anyhow!(
            "Mock leaderboard service requires mock-service feature or debug build"
        ));
    }
    Ok(Arc::new(HttpConnector))
}

pub fn build_reqwest_client(timeout: Duration) -> Result<ClientWithMiddleware, Error> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(ClientBuilder::new(client).with(LoggingMiddleware).build())
}

struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let method = req.method().clone();
        let url = req.url().clone();

        info!("Making {} request to: {}", method, url);

        let result = next.run(req, extensions).await;

        match &result {
            Ok(response) => {
                info!("{} {} -> Status: {}", method, url, response.status());
            }
            Err(error) => {
                warn!("{} {} -> Error: {:?}", method, url, error);
            }
        }

        result
    }
}
