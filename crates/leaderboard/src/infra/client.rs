use std::{sync::Arc, time::Duration};

use leaderboard_core::{
    CoreError, LeaderboardPage, LeaderboardQuery, Metadata, Pagination, RankQuery, RankResult,
    ScoreResult, ScoreSubmission,
};
use log::{debug, error, warn};
use mime::APPLICATION_JSON;
use reqwest_middleware::{
    self,
    reqwest::{
        header::{ACCEPT, CONTENT_TYPE},
        Method, Response, StatusCode, Url,
    },
    ClientWithMiddleware,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{config::ClientConfig, startup::build_reqwest_client};

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Error, Debug)]
pub enum Error {
    #[error("credential not configured")]
    NotConfigured,
    #[error("leaderboard facade has been shut down")]
    ShutDown,
    #[error("failed to connect to leaderboard service: {0}")]
    ConnectFailed(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("invalid client configuration: {0}")]
    Config(String),
    #[error("transport error talking to leaderboard service: {0}")]
    Send(#[from] reqwest_middleware::reqwest::Error),
    #[error("transport error talking to leaderboard service: {0}")]
    SendMiddleware(#[from] reqwest_middleware::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("leaderboard service rejected request ({status}): {message}")]
    Service { status: u16, message: String },
    #[error("leaderboard service temporarily unavailable: {0}")]
    Transient(String),
    #[error("invalid response from leaderboard service: {0}")]
    Decode(String),
    #[error("leaderboard call aborted: {0}")]
    Aborted(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<CoreError> for Error {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::MalformedPage(_) => Error::Decode(value.to_string()),
            CoreError::Validation(_) | CoreError::InvalidPeriod(_) => {
                Error::Validation(value.to_string())
            }
        }
    }
}

/// Remote leaderboard operations, one network round trip each
#[async_trait::async_trait]
pub trait LeaderboardService: Send + Sync {
    async fn submit_score(&self, submission: ScoreSubmission) -> Result<ScoreResult, Error>;
    async fn get_leaderboard(&self, query: LeaderboardQuery) -> Result<LeaderboardPage, Error>;
    async fn get_player_rank(&self, query: RankQuery) -> Result<RankResult, Error>;
}

/// Builds the service handle for one configuration. Called again on every
/// reconfiguration.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &ClientConfig) -> Result<Arc<dyn LeaderboardService>, Error>;
}

/// Connects to the real service over HTTP
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, config: &ClientConfig) -> Result<Arc<dyn LeaderboardService>, Error> {
        let client = build_reqwest_client(config.timeout)?;
        Ok(Arc::new(LeaderboardClient::new(client, config)))
    }
}

#[derive(Clone)]
pub struct LeaderboardClient {
    pub base_url: Url,
    pub client: ClientWithMiddleware,
    credential: SecretString,
    timeout: Duration,
}

#[derive(Serialize)]
struct SubmitScoreBody<'a> {
    player_id: &'a str,
    score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Metadata>,
}

impl LeaderboardClient {
    pub fn new(client: ClientWithMiddleware, config: &ClientConfig) -> Self {
        Self {
            base_url: config.endpoint.clone(),
            client,
            credential: SecretString::from(config.credential.expose_secret().to_owned()),
            timeout: config.timeout,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::Config(format!("{} cannot be a base url", self.base_url)))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn map_send_error(&self, err: reqwest_middleware::Error) -> Error {
        let timed_out = match &err {
            reqwest_middleware::Error::Reqwest(e) => e.is_timeout(),
            reqwest_middleware::Error::Middleware(_) => false,
        };
        if timed_out {
            Error::Timeout(self.timeout)
        } else {
            Error::SendMiddleware(err)
        }
    }

    async fn send_request_internal(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        idempotency_key: Option<&str>,
    ) -> Result<Response, Error> {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(self.credential.expose_secret())
            .header(ACCEPT, APPLICATION_JSON.as_ref());

        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        if let Some(b) = body {
            request = request
                .header(CONTENT_TYPE, APPLICATION_JSON.as_ref())
                .body(b);
        }

        let response = request.send().await.map_err(|e| {
            error!("error sending to leaderboard service: {}", e);
            self.map_send_error(e)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to read {} error body: {}", status, e);
                String::new()
            }
        };
        let message = service_message(status, &body);
        match status {
            StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::BAD_GATEWAY
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS => Err(Error::Transient(format!(
                "status {}: {}",
                status.as_u16(),
                message
            ))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Service {
                status: status.as_u16(),
                message: format!("unauthorized: {}", message),
            }),
            _ => Err(Error::Service {
                status: status.as_u16(),
                message,
            }),
        }
    }

    pub async fn send_request<T>(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        idempotency_key: Option<&str>,
    ) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let response = self
            .send_request_internal(method, url, body, idempotency_key)
            .await?;

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Pulls the service's own message out of an error body, falling back to
/// the raw text and then the status reason.
fn service_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait::async_trait]
impl LeaderboardService for LeaderboardClient {
    async fn submit_score(&self, submission: ScoreSubmission) -> Result<ScoreResult, Error> {
        debug!(
            "submitting score {} for {} to {}",
            submission.score, submission.player_id, submission.leaderboard_id
        );
        let url = self.endpoint(&["v1", "leaderboards", &submission.leaderboard_id, "scores"])?;

        let body = serde_json::to_vec(&SubmitScoreBody {
            player_id: &submission.player_id,
            score: submission.score,
            metadata: submission.metadata.as_ref(),
        })
        .map_err(|e| Error::Validation(format!("failed to serialize score: {}", e)))?;

        self.send_request::<ScoreResult>(
            Method::POST,
            url,
            Some(body),
            submission.idempotency_key.as_deref(),
        )
        .await
    }

    async fn get_leaderboard(&self, query: LeaderboardQuery) -> Result<LeaderboardPage, Error> {
        let mut url = self.endpoint(&["v1", "leaderboards", &query.leaderboard_id, "entries"])?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("limit", &query.effective_limit().to_string());
            match query.pagination() {
                Pagination::First => {}
                Pagination::Cursor(cursor) => {
                    params.append_pair("cursor", &cursor);
                }
                Pagination::Offset(offset) => {
                    params.append_pair("offset", &offset.to_string());
                }
                Pagination::AroundRank(rank) => {
                    params.append_pair("around_rank", &rank.to_string());
                }
            }
            if let Some(period) = query.period.as_query_value() {
                params.append_pair("period", &period);
            }
            if let Some(view) = &query.view {
                params.append_pair("view", view);
            }
        }

        let page = self
            .send_request::<LeaderboardPage>(Method::GET, url, None, None)
            .await?;
        Ok(page.normalize()?)
    }

    async fn get_player_rank(&self, query: RankQuery) -> Result<RankResult, Error> {
        let mut url = self.endpoint(&[
            "v1",
            "leaderboards",
            &query.leaderboard_id,
            "players",
            &query.player_id,
            "rank",
        ])?;
        {
            let mut params = url.query_pairs_mut();
            if let Some(period) = query.period.as_query_value() {
                params.append_pair("period", &period);
            }
            if let Some(view) = &query.view {
                params.append_pair("view", view);
            }
        }
        // An empty query string would otherwise leave a trailing '?'
        if url.query() == Some("") {
            url.set_query(None);
        }

        self.send_request::<RankResult>(Method::GET, url, None, None)
            .await
    }
}
