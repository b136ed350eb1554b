use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
    time::Duration,
};

use async_channel::{unbounded, Sender};
use leaderboard_core::{
    validate_query, validate_rank_query, validate_submission, CoreError, LeaderboardQuery,
    Operation, OperationFailure, RankQuery, ScoreSubmission,
};
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::notifications::{Inbox, Notification, Outcome, RequestId};
use crate::{
    config::ClientConfig,
    infra::client::{Connector, Error, HttpConnector, LeaderboardService},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeStatus {
    /// No usable credential; every call fails locally
    Disabled,
    Ready,
    ShutDown,
}

impl fmt::Display for FacadeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Ready => write!(f, "ready"),
            Self::ShutDown => write!(f, "shut down"),
        }
    }
}

/// One configuration's service handle. In-flight operations hold their own
/// reference, so a swapped-out connection lives until they finish.
struct Connection {
    service: Arc<dyn LeaderboardService>,
    timeout: Duration,
    generation: u64,
}

enum Slot {
    Disabled,
    /// A credential was set but the connector failed
    Unreachable(String),
    Active(Arc<Connection>),
    ShutDown,
}

impl Slot {
    fn status(&self) -> FacadeStatus {
        match self {
            Slot::Disabled | Slot::Unreachable(_) => FacadeStatus::Disabled,
            Slot::Active(_) => FacadeStatus::Ready,
            Slot::ShutDown => FacadeStatus::ShutDown,
        }
    }
}

/// Issues leaderboard requests on a background runtime and queues exactly
/// one [`Notification`] per request for the host's [`Inbox`].
pub struct LeaderboardFacade {
    slot: Arc<RwLock<Slot>>,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    outbox: Sender<Notification>,
    tasks: TaskTracker,
    cancel_token: CancellationToken,
    next_request: AtomicU64,
    generation: AtomicU64,
}

impl LeaderboardFacade {
    pub fn new(config: ClientConfig, runtime: Handle) -> (Self, Inbox) {
        Self::with_connector(config, runtime, Arc::new(HttpConnector))
    }

    /// Never fails: a missing credential or a connector error leaves the
    /// facade disabled until a later [`reconfigure`](Self::reconfigure).
    pub fn with_connector(
        config: ClientConfig,
        runtime: Handle,
        connector: Arc<dyn Connector>,
    ) -> (Self, Inbox) {
        let (outbox, receiver) = unbounded();
        let facade = Self {
            slot: Arc::new(RwLock::new(Slot::Disabled)),
            connector,
            runtime,
            outbox,
            tasks: TaskTracker::new(),
            cancel_token: CancellationToken::new(),
            next_request: AtomicU64::new(1),
            generation: AtomicU64::new(0),
        };
        let slot = facade.connect(&config);
        *facade.slot.write().unwrap_or_else(PoisonError::into_inner) = slot;

        (facade, Inbox::new(receiver))
    }

    pub fn status(&self) -> FacadeStatus {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status()
    }

    /// Operations spawned and not yet finished
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Swaps in a new configuration. Operations already in flight finish on
    /// the connection they started with and still deliver their outcome.
    pub fn reconfigure(&self, config: ClientConfig) -> FacadeStatus {
        if self.status() == FacadeStatus::ShutDown {
            warn!("ignoring reconfigure on a shut down leaderboard facade");
            return FacadeStatus::ShutDown;
        }

        let next = self.connect(&config);
        let previous = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            if matches!(*slot, Slot::ShutDown) {
                warn!("leaderboard facade shut down during reconfigure");
                return FacadeStatus::ShutDown;
            }
            std::mem::replace(&mut *slot, next)
        };

        let status = self.status();
        if let Slot::Active(connection) = previous {
            info!(
                "replaced leaderboard connection #{} ({} references outstanding)",
                connection.generation,
                Arc::strong_count(&connection) - 1
            );
        }
        info!("leaderboard facade reconfigured: {}", status);
        status
    }

    /// Releases the connection and stops waiting on in-flight operations.
    /// Returns false if the facade was already shut down.
    pub fn shutdown(&self) -> bool {
        let previous = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, Slot::ShutDown)
        };
        if matches!(previous, Slot::ShutDown) {
            return false;
        }

        self.cancel_token.cancel();
        self.tasks.close();
        info!(
            "leaderboard facade shut down, abandoning {} in-flight operations",
            self.tasks.len()
        );
        true
    }

    pub fn submit_score(&self, submission: ScoreSubmission) -> RequestId {
        let validation = validate_submission(&submission);
        self.dispatch(
            Operation::SubmitScore,
            validation,
            Outcome::ScoreSubmitted,
            move |service| async move { service.submit_score(submission).await },
        )
    }

    /// `limit` is clamped to the service maximum before dispatch.
    pub fn get_leaderboard(&self, mut query: LeaderboardQuery) -> RequestId {
        let limit = query.effective_limit();
        if limit != query.limit {
            debug!("clamping leaderboard limit {} to {}", query.limit, limit);
            query.limit = limit;
        }
        let validation = validate_query(&query);
        self.dispatch(
            Operation::GetLeaderboard,
            validation,
            Outcome::Leaderboard,
            move |service| async move { service.get_leaderboard(query).await },
        )
    }

    pub fn get_player_rank(&self, query: RankQuery) -> RequestId {
        let validation = validate_rank_query(&query);
        self.dispatch(
            Operation::GetPlayerRank,
            validation,
            Outcome::PlayerRank,
            move |service| async move { service.get_player_rank(query).await },
        )
    }

    fn connect(&self, config: &ClientConfig) -> Slot {
        if !config.has_credential() {
            warn!("no leaderboard credential configured, facade disabled");
            return Slot::Disabled;
        }

        match self.connector.connect(config) {
            Ok(service) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                info!(
                    "leaderboard connection #{} to {} (timeout {:?})",
                    generation, config.endpoint, config.timeout
                );
                Slot::Active(Arc::new(Connection {
                    service,
                    timeout: config.timeout,
                    generation,
                }))
            }
            Err(e) => {
                error!(
                    "failed to connect to leaderboard service at {}: {}",
                    config.endpoint, e
                );
                Slot::Unreachable(e.to_string())
            }
        }
    }

    fn active_connection(&self) -> Result<Arc<Connection>, Error> {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            Slot::Active(connection) => Ok(connection.clone()),
            Slot::Disabled => Err(Error::NotConfigured),
            Slot::Unreachable(reason) => Err(Error::ConnectFailed(reason.clone())),
            Slot::ShutDown => Err(Error::ShutDown),
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    /// Queues a local failure. It reaches the observer on the next pump,
    /// never from inside the calling method.
    fn reject<T>(
        &self,
        request: RequestId,
        operation: Operation,
        wrap: fn(Result<T, OperationFailure>) -> Outcome,
        err: Error,
    ) {
        warn!("{} {} rejected: {}", operation, request, err);
        let outcome = wrap(Err(OperationFailure::new(operation, err.to_string())));
        if self
            .outbox
            .try_send(Notification { request, outcome })
            .is_err()
        {
            debug!("inbox dropped, discarding {} {}", operation, request);
        }
    }

    fn dispatch<T, F, Fut>(
        &self,
        operation: Operation,
        validation: Result<(), CoreError>,
        wrap: fn(Result<T, OperationFailure>) -> Outcome,
        call: F,
    ) -> RequestId
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn LeaderboardService>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let request = self.next_request_id();

        let connection = match self.active_connection() {
            Ok(connection) => connection,
            Err(e) => {
                self.reject(request, operation, wrap, e);
                return request;
            }
        };
        if let Err(e) = validation {
            self.reject(request, operation, wrap, e.into());
            return request;
        }

        debug!(
            "dispatching {} {} on connection #{}",
            operation, request, connection.generation
        );

        let slot = self.slot.clone();
        let outbox = self.outbox.clone();
        let cancel_token = self.cancel_token.clone();
        let runtime = self.runtime.clone();
        self.tasks.spawn_on(
            async move {
                let timeout = connection.timeout;
                // Own task, so a panicking service still yields a failure
                let mut handle = runtime.spawn(tokio::time::timeout(
                    timeout,
                    call(connection.service.clone()),
                ));
                let result = tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => {
                        handle.abort();
                        debug!("{} {} abandoned at shutdown", operation, request);
                        return;
                    }
                    joined = &mut handle => match joined {
                        Ok(result) => result.unwrap_or_else(|_| Err(Error::Timeout(timeout))),
                        Err(e) => {
                            error!("{} {} aborted: {}", operation, request, e);
                            Err(Error::Aborted(e.to_string()))
                        }
                    }
                };
                drop(connection);

                let result = result.map_err(|e| {
                    warn!("{} {} failed: {}", operation, request, e);
                    OperationFailure::new(operation, e.to_string())
                });

                // Checked under the slot lock: nothing is queued once
                // shutdown has returned.
                let slot = slot.read().unwrap_or_else(PoisonError::into_inner);
                if matches!(*slot, Slot::ShutDown) {
                    debug!("{} {} completed after shutdown, discarding", operation, request);
                    return;
                }
                if outbox
                    .try_send(Notification {
                        request,
                        outcome: wrap(result),
                    })
                    .is_err()
                {
                    debug!("inbox dropped, discarding {} {}", operation, request);
                }
            },
            &self.runtime,
        );

        request
    }
}

impl Drop for LeaderboardFacade {
    fn drop(&mut self) {
        self.shutdown();
    }
}
