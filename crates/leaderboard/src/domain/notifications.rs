use std::{fmt, marker::PhantomData};

use async_channel::Receiver;
use leaderboard_core::{LeaderboardPage, Operation, OperationFailure, RankResult, ScoreResult};

/// Handle returned by every facade call, echoed on its notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Terminal outcome of one operation, tagged by operation kind
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    ScoreSubmitted(Result<ScoreResult, OperationFailure>),
    Leaderboard(Result<LeaderboardPage, OperationFailure>),
    PlayerRank(Result<RankResult, OperationFailure>),
}

impl Outcome {
    pub fn operation(&self) -> Operation {
        match self {
            Self::ScoreSubmitted(_) => Operation::SubmitScore,
            Self::Leaderboard(_) => Operation::GetLeaderboard,
            Self::PlayerRank(_) => Operation::GetPlayerRank,
        }
    }

    pub fn failure(&self) -> Option<&OperationFailure> {
        match self {
            Self::ScoreSubmitted(Err(failure))
            | Self::Leaderboard(Err(failure))
            | Self::PlayerRank(Err(failure)) => Some(failure),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub request: RequestId,
    pub outcome: Outcome,
}

impl Notification {
    /// Hands the outcome to the matching observer callback
    pub fn dispatch<O: LeaderboardObserver + ?Sized>(self, observer: &mut O) {
        let request = self.request;
        match self.outcome {
            Outcome::ScoreSubmitted(Ok(result)) => observer.on_score_submitted(request, result),
            Outcome::Leaderboard(Ok(page)) => observer.on_leaderboard(request, page),
            Outcome::PlayerRank(Ok(rank)) => observer.on_player_rank(request, rank),
            Outcome::ScoreSubmitted(Err(failure))
            | Outcome::Leaderboard(Err(failure))
            | Outcome::PlayerRank(Err(failure)) => observer.on_failure(request, failure),
        }
    }
}

/// Host-side receiver of facade outcomes. Callbacks run on the thread that
/// pumps the [`Inbox`], one at a time.
pub trait LeaderboardObserver {
    fn on_score_submitted(&mut self, _request: RequestId, _result: ScoreResult) {}
    fn on_leaderboard(&mut self, _request: RequestId, _page: LeaderboardPage) {}
    fn on_player_rank(&mut self, _request: RequestId, _rank: RankResult) {}
    fn on_failure(&mut self, _request: RequestId, _failure: OperationFailure) {}
}

/// Queue of completed operations, drained by the host once per tick.
///
/// Not `Send`: it stays on the thread that built the facade, which is the
/// only thread observer callbacks ever run on.
pub struct Inbox {
    receiver: Receiver<Notification>,
    _host_thread: PhantomData<*const ()>,
}

impl Inbox {
    pub(crate) fn new(receiver: Receiver<Notification>) -> Self {
        Self {
            receiver,
            _host_thread: PhantomData,
        }
    }

    /// Delivers every notification queued when the call started and returns
    /// how many were delivered. Notifications produced by the observer while
    /// pumping wait for the next tick.
    pub fn pump<O: LeaderboardObserver + ?Sized>(&mut self, observer: &mut O) -> usize {
        let queued = self.receiver.len();
        let mut delivered = 0;
        while delivered < queued {
            match self.receiver.try_recv() {
                Ok(notification) => {
                    notification.dispatch(observer);
                    delivered += 1;
                }
                Err(_) => break,
            }
        }
        delivered
    }

    /// Takes the next completed notification without dispatching it
    pub fn try_next(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}
