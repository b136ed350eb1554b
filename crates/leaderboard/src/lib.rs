pub mod config;
pub mod domain;
pub mod infra;
pub mod startup;

pub use config::*;
pub use domain::{
    FacadeStatus, Inbox, LeaderboardFacade, LeaderboardObserver, Notification, Outcome, RequestId,
};
pub use infra::client::{Connector, Error, HttpConnector, LeaderboardClient, LeaderboardService};
#[cfg(any(feature = "mock-service", debug_assertions))]
pub use infra::mock::{MockConnector, MockLeaderboard, BRACKETS_VIEW};
pub use leaderboard_core::*;
pub use startup::*;
