mod facade;
mod notifications;

pub use facade::{FacadeStatus, LeaderboardFacade};
pub use notifications::{Inbox, LeaderboardObserver, Notification, Outcome, RequestId};
