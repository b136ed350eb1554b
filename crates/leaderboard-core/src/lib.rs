//! leaderboard-core: Shared types for the leaderboard client facade
//!
//! Request and outcome shapes, the pagination and period model, and the
//! validation that runs before any request leaves the process. Nothing in
//! this crate performs I/O.

pub mod errors;
pub mod types;
pub mod validation;

pub use errors::*;
pub use types::*;
pub use validation::*;
