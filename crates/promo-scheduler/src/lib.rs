//! Scheduled jobs for the Promo Credit Ledger.
//!
//! Two loops run on tokio: the daily reset (balances, quotas, premium
//! expiry) and the weekly reset (leaderboard clicks). Each loop sleeps until
//! the next firing computed from a UTC [`Schedule`], then hands the job to a
//! [`JobRunner`] on the blocking pool. A `CreditEngine` is itself a runner.
//! [`SchedulerHandle::shutdown`] stops both loops after any sweep in
//! progress.

pub mod error;
pub mod schedule;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use schedule::{Job, Schedule};
pub use scheduler::{JobEvent, JobEvents, JobRunner, Scheduler, SchedulerHandle};
