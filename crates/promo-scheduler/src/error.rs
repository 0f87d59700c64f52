use promo_ledger::EngineError;

/// Errors produced by scheduled jobs.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("reset failed: {0}")]
    Engine(#[from] EngineError),

    /// The runner could not prepare or persist the state a job works on.
    #[error("job runner failed: {0}")]
    Runner(String),

    /// The blocking sweep panicked or was cancelled.
    #[error("job task failed: {0}")]
    Join(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
