use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use promo_ledger::{CreditEngine, ResetReport};
use promo_store::EntityStore;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{SchedulerError, SchedulerResult};
use crate::schedule::{Job, Schedule};

/// Published after every completed job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobEvent {
    pub job: Job,
    pub report: ResetReport,
    pub finished_at: DateTime<Utc>,
}

/// A receiver of [`JobEvent`]s.
pub type JobEvents = broadcast::Receiver<JobEvent>;

/// Executes one reset job to completion. Called on the blocking pool.
pub trait JobRunner: Send + Sync + 'static {
    fn run_job(&self, job: Job) -> SchedulerResult<ResetReport>;
}

impl<S: EntityStore + 'static> JobRunner for CreditEngine<S> {
    fn run_job(&self, job: Job) -> SchedulerResult<ResetReport> {
        let report = match job {
            Job::DailyReset => self.daily_reset()?,
            Job::WeeklyReset => self.weekly_reset()?,
        };
        Ok(report)
    }
}

/// Runs the daily and weekly resets on their schedule.
pub struct Scheduler<R: JobRunner> {
    runner: Arc<R>,
    schedule: Schedule,
    event_capacity: usize,
}

impl<R: JobRunner> Scheduler<R> {
    pub fn new(runner: Arc<R>, schedule: Schedule) -> Self {
        Self {
            runner,
            schedule,
            event_capacity: 16,
        }
    }

    /// Run one job immediately. The sweep runs on the blocking pool because
    /// it takes store locks user by user.
    pub async fn run_once(runner: Arc<R>, job: Job) -> SchedulerResult<ResetReport> {
        tokio::task::spawn_blocking(move || runner.run_job(job))
            .await
            .map_err(|e| SchedulerError::Join(e.to_string()))?
    }

    /// Start both job loops on the current tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (events, _) = broadcast::channel(self.event_capacity);

        let tasks = [Job::DailyReset, Job::WeeklyReset]
            .into_iter()
            .map(|job| {
                tokio::spawn(job_loop(
                    Arc::clone(&self.runner),
                    self.schedule.clone(),
                    job,
                    events.clone(),
                    stop_rx.clone(),
                ))
            })
            .collect();

        info!(
            daily_at = %self.schedule.daily_at,
            weekly_on = %self.schedule.weekly_on,
            weekly_at = %self.schedule.weekly_at,
            "scheduler started"
        );
        SchedulerHandle {
            stop: stop_tx,
            events,
            tasks,
        }
    }
}

async fn job_loop<R: JobRunner>(
    runner: Arc<R>,
    schedule: Schedule,
    job: Job,
    events: broadcast::Sender<JobEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let now = Utc::now();
        let next = schedule.next_fire(job, now);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(%job, next = %next, "job scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop.changed() => break,
        }

        match Scheduler::run_once(Arc::clone(&runner), job).await {
            Ok(report) => {
                info!(%job, processed = report.processed, failed = report.failed, "job finished");
                // No subscribers is fine.
                let _ = events.send(JobEvent {
                    job,
                    report,
                    finished_at: Utc::now(),
                });
            }
            Err(err) => error!(%job, error = %err, "job failed"),
        }
    }
    info!(%job, "job loop stopped");
}

/// Controls a running scheduler.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    events: broadcast::Sender<JobEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Receive an event for every job that finishes from now on.
    pub fn subscribe(&self) -> JobEvents {
        self.events.subscribe()
    }

    /// Stop both loops. A sweep already in progress runs to completion
    /// first.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "job loop panicked");
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use promo_ledger::EngineConfig;
    use promo_store::InMemoryEntityStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use promo_types::UserId;

    use super::*;

    fn engine() -> Arc<CreditEngine> {
        Arc::new(CreditEngine::new(
            InMemoryEntityStore::new(),
            EngineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn run_once_resets_users() {
        let engine = engine();
        engine.register_user(UserId(1), "alice").unwrap();
        engine.debit(UserId(1), 7).unwrap();

        let report = Scheduler::run_once(Arc::clone(&engine), Job::DailyReset)
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(engine.user(UserId(1)).unwrap().credits, 10);
    }

    #[tokio::test]
    async fn weekly_job_clears_clicks() {
        let engine = engine();
        engine.register_user(UserId(1), "alice").unwrap();
        let report = Scheduler::run_once(Arc::clone(&engine), Job::WeeklyReset)
            .await
            .unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(engine.user(UserId(1)).unwrap().clicks_received, 0);
    }

    /// Counts calls and fails the first `failures` of them.
    #[derive(Default)]
    struct FlakyRunner {
        calls: AtomicUsize,
        failures: usize,
    }

    impl JobRunner for FlakyRunner {
        fn run_job(&self, _job: Job) -> SchedulerResult<ResetReport> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(SchedulerError::Runner("state file busy".into()));
            }
            Ok(ResetReport {
                processed: call,
                failed: 0,
            })
        }
    }

    #[tokio::test]
    async fn run_once_surfaces_runner_errors() {
        let runner = Arc::new(FlakyRunner {
            failures: 1,
            ..FlakyRunner::default()
        });
        let err = Scheduler::run_once(Arc::clone(&runner), Job::DailyReset)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Runner(_)));

        let report = Scheduler::run_once(Arc::clone(&runner), Job::WeeklyReset)
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_idle_loops() {
        let handle = Scheduler::new(engine(), Schedule::default()).spawn();
        let _events = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown should not hang");
    }
}
