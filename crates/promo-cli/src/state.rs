use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use fd_lock::{RwLock, RwLockWriteGuard};
use promo_ledger::{CreditEngine, EngineConfig, ResetReport};
use promo_scheduler::{Job, JobRunner, SchedulerError, SchedulerResult};
use promo_store::InMemoryEntityStore;
use tracing::debug;

/// Advisory lock on `<state>.lock`. Every process that changes the state
/// file holds it from load until save, so no writer saves over another's
/// changes.
pub struct StateLock {
    path: PathBuf,
    lock: RwLock<File>,
}

impl StateLock {
    pub fn open(state: &Path) -> anyhow::Result<Self> {
        let mut name = OsString::from(state.as_os_str());
        name.push(".lock");
        let path = PathBuf::from(name);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening lock file {}", path.display()))?;
        Ok(Self {
            path,
            lock: RwLock::new(file),
        })
    }

    /// Block until no other process holds the lock.
    pub fn acquire(&mut self) -> anyhow::Result<RwLockWriteGuard<'_, File>> {
        let guard = self
            .lock
            .write()
            .with_context(|| format!("locking {}", self.path.display()))?;
        debug!(path = %self.path.display(), "state lock acquired");
        Ok(guard)
    }
}

pub fn load(state: &Path) -> anyhow::Result<InMemoryEntityStore> {
    InMemoryEntityStore::load_snapshot(state)
        .with_context(|| format!("loading state from {}", state.display()))
}

pub fn save(engine: &CreditEngine, state: &Path) -> anyhow::Result<()> {
    engine
        .store()
        .save_snapshot(state)
        .with_context(|| format!("saving state to {}", state.display()))
}

/// Runs each scheduled job against the state file as it is on disk when the
/// job fires: lock, load, sweep, save.
pub struct StateFileJobs {
    state: PathBuf,
    config: EngineConfig,
}

impl StateFileJobs {
    pub fn new(state: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            state: state.into(),
            config,
        }
    }

    fn run_locked(&self, job: Job) -> anyhow::Result<ResetReport> {
        let mut lock = StateLock::open(&self.state)?;
        let _guard = lock.acquire()?;
        let engine = CreditEngine::new(load(&self.state)?, self.config.clone());
        let report = engine.run_job(job)?;
        save(&engine, &self.state)?;
        Ok(report)
    }
}

impl JobRunner for StateFileJobs {
    fn run_job(&self, job: Job) -> SchedulerResult<ResetReport> {
        self.run_locked(job)
            .map_err(|err| SchedulerError::Runner(format!("{err:#}")))
    }
}
