use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::Config;
use crate::engine::processor::AttendanceProcessor;
use crate::engine::{absentees, corrections, mandays};
use crate::error::EngineError;
use crate::sync::{external, unify};

/// A tick may overrun its slot by this much before the in-flight run is
/// asked to stop at the next batch boundary.
const MISFIRE_GRACE_SECS: u64 = 120;
/// The periodic tick only needs to top up the current day; deep sweeps are
/// for bootstrap and recalculation.
const TICK_SWEEP_DAYS: i64 = 1;

/// Single-instance periodic driver for the whole derivation chain:
/// external-sync, unify, absentees, attendance processor, mandays, A-WO-A
/// corrector and reverter, in that order, each step fault-isolated.
pub struct Scheduler {
    pool: Pool<Sqlite>,
    config: Config,
    shutdown: Arc<AtomicBool>,
    run_guard: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(pool: Pool<Sqlite>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            pool,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            run_guard: Arc::new(Mutex::new(())),
        })
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until Ctrl-C. A health monitor reinstates the primary tick task
    /// if it ever dies; shutdown waits for the in-flight tick to finish.
    pub async fn run(self: Arc<Self>) -> Result<(), EngineError> {
        log::info!(
            "scheduler started: tick every {}s, monitor every {}s",
            self.config.tick_secs,
            self.config.monitor_secs
        );

        let mut job = tokio::spawn(Self::tick_loop(self.clone()));
        let mut monitor = interval(Duration::from_secs(self.config.monitor_secs));
        monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);
        monitor.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = monitor.tick() => {
                    if job.is_finished() && !self.shutdown.load(Ordering::SeqCst) {
                        log::warn!("primary tick task is gone; reinstating it");
                        job = tokio::spawn(Self::tick_loop(self.clone()));
                    }
                }
                res = tokio::signal::ctrl_c() => {
                    if let Err(err) = res {
                        log::warn!("ctrl-c handler failed: {err}");
                    }
                    log::info!("shutdown requested; waiting for the running tick");
                    self.shutdown.store(true, Ordering::SeqCst);
                    let _ = job.await;
                    break;
                }
            }
        }

        log::info!("scheduler stopped");
        Ok(())
    }

    async fn tick_loop(this: Arc<Scheduler>) {
        let mut tick = interval(Duration::from_secs(this.config.tick_secs));
        // Missed ticks coalesce into one.
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if this.shutdown.load(Ordering::SeqCst) {
                break;
            }
            this.run_chain().await;
            if this.shutdown.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    /// One tick of the chain. Exactly one run at a time: an in-process
    /// guard covers this process, the lock file covers siblings.
    pub async fn run_chain(&self) {
        let Ok(_guard) = self.run_guard.try_lock() else {
            log::info!("previous tick still running; skipping this one");
            return;
        };

        let _lock = match FileLock::acquire(self.config.lock_file_path()) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                log::info!("another process holds the scheduler lock; skipping tick");
                return;
            }
            Err(err) => {
                log::error!("could not acquire the scheduler lock file: {err}");
                return;
            }
        };

        let tick_cancel = Arc::new(AtomicBool::new(false));
        let watchdog = tokio::spawn(watch_deadline(
            tick_cancel.clone(),
            self.shutdown.clone(),
            self.config.tick_secs + MISFIRE_GRACE_SECS,
        ));

        if let Err(err) = self.sync_step().await {
            log::error!("external sync step failed: {err}");
        }
        if let Err(err) = unify::sync_all_logs(&self.pool).await {
            log::error!("unify step failed: {err}");
        }
        if let Err(err) = absentees::sweep(&self.pool, &self.config, TICK_SWEEP_DAYS).await {
            log::error!("absentee step failed: {err}");
        }
        match AttendanceProcessor::load(&self.pool, &self.config).await {
            Ok(processor) => {
                if let Err(err) = processor.run(&tick_cancel).await {
                    log::error!("attendance step failed: {err}");
                }
            }
            Err(err) => log::error!("attendance processor failed to load: {err}"),
        }
        if let Err(err) = mandays::run(&self.pool, &self.config).await {
            log::error!("mandays step failed: {err}");
        }
        if let Err(err) = corrections::correct_a_wo_a(&self.pool).await {
            log::error!("A-WO-A corrector step failed: {err}");
        }
        if let Err(err) = corrections::revert_corrections(&self.pool).await {
            log::error!("A-WO-A reverter step failed: {err}");
        }

        watchdog.abort();
    }

    async fn sync_step(&self) -> Result<(), EngineError> {
        let Some(credential) = external::load_credential(&self.pool).await? else {
            log::debug!("no external database credential; skipping pull");
            return Ok(());
        };
        let source = external::connect_source(&credential).await?;
        external::sync_logs(&self.pool, &source).await?;
        Ok(())
    }
}

async fn watch_deadline(flag: Arc<AtomicBool>, shutdown: Arc<AtomicBool>, limit_secs: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(limit_secs);
    loop {
        if shutdown.load(Ordering::SeqCst) || tokio::time::Instant::now() >= deadline {
            flag.store(true, Ordering::SeqCst);
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Cross-process mutual exclusion via O_CREAT|O_EXCL. The file holds the
/// owner's pid and is removed on drop, failure paths included.
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: PathBuf) -> Result<Option<Self>, EngineError> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(Some(Self { path }))
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            log::error!("failed to remove scheduler lock file: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FileLock;

    #[test]
    fn lock_file_is_exclusive_and_released_on_drop() {
        let path = std::env::temp_dir().join(format!("punchcard-lock-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let first = FileLock::acquire(path.clone()).unwrap();
        assert!(first.is_some());
        assert!(FileLock::acquire(path.clone()).unwrap().is_none());

        drop(first);
        assert!(!path.exists());

        let second = FileLock::acquire(path.clone()).unwrap();
        assert!(second.is_some());
    }
}
