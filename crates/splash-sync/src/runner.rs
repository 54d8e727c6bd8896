//! Runs at most one reconciliation job at a time in the background.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{run_job, JobContext, JobKind, JobReport};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("another job is already running")]
    Busy,
    #[error("job task ended without a report: {0}")]
    Crashed(String),
}

#[derive(Debug, Clone, Default)]
pub struct JobRunner {
    active: Arc<AtomicBool>,
}

/// Clears the busy flag when the job task ends, even on panic.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl JobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Spawn `kind` on the current runtime. Fails with [`RunnerError::Busy`]
    /// while a previously started job has not finished.
    pub fn start(&self, kind: JobKind, ctx: JobContext) -> Result<JobHandle, RunnerError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(job = kind.name(), "job refused, another job is running");
            return Err(RunnerError::Busy);
        }
        let guard = ActiveGuard(Arc::clone(&self.active));
        let (tx, rx) = oneshot::channel();

        debug!(job = kind.name(), "job spawned");
        let task = tokio::spawn(async move {
            let report = run_job(kind, &ctx).await;
            drop(guard);
            // receiver may have been dropped; the report is also logged
            let _ = tx.send(report);
        });

        Ok(JobHandle {
            job: kind,
            task,
            done: rx,
        })
    }
}

#[derive(Debug)]
pub struct JobHandle {
    job: JobKind,
    task: tokio::task::JoinHandle<()>,
    done: oneshot::Receiver<JobReport>,
}

impl JobHandle {
    pub fn job(&self) -> JobKind {
        self.job
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the job's report.
    pub async fn wait(self) -> Result<JobReport, RunnerError> {
        match self.done.await {
            Ok(report) => Ok(report),
            Err(_) => {
                let reason = match self.task.await {
                    Err(err) if err.is_panic() => "panicked".to_string(),
                    Err(err) => err.to_string(),
                    Ok(()) => "report dropped".to_string(),
                };
                Err(RunnerError::Crashed(reason))
            }
        }
    }
}
