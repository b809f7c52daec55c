use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{
        mark_job_failed, mark_job_succeeded, reclaim_stuck_jobs, reserve_job, retry_job_after,
        JobQueueError, JOB_MAX_ATTEMPTS,
    },
    models::Job,
    state::AppState,
};

pub mod ingest;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;

    /// Called once when a job exhausts its retry budget, before it is
    /// marked failed. Handlers clean up domain state here.
    async fn on_exhausted(&self, _state: Arc<AppState>, _job: &Job) {}
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
    reclaim_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers: map,
            poll_interval,
            reclaim_interval: Duration::from_secs(60),
        }
    }

    /// Run `concurrency` worker loops against the shared queue. Reservation
    /// uses row locks, so the loops never double-process a job; the pool
    /// size is the upper bound on in-flight ingestions.
    pub fn spawn_pool(self: Arc<Self>, concurrency: usize) -> Vec<JoinHandle<()>> {
        let workers = concurrency.max(1);
        info!(workers, "starting worker pool");
        (0..workers)
            .map(|index| {
                let worker = self.clone();
                tokio::spawn(async move { worker.run(index).await })
            })
            .collect()
    }

    pub async fn run(&self, index: usize) {
        info!(worker = index, "worker started");
        let mut last_reclaim = tokio::time::Instant::now();
        loop {
            if index == 0 && last_reclaim.elapsed() >= self.reclaim_interval {
                self.reclaim();
                last_reclaim = tokio::time::Instant::now();
            }

            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Drain the queue: process jobs until a pass finds nothing runnable.
    /// Used by tests and maintenance tasks; the long-running pool calls
    /// `run` instead.
    pub async fn run_pending(&self) -> Result<usize, JobQueueError> {
        let mut processed = 0;
        while self.tick().await? {
            processed += 1;
        }
        Ok(processed)
    }

    fn reclaim(&self) {
        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                error!(?err, "failed to obtain database connection for reclaim");
                return;
            }
        };
        match reclaim_stuck_jobs(&mut conn) {
            Ok(0) => {}
            Ok(count) => warn!(count, "requeued jobs stuck in processing"),
            Err(err) => error!(error = %err, "failed to reclaim stuck jobs"),
        }
    }

    async fn tick(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                error!(?err, "failed to obtain database connection in worker");
                return Ok(false);
            }
        };

        let job_opt = reserve_job(&mut conn, &job_types)?;
        drop(conn);

        if let Some(job) = job_opt {
            if let Some(handler) = self.handlers.get(job.job_type.as_str()) {
                let result = handler.handle(self.state.clone(), job.clone()).await;
                match result {
                    JobExecution::Success => {
                        if let Ok(mut conn) = self.state.db() {
                            mark_job_succeeded(&mut conn, job.id)?;
                            info!(job_id = %job.id, job_type = %job.job_type, "job completed successfully");
                        } else {
                            error!("failed to mark job succeeded due to pool error");
                        }
                    }
                    JobExecution::Retry { delay, error } => {
                        if job.attempts >= JOB_MAX_ATTEMPTS {
                            error!(job_id = %job.id, job_type = %job.job_type, %error, "job retry budget exhausted");
                            handler.on_exhausted(self.state.clone(), &job).await;
                            if let Ok(mut conn) = self.state.db() {
                                mark_job_failed(&mut conn, job.id, &error)?;
                            } else {
                                error!("failed to mark exhausted job failed due to pool error");
                            }
                        } else {
                            warn!(job_id = %job.id, job_type = %job.job_type, %error, "job will retry");
                            if let Ok(mut conn) = self.state.db() {
                                retry_job_after(&mut conn, job.id, delay, &error)?;
                            } else {
                                error!("failed to requeue job for retry due to pool error");
                            }
                        }
                    }
                    JobExecution::Failed { error } => {
                        error!(job_id = %job.id, job_type = %job.job_type, %error, "job failed");
                        if let Ok(mut conn) = self.state.db() {
                            mark_job_failed(&mut conn, job.id, &error)?;
                        } else {
                            error!("failed to mark job failed due to pool error");
                        }
                    }
                }
            } else {
                error!(job_type = %job.job_type, "no handler registered for job type");
                if let Ok(mut conn) = self.state.db() {
                    mark_job_failed(&mut conn, job.id, "no handler registered")?;
                } else {
                    error!("failed to mark job failed for missing handler due to pool error");
                }
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(ingest::IngestDocumentJob::new())]
}
