//! Job runner
//!
//! A single polling loop per process. Each cycle claims up to a fixed
//! number of jobs per configured domain, sequentially, so federation side
//! effects for one domain never reorder within a cycle. Shutdown is
//! observed between jobs, never mid-job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::config::AppConfig;
use crate::data::Database;
use crate::error::AppError;
use crate::jobs::Dispatcher;
use crate::metrics::{JOBS_PROCESSED_TOTAL, JOBS_QUEUED, JOB_DURATION_SECONDS};

/// Polling job runner
pub struct JobRunner {
    db: Arc<Database>,
    config: Arc<AppConfig>,
    dispatcher: Arc<Dispatcher>,
}

impl JobRunner {
    pub fn new(db: Arc<Database>, config: Arc<AppConfig>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            db,
            config,
            dispatcher,
        }
    }

    /// Run the polling loop until the shutdown signal flips.
    ///
    /// Job store failures propagate out of `run_cycle` and stop the loop:
    /// they are infrastructure failures and must crash the runner rather
    /// than be mis-recorded as job failures.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        let poll_interval = Duration::from_secs(self.config.jobs.poll_interval_seconds);
        tracing::info!(
            poll_interval_seconds = self.config.jobs.poll_interval_seconds,
            batch_size = self.config.jobs.batch_size,
            "Job runner started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {
                    self.run_cycle().await?;
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as a shutdown request; a
                    // closed channel would otherwise wake this branch on
                    // every iteration and starve the poll.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Job runner stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run one polling cycle across all configured domains.
    ///
    /// For each domain, claim jobs in `scheduled_for` order until the queue
    /// drains or the per-cycle batch limit is hit.
    pub async fn run_cycle(&self) -> Result<(), AppError> {
        for domain in &self.config.federation.domains {
            for _ in 0..self.config.jobs.batch_size {
                let job = match self.db.claim_next_job(&domain.domain).await? {
                    Some(job) => job,
                    // Queue drained for this domain this cycle.
                    None => break,
                };

                self.process_job(&job).await?;
            }
        }

        self.refresh_queue_gauges().await?;
        Ok(())
    }

    /// Dispatch one claimed job and record the outcome.
    ///
    /// Handler errors become job failures (retryable or permanent per the
    /// error taxonomy) except database errors, which propagate: recording
    /// "the database is down" in the database is not a real failure mode.
    async fn process_job(&self, job: &crate::data::Job) -> Result<(), AppError> {
        let started = Instant::now();
        let result = self.dispatcher.dispatch(job).await;
        JOB_DURATION_SECONDS
            .with_label_values(&[&job.job_type])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                self.db.complete_job(&job.id).await?;
                self.db.append_job_log(&job.id, "completed").await?;
                JOBS_PROCESSED_TOTAL
                    .with_label_values(&[&job.job_type, "completed"])
                    .inc();
                tracing::info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
                Ok(())
            }
            Err(AppError::Database(e)) => Err(AppError::Database(e)),
            Err(e) => {
                let outcome = if e.is_retryable() { "retried" } else { "failed" };
                JOBS_PROCESSED_TOTAL
                    .with_label_values(&[&job.job_type, outcome])
                    .inc();
                self.db
                    .fail_job(&job.id, &e.to_string(), e.is_retryable())
                    .await?;
                Ok(())
            }
        }
    }

    async fn refresh_queue_gauges(&self) -> Result<(), AppError> {
        for (domain, status, count) in self.db.job_status_counts().await? {
            JOBS_QUEUED
                .with_label_values(&[&domain, &status])
                .set(count);
        }
        Ok(())
    }
}
