// Worker - Job execution loop

mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::constants::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_WORKER_BATCH_SIZE, ERROR_RECOVERY_SLEEP_DURATION,
    IDLE_SLEEP_DURATION,
};
use crate::application::queue_service::QueueService;
use crate::domain::Job;
use crate::error::Result;
use crate::port::{HandlerError, JobHandler};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Jobs claimed (and run concurrently) per poll
    pub batch_size: u32,
    pub idle_sleep: Duration,
    /// Upper bound on the lock renewal period while a handler runs.
    /// The worker renews at least three times per lock duration regardless.
    pub heartbeat_interval: Duration,
    /// Handler runs longer than this fail with `HandlerError::Timeout`
    pub job_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_WORKER_BATCH_SIZE,
            idle_sleep: IDLE_SLEEP_DURATION,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            job_timeout: None,
        }
    }
}

/// How a single job run ended
#[derive(Debug)]
enum Outcome {
    Completed(Option<serde_json::Value>),
    Failed(String),
}

/// Worker claims jobs from one queue and runs them through a `JobHandler`
pub struct Worker {
    service: Arc<QueueService>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(service: Arc<QueueService>, handler: Arc<dyn JobHandler>) -> Self {
        Self::with_config(service, handler, WorkerConfig::default())
    }

    pub fn with_config(
        service: Arc<QueueService>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            service,
            handler,
            config,
        }
    }

    /// Run worker loop with graceful shutdown support.
    /// Jobs already running when shutdown arrives are finished first.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let queue = self.service.queue_name().clone();
        info!(queue = %queue, batch_size = self.config.batch_size, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            match self.process_batch().await {
                Ok(0) => {
                    tokio::select! {
                        _ = sleep(self.config.idle_sleep) => {},
                        _ = shutdown.wait() => break,
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(queue = %queue, error = %e, "Worker error");
                    self.service.report_worker_error(None, &e);
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }
        info!(queue = %queue, "Worker stopped");
        Ok(())
    }

    /// Claim one batch and run it to completion. Returns the number of jobs processed.
    pub async fn process_batch(&self) -> Result<usize> {
        let jobs = self.service.claim_next(self.config.batch_size).await?;
        let count = jobs.len();
        join_all(jobs.into_iter().map(|job| self.process_job(job))).await;
        Ok(count)
    }

    async fn process_job(&self, job: Job) {
        let id = job.id().clone();
        let outcome = self.execute_with_heartbeat(job.clone()).await;

        let resolved = match outcome {
            Outcome::Completed(value) => self.service.complete_claim(&job, value).await,
            Outcome::Failed(reason) => self.service.fail_claim(&job, reason).await,
        };
        if let Err(e) = resolved {
            // e.g. removed or reclaimed by the stall sweep while running
            warn!(job_id = %id, error = %e, "Could not record job outcome");
            self.service.report_worker_error(Some(&id), &e);
        }
    }

    /// Renewal period: the configured interval, capped at a third of the lock duration
    fn heartbeat_period(&self) -> Duration {
        let lock_ms = u64::try_from(self.service.config().lock_duration_ms).unwrap_or(0);
        let lock_bound = Duration::from_millis((lock_ms / 3).max(1));
        self.config.heartbeat_interval.min(lock_bound)
    }

    /// Run the handler on its own task (panic isolation) while renewing the lock
    async fn execute_with_heartbeat(&self, job: Job) -> Outcome {
        let id = job.id().clone();
        let claimed = job.clone();
        let handler = Arc::clone(&self.handler);
        let job_timeout = self.config.job_timeout;
        let mut task = tokio::spawn(async move {
            match job_timeout {
                Some(limit) => match timeout(limit, handler.handle(&job)).await {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::Timeout(
                        i64::try_from(limit.as_millis()).unwrap_or(i64::MAX),
                    )),
                },
                None => handler.handle(&job).await,
            }
        });

        let mut heartbeat = interval(self.heartbeat_period());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.service.renew_claim(&claimed).await {
                        warn!(job_id = %id, error = %e, "Lock renewal failed");
                    }
                }
            }
        };

        match joined {
            Ok(Ok(value)) => Outcome::Completed(value),
            Ok(Err(HandlerError::Failed(msg))) => Outcome::Failed(msg),
            Ok(Err(other)) => Outcome::Failed(other.to_string()),
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    let panic_info = join_err.into_panic();
                    let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    error!(job_id = %id, panic_msg = %panic_msg, "Job handler panicked");
                    format!("handler panicked: {}", panic_msg)
                } else {
                    error!(job_id = %id, "Job handler task cancelled");
                    "handler task cancelled".to_string()
                };
                Outcome::Failed(reason)
            }
        }
    }
}
