// Sweeper - periodic stall and delay sweeps across queues

use crate::application::constants::{DEFAULT_SWEEP_BATCH, DEFAULT_SWEEP_INTERVAL};
use crate::application::queue_service::{QueueService, SweepStats};
use crate::application::worker::ShutdownToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Background maintenance for a set of queues
///
/// Safe to run in several processes against one database: every write it makes is a
/// revision-checked update, so a job changed concurrently is skipped rather than clobbered.
pub struct Sweeper {
    services: Vec<Arc<QueueService>>,
    interval: Duration,
    batch: u32,
}

impl Sweeper {
    pub fn new(services: Vec<Arc<QueueService>>) -> Self {
        Self {
            services,
            interval: DEFAULT_SWEEP_INTERVAL,
            batch: DEFAULT_SWEEP_BATCH,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch(mut self, batch: u32) -> Self {
        self.batch = batch;
        self
    }

    /// One pass over every queue. Errors are logged and reported per queue.
    pub async fn run_once(&self) -> SweepStats {
        let mut total = SweepStats::default();
        for service in &self.services {
            match service.sweep(self.batch).await {
                Ok(stats) => {
                    total.promoted += stats.promoted;
                    total.stalled += stats.stalled;
                    total.failed += stats.failed;
                }
                Err(e) => {
                    error!(queue = %service.queue_name(), error = %e, "Sweep failed");
                    service.report_worker_error(None, &e);
                }
            }
        }
        total
    }

    /// Sweep on every tick until shutdown
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            queues = self.services.len(),
            interval_ms = self.interval.as_millis() as u64,
            "Sweeper started"
        );
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Sweeper stopped");
    }
}
