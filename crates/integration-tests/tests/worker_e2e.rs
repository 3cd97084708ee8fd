//! Workers in two "processes" draining one queue end to end

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{deps, open_queue, TestDb};
use conveyor_core::application::{
    shutdown_channel, QueueService, QueueServiceConfig, Sweeper, Worker, WorkerConfig,
};
use conveyor_core::domain::{EventKind, Job, JobOptions, JobStatus};
use conveyor_core::error::AppError;
use conveyor_core::port::{HandlerError, JobHandler, SystemTimeProvider};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct SumRequest {
    a: i64,
    b: i64,
    #[serde(default)]
    fail_once: bool,
}

/// Adds two numbers; jobs flagged `fail_once` fail on their first run
#[derive(Default)]
struct SumHandler {
    failed_once: Mutex<HashSet<String>>,
}

#[async_trait]
impl JobHandler for SumHandler {
    async fn handle(&self, job: &Job) -> Result<Option<serde_json::Value>, HandlerError> {
        let req: SumRequest = job.payload_as()?;
        if req.fail_once && self.failed_once.lock().unwrap().insert(job.id().to_string()) {
            return Err(HandlerError::Failed("transient".into()));
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(Some(json!(req.a + req.b)))
    }
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        batch_size: 3,
        idle_sleep: Duration::from_millis(5),
        heartbeat_interval: Duration::from_millis(50),
        job_timeout: Some(Duration::from_secs(5)),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_workers_drain_queue() {
    let db = TestDb::new().await;
    let clock = Arc::new(SystemTimeProvider);
    let producer = open_queue(&deps(&db.pool, clock.clone()), "sums", 4).await;

    let mut expected = Vec::new();
    for i in 0..12_i64 {
        let opts = JobOptions::default().with_attempts(2);
        let payload = json!({"a": i, "b": 100, "fail_once": i % 4 == 0});
        let job = producer.add("sum", payload, opts).await.unwrap();
        expected.push((job.id().clone(), i + 100));
    }
    producer
        .add("bad", json!({"a": "x"}), JobOptions::default())
        .await
        .unwrap();

    let other_pool = db.other_process().await;
    let consumers = [
        Arc::new(
            QueueService::open(
                producer.queue_name().clone(),
                deps(&db.pool, clock.clone()),
                QueueServiceConfig::default(),
            )
            .await
            .unwrap(),
        ),
        Arc::new(
            QueueService::open(
                producer.queue_name().clone(),
                deps(&other_pool, clock.clone()),
                QueueServiceConfig::default(),
            )
            .await
            .unwrap(),
        ),
    ];

    let completions = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&completions);
    consumers[0].on(EventKind::Completed, move |_| *sink.lock().unwrap() += 1);
    let sink = Arc::clone(&completions);
    consumers[1].on(EventKind::Completed, move |_| *sink.lock().unwrap() += 1);

    let handler = Arc::new(SumHandler::default());
    let (shutdown_tx, token) = shutdown_channel();
    let mut handles = Vec::new();
    for svc in &consumers {
        let worker = Worker::with_config(Arc::clone(svc), handler.clone(), worker_config());
        let token = token.clone();
        handles.push(tokio::spawn(async move { worker.run(token).await }));
    }
    let sweeper = Sweeper::new(consumers.to_vec()).with_interval(Duration::from_millis(20));
    handles.push(tokio::spawn(async move {
        sweeper.run(token).await;
        Ok::<(), AppError>(())
    }));

    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let counts = producer.count_jobs_by_status().await.unwrap();
            if counts[&JobStatus::Completed] == 12 && counts[&JobStatus::Failed] == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    shutdown_tx.shutdown();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
    assert!(drained.is_ok(), "queue did not drain in time");

    assert_eq!(*completions.lock().unwrap(), 12);
    for (id, sum) in expected {
        let job = producer.get_job(id.as_str()).await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.return_value(), Some(&json!(sum)));
        let retried = (sum - 100) % 4 == 0;
        assert_eq!(job.attempts_made(), u32::from(retried));
    }

    let failed = producer
        .get_jobs_by_status(JobStatus::Failed, 0, 10)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].failed_reason().unwrap().starts_with("Invalid payload"));

    other_pool.close().await;
    db.cleanup().await;
}
