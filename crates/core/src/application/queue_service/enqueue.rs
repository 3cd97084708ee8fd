// Enqueue Use Case

use super::QueueService;
use crate::application::constants::{MAX_JOB_NAME_LEN, MAX_PAYLOAD_DEPTH};
use crate::domain::{EventPayload, Job, JobId, JobOptions, JobProps, JobStatus, QueueEvent};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Enqueue request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub payload: serde_json::Value,

    #[serde(default)]
    pub opts: JobOptions,
}

impl NewJob {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            opts: JobOptions::default(),
        }
    }

    pub fn with_opts(mut self, opts: JobOptions) -> Self {
        self.opts = opts;
        self
    }
}

/// Validate an enqueue request before touching storage
pub fn validate_request(req: &NewJob) -> Result<()> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("Job name cannot be empty".into()));
    }
    if req.name.len() > MAX_JOB_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Job name too long (max {} bytes)",
            MAX_JOB_NAME_LEN
        )));
    }
    if json_depth(&req.payload) > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "Payload too deeply nested (max depth {})",
            MAX_PAYLOAD_DEPTH
        )));
    }
    req.opts.validate()?;
    Ok(())
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

impl QueueService {
    /// Enqueue a job
    pub async fn add(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
        opts: JobOptions,
    ) -> Result<Job> {
        let req = NewJob {
            name: name.into(),
            payload,
            opts,
        };
        validate_request(&req)?;
        self.persist_new(req).await
    }

    /// Enqueue with a typed payload
    pub async fn add_typed<T: Serialize>(
        &self,
        name: impl Into<String>,
        payload: &T,
        opts: JobOptions,
    ) -> Result<Job> {
        let payload = serde_json::to_value(payload)?;
        self.add(name, payload, opts).await
    }

    /// Enqueue several jobs. Every request is validated before the first insert.
    pub async fn add_bulk(&self, requests: Vec<NewJob>) -> Result<Vec<Job>> {
        for req in &requests {
            validate_request(req)?;
        }
        let mut created = Vec::with_capacity(requests.len());
        for req in requests {
            created.push(self.persist_new(req).await?);
        }
        Ok(created)
    }

    async fn persist_new(&self, req: NewJob) -> Result<Job> {
        let job = Job::create(JobProps {
            id: JobId::parse(self.deps.ids.generate_id())?,
            queue_name: self.queue.clone(),
            job_name: req.name,
            payload: req.payload,
            opts: req.opts,
            now_millis: self.now(),
        })?;

        self.deps.jobs.insert(&job).await?;

        info!(
            job_id = %job.id(),
            queue = %self.queue,
            job_name = %job.job_name(),
            priority = job.priority().value(),
            status = %job.status(),
            "Job added"
        );

        self.emit(QueueEvent::for_job(&job, EventPayload::Added { job: job.clone() }));
        if job.status() == JobStatus::Delayed {
            if let Some(delayed_until) = job.delayed_until() {
                self.emit(QueueEvent::for_job(
                    &job,
                    EventPayload::Delayed { delayed_until },
                ));
            }
        }
        Ok(job)
    }
}
