//! Scheduler engine: job file to live triggers to queued events.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent::{EnqueueOutcome, EventQueue};
use crate::error::SchedulerError;
use crate::event::Event;
use crate::scheduler::job::{self, SchedulerJob};
use crate::scheduler::trigger::{self, FireCallback, TriggerRegistry};

/// Prefix of every trigger id owned by the scheduler engine.
pub const JOB_ID_PREFIX: &str = "job:";

/// Stable trigger id and dedupe key for a job.
pub fn job_key(name: &str) -> String {
    format!("{}{}", JOB_ID_PREFIX, name)
}

/// Result of a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    pub removed: usize,
    pub registered: Vec<String>,
}

/// Owns the job file and the triggers registered from it.
pub struct SchedulerEngine {
    jobs_file: PathBuf,
    registry: Arc<TriggerRegistry>,
    queue: EventQueue,
    /// Serializes read-modify-write cycles on the job file.
    file_lock: Mutex<()>,
}

impl SchedulerEngine {
    pub fn new(jobs_file: impl Into<PathBuf>, registry: Arc<TriggerRegistry>, queue: EventQueue) -> Self {
        Self {
            jobs_file: jobs_file.into(),
            registry,
            queue,
            file_lock: Mutex::new(()),
        }
    }

    pub fn jobs_file(&self) -> &Path {
        &self.jobs_file
    }

    /// Parse the job file. Invalid rows are logged and skipped.
    pub async fn load_jobs(&self) -> Result<Vec<SchedulerJob>, SchedulerError> {
        job::load_jobs(&self.jobs_file).await
    }

    /// Rewrite the job file with exactly `jobs`.
    pub async fn save_jobs(&self, jobs: &[SchedulerJob]) -> Result<(), SchedulerError> {
        job::save_jobs(&self.jobs_file, jobs).await
    }

    /// Add or replace a job by name, then reload. Returns `true` if a job
    /// with that name already existed.
    pub async fn upsert_job(&self, job: SchedulerJob) -> Result<bool, SchedulerError> {
        let replaced = {
            let _guard = self.file_lock.lock().await;
            let mut jobs = self.load_jobs().await?;
            let replaced = match jobs.iter_mut().find(|existing| existing.name == job.name) {
                Some(existing) => {
                    *existing = job;
                    true
                }
                None => {
                    jobs.push(job);
                    false
                }
            };
            self.save_jobs(&jobs).await?;
            replaced
        };
        self.reload().await?;
        Ok(replaced)
    }

    /// Remove a job by name, then reload.
    pub async fn remove_job(&self, name: &str) -> Result<(), SchedulerError> {
        {
            let _guard = self.file_lock.lock().await;
            let mut jobs = self.load_jobs().await?;
            let before = jobs.len();
            jobs.retain(|job| job.name != name);
            if jobs.len() == before {
                return Err(SchedulerError::JobNotFound(name.to_string()));
            }
            self.save_jobs(&jobs).await?;
        }
        self.reload().await?;
        Ok(())
    }

    /// Replace this engine's triggers with one per valid job in the file.
    ///
    /// Triggers outside [`JOB_ID_PREFIX`] are left alone. If the file cannot
    /// be read or parsed the current triggers stay as they are.
    pub async fn reload(&self) -> Result<ReloadSummary, SchedulerError> {
        let jobs = self.load_jobs().await?;

        let removed = self.registry.remove_prefix(JOB_ID_PREFIX);
        let mut registered = Vec::with_capacity(jobs.len());
        for job in jobs {
            let schedule = match trigger::schedule_for(&job.trigger) {
                Ok(schedule) => schedule,
                Err(e) => {
                    tracing::warn!(job = %job.name, error = %e, "Skipping scheduler job");
                    continue;
                }
            };
            let id = job_key(&job.name);
            tracing::debug!("Registering {} ({})", id, job.trigger.describe());
            self.registry
                .register(id.clone(), schedule, fire_callback(self.queue.clone(), job));
            registered.push(id);
        }

        tracing::info!(
            "Scheduler reloaded: {} jobs live, {} triggers replaced",
            registered.len(),
            removed
        );
        Ok(ReloadSummary {
            removed,
            registered,
        })
    }

    /// Ids of this engine's live triggers.
    pub fn live_jobs(&self) -> Vec<String> {
        self.registry
            .ids()
            .into_iter()
            .filter(|id| id.starts_with(JOB_ID_PREFIX))
            .collect()
    }

    /// Stop this engine's triggers without waiting for in-flight fires.
    pub fn shutdown(&self) {
        let stopped = self.registry.remove_prefix(JOB_ID_PREFIX);
        tracing::info!("Scheduler stopped {} triggers", stopped);
    }
}

/// Hand a job's event to the queue.
pub fn fire(queue: &EventQueue, job: &SchedulerJob) -> EnqueueOutcome {
    let mut event = Event::scheduled(&job.name, &job.prompt);
    if let Some(channel_id) = &job.channel_id {
        event = event.with_channel(channel_id);
    }
    let outcome = queue.enqueue(event);
    match &outcome {
        EnqueueOutcome::Queued { depth } => {
            tracing::info!("Scheduler job {} fired (queue depth {})", job.name, depth)
        }
        EnqueueOutcome::Deduped { .. } => {
            tracing::info!("Scheduler job {} still pending, fire skipped", job.name)
        }
        EnqueueOutcome::Closed => tracing::warn!("Scheduler job {} fired after shutdown", job.name),
    }
    outcome
}

fn fire_callback(queue: EventQueue, job: SchedulerJob) -> FireCallback {
    Arc::new(move || {
        fire(&queue, &job);
    })
}
