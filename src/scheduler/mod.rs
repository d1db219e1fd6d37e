//! Declarative job scheduler.
//!
//! Jobs are read from `scheduler.yaml`, turned into recurring triggers, and
//! each fire enqueues a scheduler event keyed `job:<name>` so a job that is
//! still pending is not queued twice.

mod engine;
pub mod job;
pub mod trigger;

pub use engine::{JOB_ID_PREFIX, ReloadSummary, SchedulerEngine, fire, job_key};
pub use job::{JobTrigger, SchedulerJob};
pub use trigger::{FireCallback, TriggerRegistry};
