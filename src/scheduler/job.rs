//! Declarative scheduler jobs and the job file.
//!
//! The job file is YAML with either a top-level `jobs:` list or a bare list:
//!
//! ```yaml
//! jobs:
//!   - name: daily-report
//!     prompt: Summarize yesterday's activity.
//!     time_of_day: "09:30"
//!     channel_id: "123456"
//!   - name: inbox-sweep
//!     prompt: Check for anything unanswered.
//!     cron: "*/30 * * * *"
//! ```
//!
//! Each job needs exactly one of `cron` and `time_of_day` (UTC, `HH:MM`).
//! Rows that fail validation are logged and skipped.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::scheduler::trigger;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTrigger {
    /// Crontab expression, evaluated in UTC.
    Cron(String),
    /// Once a day at a fixed UTC time.
    DailyTime { hour: u32, minute: u32 },
}

impl JobTrigger {
    /// Parse `HH:MM` into a daily trigger.
    pub fn daily(time_of_day: &str) -> Result<Self, SchedulerError> {
        let invalid = |reason: &str| SchedulerError::InvalidTrigger {
            expr: time_of_day.to_string(),
            reason: reason.to_string(),
        };
        let (hour, minute) = time_of_day
            .trim()
            .split_once(':')
            .ok_or_else(|| invalid("expected HH:MM"))?;
        let hour: u32 = hour.parse().map_err(|_| invalid("hour is not a number"))?;
        let minute: u32 = minute
            .parse()
            .map_err(|_| invalid("minute is not a number"))?;
        if hour > 23 || minute > 59 {
            return Err(invalid("time out of range"));
        }
        Ok(JobTrigger::DailyTime { hour, minute })
    }

    pub fn describe(&self) -> String {
        match self {
            JobTrigger::Cron(expr) => format!("cron '{}'", expr),
            JobTrigger::DailyTime { hour, minute } => format!("daily {:02}:{:02} UTC", hour, minute),
        }
    }
}

/// A recurring job that injects a scheduler event into the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerJob {
    pub name: String,
    pub prompt: String,
    pub trigger: JobTrigger,
    pub channel_id: Option<String>,
}

impl SchedulerJob {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, trigger: JobTrigger) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            trigger,
            channel_id: None,
        }
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Build a job from raw fields, enforcing the one-trigger rule and
    /// checking the trigger expression.
    pub fn from_parts(
        name: &str,
        prompt: &str,
        cron: Option<&str>,
        time_of_day: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<Self, SchedulerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SchedulerError::InvalidJob {
                name: "(unnamed)".to_string(),
                reason: "missing name".to_string(),
            });
        }
        let invalid = |reason: &str| SchedulerError::InvalidJob {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if prompt.trim().is_empty() {
            return Err(invalid("missing prompt"));
        }

        let cron = cron.map(str::trim).filter(|s| !s.is_empty());
        let time_of_day = time_of_day.map(str::trim).filter(|s| !s.is_empty());
        let trigger = match (cron, time_of_day) {
            (Some(expr), None) => JobTrigger::Cron(expr.to_string()),
            (None, Some(time)) => JobTrigger::daily(time)?,
            (Some(_), Some(_)) => return Err(invalid("set either cron or time_of_day, not both")),
            (None, None) => return Err(invalid("one of cron or time_of_day is required")),
        };
        trigger::schedule_for(&trigger)?;

        Ok(Self {
            name: name.to_string(),
            prompt: prompt.to_string(),
            trigger,
            channel_id: channel_id
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }
}

/// On-disk row. Channel ids may be written as YAML numbers.
#[derive(Debug, Default, Serialize, Deserialize)]
struct JobRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_of_day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel_id: Option<serde_yaml::Value>,
}

impl JobRow {
    fn channel_id(&self) -> Option<String> {
        match self.channel_id.as_ref()? {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn into_job(self) -> Result<SchedulerJob, SchedulerError> {
        let channel_id = self.channel_id();
        SchedulerJob::from_parts(
            self.name.as_deref().unwrap_or_default(),
            self.prompt.as_deref().unwrap_or_default(),
            self.cron.as_deref(),
            self.time_of_day.as_deref(),
            channel_id.as_deref(),
        )
    }
}

impl From<&SchedulerJob> for JobRow {
    fn from(job: &SchedulerJob) -> Self {
        let (cron, time_of_day) = match &job.trigger {
            JobTrigger::Cron(expr) => (Some(expr.clone()), None),
            JobTrigger::DailyTime { hour, minute } => (None, Some(format!("{:02}:{:02}", hour, minute))),
        };
        Self {
            name: Some(job.name.clone()),
            prompt: Some(job.prompt.clone()),
            cron,
            time_of_day,
            channel_id: job.channel_id.clone().map(serde_yaml::Value::String),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JobFile {
    #[serde(default)]
    jobs: Vec<JobRow>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobFileShape {
    Wrapped(JobFile),
    Bare(Vec<JobRow>),
}

/// Parse job file contents, skipping invalid rows.
pub fn parse_jobs(contents: &str, path: &Path) -> Result<Vec<SchedulerJob>, SchedulerError> {
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    let shape: JobFileShape =
        serde_yaml::from_str(contents).map_err(|e| SchedulerError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let rows = match shape {
        JobFileShape::Wrapped(file) => file.jobs,
        JobFileShape::Bare(rows) => rows,
    };

    let mut jobs: Vec<SchedulerJob> = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        match row.into_job() {
            Ok(job) => {
                if let Some(pos) = jobs.iter().position(|j| j.name == job.name) {
                    tracing::warn!("Duplicate scheduler job '{}', later entry wins", job.name);
                    jobs.remove(pos);
                }
                jobs.push(job);
            }
            Err(e) => {
                tracing::warn!(row = index, error = %e, "Skipping invalid scheduler job");
            }
        }
    }
    Ok(jobs)
}

/// Load jobs from `path`. A missing file means no jobs.
pub async fn load_jobs(path: &Path) -> Result<Vec<SchedulerJob>, SchedulerError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => parse_jobs(&contents, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Rewrite the whole job file.
pub async fn save_jobs(path: &Path, jobs: &[SchedulerJob]) -> Result<(), SchedulerError> {
    let file = JobFile {
        jobs: jobs.iter().map(JobRow::from).collect(),
    };
    let contents = serde_yaml::to_string(&file).map_err(|e| SchedulerError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("yaml.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn parse(contents: &str) -> Vec<SchedulerJob> {
        parse_jobs(contents, &PathBuf::from("scheduler.yaml")).unwrap()
    }

    #[test]
    fn test_parses_wrapped_and_bare_lists() {
        let wrapped = parse("jobs:\n  - name: a\n    prompt: p\n    cron: '0 9 * * *'\n");
        let bare = parse("- name: a\n  prompt: p\n  cron: '0 9 * * *'\n");
        assert_eq!(wrapped, bare);
        assert_eq!(wrapped[0].trigger, JobTrigger::Cron("0 9 * * *".to_string()));
    }

    #[test]
    fn test_skips_invalid_rows() {
        let jobs = parse(
            r#"
jobs:
  - name: both
    prompt: p
    cron: "0 9 * * *"
    time_of_day: "09:00"
  - name: neither
    prompt: p
  - prompt: no name
    cron: "0 9 * * *"
  - name: no-prompt
    cron: "0 9 * * *"
  - name: bad-time
    prompt: p
    time_of_day: "25:00"
  - name: bad-cron
    prompt: p
    cron: "not a cron"
  - name: ok
    prompt: p
    time_of_day: "07:05"
    channel_id: 123456789012
"#,
        );
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "ok");
        assert_eq!(jobs[0].trigger, JobTrigger::DailyTime { hour: 7, minute: 5 });
        assert_eq!(jobs[0].channel_id.as_deref(), Some("123456789012"));
    }

    #[test]
    fn test_empty_file_has_no_jobs() {
        assert!(parse("").is_empty());
        assert!(parse("jobs: []\n").is_empty());
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        let result = parse_jobs("jobs: [unclosed", &PathBuf::from("scheduler.yaml"));
        assert!(matches!(result, Err(SchedulerError::Parse { .. })));
    }

    #[test]
    fn test_duplicate_names_keep_last() {
        let jobs = parse(
            "- {name: a, prompt: first, cron: '0 9 * * *'}\n- {name: a, prompt: second, cron: '0 9 * * *'}\n",
        );
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].prompt, "second");
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.yaml");
        let jobs = vec![
            SchedulerJob::new("a", "prompt a", JobTrigger::Cron("*/5 * * * *".to_string())),
            SchedulerJob::new("b", "prompt b", JobTrigger::DailyTime { hour: 9, minute: 0 })
                .with_channel("42"),
        ];
        save_jobs(&path, &jobs).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("time_of_day: 09:00") || written.contains("time_of_day: '09:00'"));
        assert_eq!(load_jobs(&path).await.unwrap(), jobs);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = load_jobs(&dir.path().join("nope.yaml")).await.unwrap();
        assert!(jobs.is_empty());
    }
}
