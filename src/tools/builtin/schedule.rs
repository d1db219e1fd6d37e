//! Scheduler management tools.
//!
//! Every change rewrites the job file and reloads the live triggers, so the
//! file stays the single source of truth.

use std::time::Instant;

use async_trait::async_trait;

use crate::agent::TurnContext;
use crate::error::SchedulerError;
use crate::scheduler::SchedulerJob;
use crate::tools::tool::{Tool, ToolError, ToolOutput, optional_str, require_str};

/// Lists the jobs in the job file.
#[derive(Debug, Default)]
pub struct ListSchedulesTool;

#[async_trait]
impl Tool for ListSchedulesTool {
    fn name(&self) -> &str {
        "list_schedules"
    }

    fn description(&self) -> &str {
        "List scheduled prompts with their trigger and target channel."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let jobs = ctx.scheduler.load_jobs().await?;
        let live = ctx.scheduler.live_jobs();

        let rendered: Vec<serde_json::Value> = jobs
            .iter()
            .map(|job| {
                serde_json::json!({
                    "name": job.name,
                    "prompt": job.prompt,
                    "trigger": job.trigger.describe(),
                    "channel_id": job.channel_id,
                    "live": live.contains(&crate::scheduler::job_key(&job.name)),
                })
            })
            .collect();
        Ok(ToolOutput::success(
            serde_json::json!({ "jobs": rendered }),
            start.elapsed(),
        ))
    }
}

/// Adds or replaces a scheduled prompt.
#[derive(Debug, Default)]
pub struct AddScheduleTool;

#[async_trait]
impl Tool for AddScheduleTool {
    fn name(&self) -> &str {
        "add_schedule"
    }

    fn description(&self) -> &str {
        "Create or replace a scheduled prompt. Provide exactly one of `cron` \
         (5-field crontab, UTC) or `time_of_day` (HH:MM, UTC)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "prompt": {"type": "string"},
                "cron": {"type": "string"},
                "time_of_day": {"type": "string"},
                "channel_id": {"type": "string"}
            },
            "required": ["name", "prompt"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let name = require_str(&params, "name")?;
        let prompt = require_str(&params, "prompt")?;
        let cron = optional_str(&params, "cron");
        let time_of_day = optional_str(&params, "time_of_day");
        let channel_id = optional_str(&params, "channel_id");

        let job = SchedulerJob::from_parts(
            &name,
            &prompt,
            cron.as_deref(),
            time_of_day.as_deref(),
            channel_id.as_deref(),
        )
        .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;
        let described = job.trigger.describe();
        let job_name = job.name.clone();

        let replaced = ctx.scheduler.upsert_job(job).await?;
        let verb = if replaced { "Updated" } else { "Added" };
        tracing::info!(tool = "add_schedule", job = %job_name, replaced, "Schedule saved");
        Ok(ToolOutput::text(
            format!("{} schedule '{}' ({}).", verb, job_name, described),
            start.elapsed(),
        ))
    }
}

/// Removes a scheduled prompt by name.
#[derive(Debug, Default)]
pub struct RemoveScheduleTool;

#[async_trait]
impl Tool for RemoveScheduleTool {
    fn name(&self) -> &str {
        "remove_schedule"
    }

    fn description(&self) -> &str {
        "Remove a scheduled prompt by name."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let name = require_str(&params, "name")?;
        match ctx.scheduler.remove_job(name.trim()).await {
            Ok(()) => Ok(ToolOutput::text(
                format!("Removed schedule '{}'.", name.trim()),
                start.elapsed(),
            )),
            Err(SchedulerError::JobNotFound(name)) => Ok(ToolOutput::text(
                format!("No schedule named '{}'.", name),
                start.elapsed(),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::scheduler::JobTrigger;
    use crate::testing::{FakeTransport, TurnHarness};

    fn harness() -> TurnHarness {
        TurnHarness::new(FakeTransport::ready(), Event::console("hi"))
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let mut harness = harness();

        let out = AddScheduleTool
            .execute(
                serde_json::json!({"name": "standup", "prompt": "Ask for updates", "time_of_day": "09:30"}),
                &mut harness.ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out.as_text(), "Added schedule 'standup' (daily 09:30 UTC).");
        assert_eq!(harness.scheduler.live_jobs(), vec!["job:standup".to_string()]);

        let out = AddScheduleTool
            .execute(
                serde_json::json!({"name": "standup", "prompt": "Ask again", "cron": "0 10 * * 1-5", "channel_id": 42}),
                &mut harness.ctx(),
            )
            .await
            .unwrap();
        assert!(out.as_text().starts_with("Updated schedule 'standup'"));

        let jobs = harness.scheduler.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].trigger, JobTrigger::Cron("0 10 * * 1-5".to_string()));
        assert_eq!(jobs[0].channel_id.as_deref(), Some("42"));

        let listed = ListSchedulesTool
            .execute(serde_json::json!({}), &mut harness.ctx())
            .await
            .unwrap();
        assert_eq!(listed.result["jobs"][0]["name"], "standup");
        assert_eq!(listed.result["jobs"][0]["live"], true);

        RemoveScheduleTool
            .execute(serde_json::json!({"name": "standup"}), &mut harness.ctx())
            .await
            .unwrap();
        assert!(harness.scheduler.live_jobs().is_empty());
        assert!(harness.scheduler.load_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_both_triggers() {
        let mut harness = harness();
        let result = AddScheduleTool
            .execute(
                serde_json::json!({"name": "x", "prompt": "y", "cron": "* * * * *", "time_of_day": "10:00"}),
                &mut harness.ctx(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::InvalidParameters(_))));
        assert!(harness.scheduler.load_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_is_reported() {
        let mut harness = harness();
        let out = RemoveScheduleTool
            .execute(serde_json::json!({"name": "ghost"}), &mut harness.ctx())
            .await
            .unwrap();
        assert_eq!(out.as_text(), "No schedule named 'ghost'.");
    }
}
