//! Recurring triggers.
//!
//! Each live trigger is one tokio task that sleeps until the next fire time
//! and then runs its callback. Fires of one trigger are sequential, so a
//! trigger never overlaps itself, and fire times missed while the process
//! was busy collapse into the next one.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;

use crate::error::SchedulerError;
use crate::scheduler::JobTrigger;

/// Callback run on every fire. Must not block.
pub type FireCallback = Arc<dyn Fn() + Send + Sync>;

const DAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Parse a cron expression into a UTC schedule.
///
/// Standard five-field crontab (`min hour dom month dow`, Sunday = 0 or 7)
/// is accepted, as is the six/seven-field form with seconds.
pub fn parse_cron(expr: &str) -> Result<Schedule, SchedulerError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => {
            let dow = crontab_day_of_week(fields[4]);
            format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], dow)
        }
        6 | 7 => fields.join(" "),
        n => {
            return Err(SchedulerError::InvalidTrigger {
                expr: expr.to_string(),
                reason: format!("expected 5 fields, got {}", n),
            });
        }
    };

    Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidTrigger {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Rewrite numeric crontab weekdays as names so they mean the same thing to
/// the `cron` crate, which numbers Sunday as 1.
fn crontab_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let range = range
                .split('-')
                .map(|bound| match bound.parse::<usize>() {
                    Ok(n) if n < DAY_NAMES.len() => DAY_NAMES[n].to_string(),
                    _ => bound.to_string(),
                })
                .collect::<Vec<_>>()
                .join("-");
            match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the schedule for a job trigger.
pub fn schedule_for(trigger: &JobTrigger) -> Result<Schedule, SchedulerError> {
    match trigger {
        JobTrigger::Cron(expr) => parse_cron(expr),
        JobTrigger::DailyTime { hour, minute } => {
            let expr = format!("0 {} {} * * *", minute, hour);
            Schedule::from_str(&expr).map_err(|e| SchedulerError::InvalidTrigger {
                expr,
                reason: e.to_string(),
            })
        }
    }
}

/// Live triggers keyed by stable id.
#[derive(Default)]
pub struct TriggerRegistry {
    triggers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.triggers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a trigger, replacing any live trigger with the same id.
    pub fn register(&self, id: impl Into<String>, schedule: Schedule, callback: FireCallback) {
        let id = id.into();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            run_trigger(task_id, schedule, callback).await;
        });
        if let Some(previous) = self.lock().insert(id.clone(), handle) {
            previous.abort();
            tracing::debug!("Replaced trigger {}", id);
        }
    }

    /// Stop every trigger whose id starts with `prefix`. Returns how many
    /// were stopped.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut triggers = self.lock();
        let ids: Vec<String> = triggers
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        for id in &ids {
            if let Some(handle) = triggers.remove(id) {
                handle.abort();
            }
        }
        ids.len()
    }

    /// Stop one trigger.
    pub fn remove(&self, id: &str) -> bool {
        match self.lock().remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Ids of live triggers, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop every trigger without waiting for in-flight fires.
    pub fn shutdown(&self) {
        let mut triggers = self.lock();
        let count = triggers.len();
        for (_, handle) in triggers.drain() {
            handle.abort();
        }
        if count > 0 {
            tracing::info!("Stopped {} scheduler triggers", count);
        }
    }
}

impl Drop for TriggerRegistry {
    fn drop(&mut self) {
        for (_, handle) in self.lock().drain() {
            handle.abort();
        }
    }
}

async fn run_trigger(id: String, schedule: Schedule, callback: FireCallback) {
    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            tracing::info!("Trigger {} has no future fire times", id);
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        tracing::debug!("Trigger {} firing", id);
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
            tracing::error!("Trigger {} callback panicked", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeZone, Timelike, Weekday};
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn test_five_field_cron_gets_seconds() {
        let schedule = parse_cron("30 9 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = schedule.after(&from).next().unwrap();
        assert_eq!((next.hour(), next.minute(), next.second()), (9, 30, 0));
    }

    #[test]
    fn test_crontab_weekdays() {
        // 2026-01-01 is a Thursday.
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

        let sunday = parse_cron("0 8 * * 0").unwrap();
        assert_eq!(sunday.after(&from).next().unwrap().weekday(), Weekday::Sun);

        let also_sunday = parse_cron("0 8 * * 7").unwrap();
        assert_eq!(also_sunday.after(&from).next().unwrap().weekday(), Weekday::Sun);

        let weekdays = parse_cron("0 8 * * 1-5").unwrap();
        assert_eq!(weekdays.after(&from).next().unwrap().weekday(), Weekday::Fri);
    }

    #[test]
    fn test_day_of_week_rewrite() {
        assert_eq!(crontab_day_of_week("*"), "*");
        assert_eq!(crontab_day_of_week("1-5"), "MON-FRI");
        assert_eq!(crontab_day_of_week("0,6"), "SUN,SAT");
        assert_eq!(crontab_day_of_week("*/2"), "*/2");
        assert_eq!(crontab_day_of_week("mon"), "mon");
    }

    #[test]
    fn test_rejects_bad_expressions() {
        assert!(parse_cron("every day").is_err());
        assert!(parse_cron("99 * * * *").is_err());
    }

    #[test]
    fn test_daily_schedule() {
        let schedule = schedule_for(&JobTrigger::DailyTime { hour: 23, minute: 5 }).unwrap();
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 23, 6, 0).unwrap();
        let next = schedule.after(&from).next().unwrap();
        assert_eq!((next.day(), next.hour(), next.minute()), (2, 23, 5));
    }

    #[tokio::test]
    async fn test_register_replace_and_remove_prefix() {
        let registry = TriggerRegistry::new();
        let noop: FireCallback = Arc::new(|| {});
        let yearly = || parse_cron("0 0 1 1 *").unwrap();

        registry.register("job:a", yearly(), noop.clone());
        registry.register("job:a", yearly(), noop.clone());
        registry.register("job:b", yearly(), noop.clone());
        registry.register("other:keep", yearly(), noop.clone());
        assert_eq!(registry.ids(), vec!["job:a", "job:b", "other:keep"]);

        assert_eq!(registry.remove_prefix("job:"), 2);
        assert_eq!(registry.ids(), vec!["other:keep"]);
        assert!(registry.contains("other:keep"));

        registry.shutdown();
        assert!(registry.ids().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_fires_and_survives_panicking_callback() {
        let registry = TriggerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fires = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fires.clone();
        let callback: FireCallback = Arc::new(move || {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let _ = tx.send(n);
            if n == 0 {
                panic!("first fire fails");
            }
        });
        registry.register("job:tick", parse_cron("* * * * * *").unwrap(), callback);

        for expected in 0..2 {
            let fired = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap();
            assert_eq!(fired, Some(expected));
        }
        assert!(registry.contains("job:tick"));
    }
}
