//! In-process periodic scheduler: interval entries, cron entries and sensors.

pub mod cron;

pub use cron::{CronError, CronSchedule};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::SchedulerConfig;
use crate::pipeline::{sensors, RunRequest, SensorResult};
use crate::store::Store;
use crate::tasks::{Task, TaskQueue};

/// When an entry fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Every(chrono::Duration),
    Cron(CronSchedule),
}

impl Trigger {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Every(period) => Some(after + *period),
            Trigger::Cron(schedule) => schedule.next_after(after),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineSchedule {
    DailyEtl,
    FrequentExtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensor {
    DataAvailability,
    FailureRecovery,
}

/// What an entry does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Task(Task),
    Pipeline(PipelineSchedule),
    Sensor(Sensor),
}

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub name: &'static str,
    pub trigger: Trigger,
    pub action: Action,
    pub enabled: bool,
    pub next_due: Option<DateTime<Utc>>,
}

/// An entry that came due, with the time it was scheduled for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueEntry {
    pub name: &'static str,
    pub action: Action,
    pub scheduled: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
}

impl Scheduler {
    /// Builds the standard beat table, with first runs computed from `start`.
    pub fn new(config: &SchedulerConfig, start: DateTime<Utc>) -> Result<Self, CronError> {
        let every = |period: std::time::Duration| {
            Trigger::Every(
                chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::days(365)),
            )
        };

        let table = vec![
            (
                "health-check-every-minute",
                every(config.health_check_interval),
                Action::Task(Task::HealthCheck),
                true,
            ),
            (
                "cleanup-old-logs",
                every(config.cleanup_interval),
                Action::Task(Task::CleanupOldMetrics),
                true,
            ),
            (
                "daily-etl-report",
                Trigger::Cron(CronSchedule::parse("0 1 * * *")?),
                Action::Task(Task::GenerateDailyReport),
                true,
            ),
            (
                "daily_etl_schedule",
                Trigger::Cron(CronSchedule::parse("0 2 * * *")?),
                Action::Pipeline(PipelineSchedule::DailyEtl),
                true,
            ),
            (
                "frequent_extract_schedule",
                Trigger::Cron(CronSchedule::parse("0 */6 * * *")?),
                Action::Pipeline(PipelineSchedule::FrequentExtract),
                false,
            ),
            (
                "data_availability_sensor",
                every(config.sensor_interval),
                Action::Sensor(Sensor::DataAvailability),
                true,
            ),
            (
                "etl_failure_recovery_sensor",
                every(config.sensor_interval),
                Action::Sensor(Sensor::FailureRecovery),
                true,
            ),
        ];

        let entries = table
            .into_iter()
            .map(|(name, trigger, action, enabled)| ScheduleEntry {
                name,
                next_due: trigger.next_after(start),
                trigger,
                action,
                enabled,
            })
            .collect();

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Starts or stops an entry by name. Returns false for unknown names.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Collects enabled entries due at `now` and advances them past `now`.
    ///
    /// Missed ticks are coalesced into a single firing.
    pub fn due_entries(&mut self, now: DateTime<Utc>) -> Vec<DueEntry> {
        let mut due = Vec::new();
        for entry in &mut self.entries {
            let Some(scheduled) = entry.next_due.filter(|at| *at <= now) else {
                continue;
            };

            let mut next = entry.trigger.next_after(scheduled);
            while let Some(candidate) = next.filter(|at| *at <= now) {
                next = entry.trigger.next_after(candidate);
            }
            entry.next_due = next;

            if entry.enabled {
                due.push(DueEntry {
                    name: entry.name,
                    action: entry.action.clone(),
                    scheduled,
                });
            }
        }
        due
    }
}

/// Turns a due entry into a task. Sensors are evaluated here against the store.
pub fn dispatch<S>(store: &S, due: &DueEntry, now: DateTime<Utc>) -> Option<Task>
where
    S: Store + ?Sized,
{
    match &due.action {
        Action::Task(task) => Some(task.clone()),
        Action::Pipeline(PipelineSchedule::DailyEtl) => {
            Some(Task::RunPipeline(RunRequest::daily_etl(due.scheduled)))
        }
        Action::Pipeline(PipelineSchedule::FrequentExtract) => {
            Some(Task::RunPipeline(RunRequest::frequent_extract(due.scheduled)))
        }
        Action::Sensor(sensor) => {
            let result = match sensor {
                Sensor::DataAvailability => sensors::data_availability(store, now),
                Sensor::FailureRecovery => sensors::failure_recovery(store, now),
            };
            match result {
                SensorResult::Run(request) => Some(Task::RunPipeline(request)),
                SensorResult::Skip(reason) => {
                    tracing::debug!(sensor = due.name, %reason, "sensor skipped");
                    None
                }
            }
        }
    }
}

/// Ticks the scheduler until shutdown, enqueueing whatever comes due.
pub async fn run<S>(
    mut scheduler: Scheduler,
    store: Arc<S>,
    queue: TaskQueue,
    tick: std::time::Duration,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: Store + 'static,
{
    let mut ticker = tokio::time::interval(tick);
    tracing::info!(entries = scheduler.entries().len(), "scheduler started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("scheduler received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                let now = Utc::now();
                for due in scheduler.due_entries(now) {
                    let Some(task) = dispatch(store.as_ref(), &due, now) else {
                        continue;
                    };
                    tracing::info!(entry = due.name, task = task.name(), "scheduled task due");
                    if queue.enqueue(task).is_err() {
                        tracing::warn!("task queue closed, stopping scheduler");
                        return;
                    }
                }
            }
        }
    }

    tracing::info!("scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineJob;
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 0, 30, 0).single().expect("valid time")
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(&SchedulerConfig::default(), start()).expect("valid table")
    }

    fn names(due: &[DueEntry]) -> Vec<&'static str> {
        due.iter().map(|entry| entry.name).collect()
    }

    #[test]
    fn interval_entries_fire_one_period_after_start() {
        let mut scheduler = scheduler();
        assert!(scheduler.due_entries(start() + Duration::seconds(29)).is_empty());

        let due = scheduler.due_entries(start() + Duration::seconds(30));
        assert_eq!(names(&due), ["data_availability_sensor", "etl_failure_recovery_sensor"]);

        let due = scheduler.due_entries(start() + Duration::seconds(60));
        assert!(names(&due).contains(&"health-check-every-minute"));
    }

    #[test]
    fn cron_entries_fire_at_their_minute() {
        let mut scheduler = scheduler();
        let due = scheduler.due_entries(start() + Duration::minutes(30));
        let report = due
            .iter()
            .find(|entry| entry.name == "daily-etl-report")
            .expect("report due at 01:00");
        assert_eq!(report.scheduled, start() + Duration::minutes(30));
        assert_eq!(report.action, Action::Task(Task::GenerateDailyReport));

        let due = scheduler.due_entries(start() + Duration::minutes(31));
        assert!(!names(&due).contains(&"daily-etl-report"));
    }

    #[test]
    fn stopped_schedules_advance_without_firing() {
        let mut scheduler = scheduler();
        let six = start() + Duration::minutes(330);
        assert!(!names(&scheduler.due_entries(six)).contains(&"frequent_extract_schedule"));

        assert!(scheduler.set_enabled("frequent_extract_schedule", true));
        let noon = start() + Duration::minutes(690);
        let due = scheduler.due_entries(noon);
        let extract = due
            .iter()
            .find(|entry| entry.name == "frequent_extract_schedule")
            .expect("enabled schedule fires");

        let store = InMemoryStore::new();
        let Some(Task::RunPipeline(request)) = dispatch(&store, extract, noon) else {
            panic!("expected a pipeline task");
        };
        assert_eq!(request.job, PipelineJob::ExtractOnly);
        assert_eq!(request.run_key, "extract_2025_07_01_12");
    }

    #[test]
    fn missed_ticks_coalesce() {
        let mut scheduler = scheduler();
        let due = scheduler.due_entries(start() + Duration::minutes(10));
        let health = due
            .iter()
            .filter(|entry| entry.name == "health-check-every-minute")
            .count();
        assert_eq!(health, 1);
        assert!(scheduler.due_entries(start() + Duration::minutes(10)).is_empty());
    }

    #[test]
    fn sensors_without_work_dispatch_nothing() {
        let store = InMemoryStore::new();
        let due = DueEntry {
            name: "data_availability_sensor",
            action: Action::Sensor(Sensor::DataAvailability),
            scheduled: start(),
        };
        assert_eq!(dispatch(&store, &due, start()), None);
    }
}
