use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

use super::{maintenance, processor, Task, TaskError, TaskQueue, TaskReceiver};
use crate::config::{SchedulerConfig, WorkerConfig};
use crate::pipeline::{PipelineConfig, PipelineRunner, RunOutcome};
use crate::store::Store;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_CONCURRENCY: usize = 1024;

/// Timestamp of the worker's last sign of life, shared with the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct Heartbeat(Arc<AtomicI64>);

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beat(&self, now: DateTime<Utc>) {
        self.0.store(now.timestamp(), Ordering::Release);
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            secs => DateTime::from_timestamp(secs, 0),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        self.last().is_some_and(|last| now - last <= max_age)
    }
}

/// Everything a task body needs: the store, the queue for retries and tunables.
pub struct TaskContext<S> {
    store: Arc<S>,
    queue: TaskQueue,
    worker: WorkerConfig,
    scheduler: SchedulerConfig,
    pipeline: PipelineRunner<S>,
}

impl<S> TaskContext<S>
where
    S: Store + 'static,
{
    pub fn new(
        store: Arc<S>,
        queue: TaskQueue,
        worker: WorkerConfig,
        scheduler: SchedulerConfig,
        pipeline: PipelineConfig,
    ) -> Self {
        let pipeline = PipelineRunner::new(store.clone(), pipeline);
        Self {
            store,
            queue,
            worker,
            scheduler,
            pipeline,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn worker_config(&self) -> &WorkerConfig {
        &self.worker
    }

    pub fn pipeline(&self) -> &PipelineRunner<S> {
        &self.pipeline
    }

    /// Runs a single task and returns its summary line.
    pub async fn execute(&self, task: Task) -> Result<String, TaskError> {
        let now = Utc::now();
        match task {
            Task::ProcessEtlJob { job_id, attempt } => {
                processor::process_etl_job(self, job_id, attempt).await
            }
            Task::HealthCheck => Ok(maintenance::health_check(
                self.store.as_ref(),
                self.scheduler.stuck_job_hours,
                now,
            )?),
            Task::CleanupOldMetrics => Ok(maintenance::cleanup_old_metrics(
                self.store.as_ref(),
                self.scheduler.metric_retention_days,
                now,
            )?),
            Task::GenerateDailyReport => {
                let report = maintenance::generate_daily_report(self.store.as_ref(), now)?;
                Ok(format!(
                    "Daily report for {}: {} jobs, {:.1}% success",
                    report.date, report.total_jobs, report.success_rate
                ))
            }
            Task::RunPipeline(request) => match self.pipeline.launch(request, now)? {
                RunOutcome::Completed(run) => {
                    Ok(format!("Pipeline run {} finished: {:?}", run.run_key, run.status))
                }
                RunOutcome::Skipped { run_key } => {
                    Ok(format!("Pipeline run {run_key} already launched"))
                }
            },
        }
    }
}

/// Drains the task queue, running up to `concurrency` tasks at once.
pub struct Worker<S> {
    context: Arc<TaskContext<S>>,
    heartbeat: Heartbeat,
}

impl<S> Worker<S>
where
    S: Store + 'static,
{
    pub fn new(context: Arc<TaskContext<S>>, heartbeat: Heartbeat) -> Self {
        Self { context, heartbeat }
    }

    /// Runs until shutdown or until the queue closes, then waits for the tasks
    /// already in flight so their final status is stored before returning.
    pub async fn run(self, mut receiver: TaskReceiver, mut shutdown: broadcast::Receiver<()>) {
        let concurrency = self.context.worker.concurrency.clamp(1, MAX_CONCURRENCY);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        tracing::info!(concurrency, "worker started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("worker received shutdown signal");
                    break;
                }
                _ = ticker.tick() => self.heartbeat.beat(Utc::now()),
                next = receiver.recv() => {
                    let Some(task) = next else {
                        tracing::info!("task queue closed");
                        break;
                    };
                    let Ok(permit) = permits.clone().acquire_owned().await else {
                        break;
                    };

                    let context = self.context.clone();
                    let heartbeat = self.heartbeat.clone();
                    tokio::spawn(async move {
                        let name = task.name();
                        match context.execute(task).await {
                            Ok(summary) => tracing::info!(task = name, %summary, "task succeeded"),
                            Err(err) => tracing::error!(task = name, error = %err, "task failed"),
                        }
                        metrics::counter!("gridflow_tasks_executed_total", "task" => name).increment(1);
                        heartbeat.beat(Utc::now());
                        drop(permit);
                    });
                }
            }
        }

        let in_flight = concurrency - permits.available_permits();
        if in_flight > 0 {
            tracing::info!(in_flight, "waiting for running tasks to finish");
        }
        // Every spawned task holds one permit until it returns.
        if permits.acquire_many(concurrency as u32).await.is_err() {
            tracing::warn!("worker permits closed while draining");
        }
        tracing::info!("worker stopped");
    }
}
