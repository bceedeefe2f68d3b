//! Background work: the task queue, the worker that drains it and the task bodies.

pub mod maintenance;
pub mod processor;
pub mod worker;

pub use maintenance::DailyReport;
pub use processor::ProcessError;
pub use worker::{Heartbeat, TaskContext, Worker};

use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::EtlJob;
use crate::pipeline::{PipelineError, RunRequest};
use crate::store::RepositoryError;

/// Units of work understood by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Processes one submission of a job; `attempt` must match the stored job.
    ProcessEtlJob { job_id: Uuid, attempt: u32 },
    HealthCheck,
    CleanupOldMetrics,
    GenerateDailyReport,
    RunPipeline(RunRequest),
}

impl Task {
    pub fn process_job(job: &EtlJob) -> Self {
        Task::ProcessEtlJob {
            job_id: job.id,
            attempt: job.attempt,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Task::ProcessEtlJob { .. } => "process_etl_job",
            Task::HealthCheck => "health_check",
            Task::CleanupOldMetrics => "cleanup_old_metrics",
            Task::GenerateDailyReport => "generate_daily_report",
            Task::RunPipeline(_) => "run_pipeline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task queue is closed")]
pub struct QueueClosed;

/// Producer side of the task channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<Task>,
}

/// Consumer side, handed to [`Worker::run`].
#[derive(Debug)]
pub struct TaskReceiver {
    receiver: mpsc::UnboundedReceiver<Task>,
}

impl TaskQueue {
    pub fn channel() -> (Self, TaskReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, TaskReceiver { receiver })
    }

    pub fn enqueue(&self, task: Task) -> Result<(), QueueClosed> {
        tracing::debug!(task = task.name(), "task enqueued");
        self.sender.send(task).map_err(|_| QueueClosed)
    }

    /// Delivers `task` once `delay` has elapsed. Must be called inside a tokio runtime.
    pub fn enqueue_after(&self, task: Task, delay: Duration) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(task).is_err() {
                tracing::warn!("task queue closed before delayed task was delivered");
            }
        });
    }
}

impl TaskReceiver {
    pub async fn recv(&mut self) -> Option<Task> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, used by tests to inspect what was queued.
    pub fn try_recv(&mut self) -> Option<Task> {
        self.receiver.try_recv().ok()
    }
}

/// Error raised while executing a task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("ETL job {0} not found")]
    JobNotFound(Uuid),
    #[error("ETL job {job_id} failed: {source}")]
    JobFailed {
        job_id: Uuid,
        #[source]
        source: ProcessError,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_delivers_in_order() {
        let (queue, mut receiver) = TaskQueue::channel();
        let job_id = Uuid::new_v4();
        let task = Task::ProcessEtlJob { job_id, attempt: 0 };
        queue.enqueue(task.clone()).expect("open");
        queue.enqueue(Task::HealthCheck).expect("open");

        assert_eq!(receiver.recv().await, Some(task));
        assert_eq!(receiver.recv().await, Some(Task::HealthCheck));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_tasks_arrive_after_the_delay() {
        let (queue, mut receiver) = TaskQueue::channel();
        queue.enqueue_after(Task::CleanupOldMetrics, Duration::from_secs(120));

        tokio::task::yield_now().await;
        assert_eq!(receiver.try_recv(), None);

        assert_eq!(receiver.recv().await, Some(Task::CleanupOldMetrics));
    }

    #[test]
    fn enqueue_fails_once_receiver_is_gone() {
        let (queue, receiver) = TaskQueue::channel();
        drop(receiver);
        assert_eq!(queue.enqueue(Task::HealthCheck), Err(QueueClosed));
    }
}
