//! Scheduled grabs: arm a task now, fire at its activation time, and retry
//! until it succeeds, expires, or is cancelled.
//!
//! Every task runs its own loop; tasks never coordinate with each other, even
//! when they target the same course.

pub mod matching;
pub mod runner;
pub mod task;

pub use task::{CreateTaskRequest, GrabTask, MatchedCourse, TaskId, TaskSnapshot, TaskStatus};

use crate::config::Config;
use crate::portal::PortalApi;
use crate::scheduler::runner::TaskRunner;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Finished tasks older than this are dropped when a new task is created.
pub const FINISHED_RETENTION_HOURS: i64 = 24;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("portal credential is missing or empty")]
    CredentialMissing,
    #[error("at least one non-empty keyword is required")]
    NoKeywords,
    #[error("activation time {activation} is not in the future")]
    ActivationNotInFuture { activation: DateTime<Utc> },
    #[error("expiry time {expiry} is not after activation time {activation}")]
    ExpiryNotAfterActivation {
        activation: DateTime<Utc>,
        expiry: DateTime<Utc>,
    },
    #[error(
        "task window of {hours:.1}h exceeds the {max}h limit",
        max = task::MAX_TASK_WINDOW_HOURS
    )]
    WindowTooLong { hours: f64 },
    #[error("no task with id {0}")]
    TaskNotFound(TaskId),
    #[error("task {id} is already {status}")]
    AlreadyTerminal { id: TaskId, status: TaskStatus },
}

struct TaskEntry {
    task: Arc<GrabTask>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Registry of scheduled tasks and their loops.
#[derive(Clone)]
pub struct GrabScheduler {
    api: PortalApi,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    tasks: Arc<DashMap<TaskId, TaskEntry>>,
}

impl GrabScheduler {
    pub fn new(api: PortalApi, poll_interval: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            api,
            poll_interval,
            shutdown_timeout,
            tasks: Arc::new(DashMap::new()),
        }
    }

    pub fn from_config(api: PortalApi, config: &Config) -> Self {
        Self::new(api, config.poll_interval, config.shutdown_timeout)
    }

    /// Validate `request` and start its loop. Nothing is registered when
    /// validation fails.
    pub fn create_scheduled_task(
        &self,
        request: CreateTaskRequest,
    ) -> Result<TaskId, ScheduleError> {
        let task = Arc::new(GrabTask::create(request, Utc::now())?);
        self.prune_finished(TimeDelta::hours(FINISHED_RETENTION_HOURS));
        let id = task.id;
        let cancel = CancellationToken::new();

        info!(
            task_id = %id,
            school = %task.school_id,
            keywords = ?task.keywords,
            activation = %task.activation_time,
            expiry = %task.expiry_time,
            "Scheduled task created"
        );

        let runner = TaskRunner::new(
            task.clone(),
            self.api.clone(),
            self.poll_interval,
            cancel.clone(),
        );
        let handle = tokio::spawn(runner.run());

        self.tasks.insert(
            id,
            TaskEntry {
                task,
                cancel,
                handle: Mutex::new(Some(handle)),
            },
        );
        Ok(id)
    }

    /// Cancel a live task. Any submission already in flight may still reach
    /// the portal, but its result is discarded.
    pub fn cancel_scheduled_task(&self, id: TaskId) -> Result<TaskSnapshot, ScheduleError> {
        let entry = self.tasks.get(&id).ok_or(ScheduleError::TaskNotFound(id))?;
        entry
            .task
            .cancel()
            .map_err(|status| ScheduleError::AlreadyTerminal { id, status })?;
        entry.cancel.cancel();
        info!(task_id = %id, "Scheduled task cancelled");
        Ok(entry.task.snapshot())
    }

    pub fn get_scheduled_task_status(&self, id: TaskId) -> Result<TaskSnapshot, ScheduleError> {
        self.tasks
            .get(&id)
            .map(|entry| entry.task.snapshot())
            .ok_or(ScheduleError::TaskNotFound(id))
    }

    /// All known tasks, oldest first.
    pub fn list_scheduled_tasks(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> =
            self.tasks.iter().map(|entry| entry.task.snapshot()).collect();
        snapshots.sort_by_key(|s| (s.created_at, s.id));
        snapshots
    }

    /// Forget tasks that finished at least `older_than` ago. Live tasks are
    /// never removed. Returns how many were dropped.
    pub fn prune_finished(&self, older_than: TimeDelta) -> usize {
        let cutoff = Utc::now() - older_than;
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| {
            let snapshot = entry.task.snapshot();
            !(snapshot.status.is_terminal() && snapshot.finished_at.is_some_and(|at| at <= cutoff))
        });
        let removed = before.saturating_sub(self.tasks.len());
        if removed > 0 {
            debug!(removed, remaining = self.tasks.len(), "Pruned finished tasks");
        }
        removed
    }

    /// Resolve once the task reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: TaskId) -> Result<TaskSnapshot, ScheduleError> {
        let task = self
            .tasks
            .get(&id)
            .map(|entry| entry.task.clone())
            .ok_or(ScheduleError::TaskNotFound(id))?;

        let mut rx = task.subscribe();
        // The sender lives as long as `task`, so this only fails if it is dropped.
        let _ = rx.wait_for(|state| state.status.is_terminal()).await;
        Ok(task.snapshot())
    }

    /// Cancel every live task and give their loops `shutdown_timeout` to exit.
    pub async fn shutdown(&self) {
        let mut handles = Vec::new();
        for entry in self.tasks.iter() {
            if entry.task.cancel().is_ok() {
                info!(task_id = %entry.key(), "Cancelling task for shutdown");
            }
            entry.cancel.cancel();
            if let Some(handle) = entry.handle.lock().ok().and_then(|mut h| h.take()) {
                handles.push(handle);
            }
        }
        if handles.is_empty() {
            return;
        }

        let count = handles.len();
        let stopped = futures::future::join_all(handles);
        match tokio::time::timeout(self.shutdown_timeout, stopped).await {
            Ok(_) => info!(tasks = count, "All task loops stopped"),
            Err(_) => warn!(
                tasks = count,
                timeout = crate::utils::fmt_duration(self.shutdown_timeout),
                "Task loops did not stop in time"
            ),
        }
    }
}
