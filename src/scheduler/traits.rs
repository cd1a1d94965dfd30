//! Core types and the `Scheduler` trait for the scheduler subsystem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = String;

/// A cron-or-one-shot agent invocation. `cron` and `run_at` are mutually
/// exclusive; validated by [`crate::scheduler::tokio_scheduler::MIN_INTERVAL_SECONDS`]
/// for cron expressions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
    Stuck,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub output: String,
}

/// Abstraction over the background task scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn start(&self);
    async fn stop(&self);

    /// Add (or replace) a task. Returns an error for a cron expression
    /// that fires more often than once an hour.
    async fn add_task(&self, task: ScheduledTask) -> Result<TaskId, String>;

    async fn remove_task(&self, id: &TaskId) -> bool;
    async fn list_tasks(&self) -> Vec<ScheduledTask>;
    async fn task_history(&self, id: &TaskId) -> Vec<TaskExecution>;
}
