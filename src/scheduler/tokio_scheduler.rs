//! Tokio-backed scheduler implementation.
//!
//! `TokioScheduler` drives a background task that wakes every second, scans
//! for due [`ScheduledTask`]s, executes them, records history, and
//! reschedules. Tasks are persisted as a JSON file (atomic rewrite), not a
//! database — this is a small, operator-editable table, not application
//! data.
//!
//! ## Shared-auxiliary composition
//! Grounded on `scheduler.py`'s `_make_background_hook`: each fired task
//! gets a **fresh** [`ToolInterceptor`] constructed with
//! `ExecutionContext::Scheduler`, but that interceptor *borrows* (via
//! `Arc<dyn …>`) the same AI reviewer, shield client, and phone verifier
//! the interactive session uses — it does not own separate instances.
//!
//! ## Stuck detection
//! A task is considered stuck if it doesn't complete within 120 seconds.
//! A `SystemError` event is emitted and the next scheduled fire proceeds
//! regardless (no error-count backoff is applied to the fire cadence
//! itself — cron/run_at already bound how often a task can fire).

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::activity::ToolActivityStore;
use crate::aitl::AiReviewer;
use crate::approval::ApprovalBroker;
use crate::channels::ChannelManager;
use crate::event_bus::{AppEvent, EventBus};
use crate::guardrails::{ExecutionContext, GuardrailsEngine};
use crate::interceptor::{InterceptorDeps, ToolInterceptor};
use crate::pitl::PhoneVerifier;
use crate::shield::ShieldClient;

use super::traits::{ScheduledTask, Scheduler, TaskExecution, TaskId, TaskStatus};

/// Minimum gap, in seconds, a cron expression may fire at — matches
/// `MIN_INTERVAL_SECONDS` from the original scheduler.
pub const MIN_INTERVAL_SECONDS: i64 = 3600;

const STUCK_THRESHOLD_SECS: u64 = 120;
const TICK_INTERVAL_SECS: u64 = 1;
const MAX_HISTORY_PER_TASK: usize = 100;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to read tasks file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write tasks file: {0}")]
    Write(#[source] std::io::Error),
    #[error("malformed tasks file: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Runs a task's `prompt` through the Agent SDK, gating any tool calls it
/// makes through the supplied scheduler-scoped interceptor.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &ScheduledTask, interceptor: Arc<ToolInterceptor>) -> Result<String, String>;
}

type TaskMap = HashMap<TaskId, ScheduledTask>;
type HistoryMap = HashMap<TaskId, Vec<TaskExecution>>;

/// A 5-field (minute hour dom month dow) cron expression is widened to the
/// `cron` crate's 6/7-field grammar by pinning seconds to `0` — schedules
/// are only ever matched or compared at minute resolution.
fn normalize_cron_expr(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn parse_cron_schedule(expr: &str) -> Result<cron::Schedule, String> {
    use std::str::FromStr;
    cron::Schedule::from_str(&normalize_cron_expr(expr)).map_err(|e| format!("invalid cron expression: {e}"))
}

/// Whether `expr` matches the minute `now` falls in. Seconds are pinned to
/// `0` before checking, so this is a minute-resolution match regardless of
/// where within the minute the scheduler's tick loop happens to land.
fn cron_matches_current_minute(schedule: &cron::Schedule, now: chrono::DateTime<Utc>) -> bool {
    let truncated = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    schedule.includes(truncated)
}

/// Rejects cron expressions whose first two upcoming fires are closer
/// together than [`MIN_INTERVAL_SECONDS`].
pub fn validate_cron_interval(expr: &str) -> Result<(), String> {
    let schedule = parse_cron_schedule(expr)?;
    let mut upcoming = schedule.upcoming(Utc);
    let (Some(first), Some(second)) = (upcoming.next(), upcoming.next()) else {
        return Ok(());
    };
    let gap = (second - first).num_seconds();
    if gap < MIN_INTERVAL_SECONDS {
        return Err(format!(
            "cron expression fires every {gap}s, below the minimum of {MIN_INTERVAL_SECONDS}s"
        ));
    }
    Ok(())
}

fn load_tasks(path: &std::path::Path) -> Result<Vec<ScheduledTask>, SchedulerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(SchedulerError::Read)?;
    serde_json::from_str(&content).map_err(SchedulerError::Malformed)
}

fn save_tasks(path: &std::path::Path, tasks: &[ScheduledTask]) -> Result<(), SchedulerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(SchedulerError::Write)?;
    }
    let json = serde_json::to_string_pretty(tasks).map_err(SchedulerError::Malformed)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(SchedulerError::Write)?;
    std::fs::rename(&tmp, path).map_err(SchedulerError::Write)?;
    Ok(())
}

/// Shared auxiliaries an interactive session already owns, lent to the
/// scheduler so each scheduled run can build its own [`ToolInterceptor`].
#[derive(Clone)]
pub struct SchedulerAuxiliaries {
    pub guardrails: Arc<GuardrailsEngine>,
    pub activity: Arc<ToolActivityStore>,
    pub approvals: Arc<ApprovalBroker>,
    pub events: Arc<dyn EventBus>,
    pub channels: Arc<ChannelManager>,
    pub shield: Option<Arc<ShieldClient>>,
    pub ai_reviewer: Option<Arc<dyn AiReviewer>>,
    pub phone_verifier: Option<Arc<PhoneVerifier>>,
}

impl SchedulerAuxiliaries {
    /// `scheduler.py::_make_background_hook` — build a fresh interceptor
    /// scoped to `ExecutionContext::Scheduler` that borrows these shared
    /// auxiliaries rather than owning separate instances of them.
    fn make_interceptor(&self) -> Arc<ToolInterceptor> {
        Arc::new(ToolInterceptor::new(
            InterceptorDeps {
                guardrails: self.guardrails.clone(),
                activity: self.activity.clone(),
                approvals: self.approvals.clone(),
                events: self.events.clone(),
                channels: self.channels.clone(),
                shield: self.shield.clone(),
                ai_reviewer: self.ai_reviewer.clone(),
                phone_verifier: self.phone_verifier.clone(),
            },
            ExecutionContext::Scheduler,
        ))
    }
}

/// In-memory, Tokio-driven scheduler with JSON persistence.
pub struct TokioScheduler {
    tasks: Arc<RwLock<TaskMap>>,
    history: Arc<RwLock<HistoryMap>>,
    path: PathBuf,
    aux: SchedulerAuxiliaries,
    runner: Arc<dyn TaskRunner>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl TokioScheduler {
    pub fn new(
        path: impl Into<PathBuf>,
        aux: SchedulerAuxiliaries,
        runner: Arc<dyn TaskRunner>,
    ) -> Result<Arc<Self>, SchedulerError> {
        let path = path.into();
        let tasks = load_tasks(&path)?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let task_map: TaskMap = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Ok(Arc::new(Self {
            tasks: Arc::new(RwLock::new(task_map)),
            history: Arc::new(RwLock::new(HashMap::new())),
            path,
            aux,
            runner,
            stop_tx,
            stop_rx,
        }))
    }

    fn persist(&self) {
        let tasks: Vec<ScheduledTask> = self
            .tasks
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        if let Err(err) = save_tasks(&self.path, &tasks) {
            tracing::warn!(error = %err, "scheduler: failed to persist tasks");
        }
    }

    fn is_due(task: &ScheduledTask, now: chrono::DateTime<Utc>) -> bool {
        if !task.enabled {
            return false;
        }
        if let Some(run_at) = task.run_at {
            return task.last_run.is_none() && run_at <= now;
        }
        if let Some(cron) = &task.cron {
            let Ok(schedule) = parse_cron_schedule(cron) else { return false };
            if !cron_matches_current_minute(&schedule, now) {
                return false;
            }
            return match task.last_run {
                None => true,
                Some(last) => (now - last).num_seconds() >= MIN_INTERVAL_SECONDS,
            };
        }
        false
    }

    fn record_history(history: &Arc<RwLock<HistoryMap>>, exec: TaskExecution) {
        if let Ok(mut map) = history.write() {
            let entries = map.entry(exec.task_id.clone()).or_default();
            entries.insert(0, exec);
            entries.truncate(MAX_HISTORY_PER_TASK);
        }
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn start(&self) {
        let tasks = self.tasks.clone();
        let history = self.history.clone();
        let aux = self.aux.clone();
        let runner = self.runner.clone();
        let path = self.path.clone();
        let mut stop_rx = self.stop_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let due: Vec<ScheduledTask> = {
                            let Ok(guard) = tasks.read() else { continue };
                            guard.values().filter(|t| TokioScheduler::is_due(t, now)).cloned().collect()
                        };

                        for task in due {
                            let aux = aux.clone();
                            let runner = runner.clone();
                            let history = history.clone();
                            let tasks = tasks.clone();
                            let path = path.clone();

                            tokio::spawn(async move {
                                let _ = aux.events.publish(AppEvent::CronFired {
                                    task_id: task.id.clone(),
                                    description: task.description.clone(),
                                });

                                let interceptor = aux.make_interceptor();
                                let timeout = Duration::from_secs(STUCK_THRESHOLD_SECS);
                                let outcome = tokio::time::timeout(timeout, runner.run(&task, interceptor)).await;

                                let (status, output) = match outcome {
                                    Ok(Ok(result)) => (TaskStatus::Success, result),
                                    Ok(Err(err)) => (TaskStatus::Failed, err),
                                    Err(_) => {
                                        let _ = aux.events.publish(AppEvent::SystemError {
                                            message: format!("task '{}' stuck after {STUCK_THRESHOLD_SECS}s", task.description),
                                        });
                                        (TaskStatus::Stuck, "execution timed out".to_string())
                                    }
                                };

                                let _ = aux.events.publish(AppEvent::SchedulerTaskComplete {
                                    task_id: task.id.clone(),
                                    result: Some(output.clone()),
                                });

                                TokioScheduler::record_history(&history, TaskExecution {
                                    task_id: task.id.clone(),
                                    started_at: now,
                                    finished_at: Utc::now(),
                                    status,
                                    output,
                                });

                                if let Ok(mut map) = tasks.write() {
                                    if let Some(t) = map.get_mut(&task.id) {
                                        t.last_run = Some(now);
                                        if t.run_at.is_some() {
                                            t.enabled = false;
                                        }
                                    }
                                    let snapshot: Vec<ScheduledTask> = map.values().cloned().collect();
                                    drop(map);
                                    let _ = save_tasks(&path, &snapshot);
                                }
                            });
                        }
                    }
                    Ok(()) = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn add_task(&self, mut task: ScheduledTask) -> Result<TaskId, String> {
        if let Some(cron) = &task.cron {
            validate_cron_interval(cron)?;
        }
        if task.id.is_empty() {
            task.id = Uuid::new_v4().to_string();
        }
        let id = task.id.clone();
        if let Ok(mut map) = self.tasks.write() {
            map.insert(id.clone(), task);
        }
        self.persist();
        Ok(id)
    }

    async fn remove_task(&self, id: &TaskId) -> bool {
        let removed = self.tasks.write().map(|mut m| m.remove(id).is_some()).unwrap_or(false);
        if removed {
            self.persist();
        }
        removed
    }

    async fn list_tasks(&self) -> Vec<ScheduledTask> {
        self.tasks
            .read()
            .map(|m| {
                let mut tasks: Vec<ScheduledTask> = m.values().cloned().collect();
                tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                tasks
            })
            .unwrap_or_default()
    }

    async fn task_history(&self, id: &TaskId) -> Vec<TaskExecution> {
        self.history.read().map(|m| m.get(id).cloned().unwrap_or_default()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::TokioBroadcastBus;
    use tempfile::TempDir;

    fn aux(dir: &TempDir) -> SchedulerAuxiliaries {
        SchedulerAuxiliaries {
            guardrails: Arc::new(GuardrailsEngine::new(dir.path().join("guardrails.json")).unwrap()),
            activity: Arc::new(ToolActivityStore::new(dir.path().join("activity.jsonl")).unwrap()),
            approvals: Arc::new(ApprovalBroker::new()),
            events: Arc::new(TokioBroadcastBus::new()),
            channels: Arc::new(ChannelManager::new()),
            shield: None,
            ai_reviewer: None,
            phone_verifier: None,
        }
    }

    struct EchoRunner;

    #[async_trait]
    impl TaskRunner for EchoRunner {
        async fn run(&self, task: &ScheduledTask, _interceptor: Arc<ToolInterceptor>) -> Result<String, String> {
            Ok(format!("ran: {}", task.prompt))
        }
    }

    fn one_shot(prompt: &str) -> ScheduledTask {
        ScheduledTask {
            id: String::new(),
            description: "test task".to_string(),
            prompt: prompt.to_string(),
            cron: None,
            run_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            last_run: None,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn add_and_list_task() {
        let dir = TempDir::new().unwrap();
        let scheduler = TokioScheduler::new(dir.path().join("tasks.json"), aux(&dir), Arc::new(EchoRunner)).unwrap();
        let id = scheduler.add_task(one_shot("say hi")).await.unwrap();
        let tasks = scheduler.list_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, id);
    }

    #[tokio::test]
    async fn remove_existing_task_returns_true() {
        let dir = TempDir::new().unwrap();
        let scheduler = TokioScheduler::new(dir.path().join("tasks.json"), aux(&dir), Arc::new(EchoRunner)).unwrap();
        let id = scheduler.add_task(one_shot("x")).await.unwrap();
        assert!(scheduler.remove_task(&id).await);
        assert!(scheduler.list_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn cron_faster_than_hourly_is_rejected() {
        let dir = TempDir::new().unwrap();
        let scheduler = TokioScheduler::new(dir.path().join("tasks.json"), aux(&dir), Arc::new(EchoRunner)).unwrap();
        let mut task = one_shot("x");
        task.run_at = None;
        task.cron = Some("* * * * *".to_string());
        assert!(scheduler.add_task(task).await.is_err());
    }

    #[tokio::test]
    async fn hourly_cron_is_accepted() {
        let dir = TempDir::new().unwrap();
        let scheduler = TokioScheduler::new(dir.path().join("tasks.json"), aux(&dir), Arc::new(EchoRunner)).unwrap();
        let mut task = one_shot("x");
        task.run_at = None;
        task.cron = Some("0 * * * *".to_string());
        assert!(scheduler.add_task(task).await.is_ok());
    }

    #[tokio::test]
    async fn persists_and_reloads_tasks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        {
            let scheduler = TokioScheduler::new(&path, aux(&dir), Arc::new(EchoRunner)).unwrap();
            scheduler.add_task(one_shot("persisted")).await.unwrap();
        }
        let reloaded = TokioScheduler::new(&path, aux(&dir), Arc::new(EchoRunner)).unwrap();
        let tasks = reloaded.list_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].prompt, "persisted");
    }

    #[test]
    fn is_due_one_shot_only_fires_once() {
        let mut task = one_shot("x");
        assert!(TokioScheduler::is_due(&task, Utc::now()));
        task.last_run = Some(Utc::now());
        assert!(!TokioScheduler::is_due(&task, Utc::now()));
    }

    #[test]
    fn is_due_respects_enabled_flag() {
        let mut task = one_shot("x");
        task.enabled = false;
        assert!(!TokioScheduler::is_due(&task, Utc::now()));
    }

    #[test]
    fn cron_task_not_due_when_expression_does_not_match_current_minute() {
        let now = Utc::now();
        let mut task = one_shot("x");
        task.run_at = None;
        let other_minute = (now.minute() + 30) % 60;
        task.cron = Some(format!("{other_minute} * * * *"));
        assert!(!TokioScheduler::is_due(&task, now));
    }

    #[test]
    fn cron_task_due_on_first_match_with_no_last_run() {
        let now = Utc::now();
        let mut task = one_shot("x");
        task.run_at = None;
        task.cron = Some(format!("{} {} * * *", now.minute(), now.hour()));
        assert!(TokioScheduler::is_due(&task, now));
    }

    #[test]
    fn cron_task_not_due_again_within_min_interval() {
        let now = Utc::now();
        let mut task = one_shot("x");
        task.run_at = None;
        task.cron = Some(format!("{} {} * * *", now.minute(), now.hour()));
        task.last_run = Some(now - chrono::Duration::seconds(10));
        assert!(!TokioScheduler::is_due(&task, now));
    }

    #[test]
    fn cron_task_due_again_after_min_interval_elapsed() {
        let now = Utc::now();
        let mut task = one_shot("x");
        task.run_at = None;
        task.cron = Some(format!("{} {} * * *", now.minute(), now.hour()));
        task.last_run = Some(now - chrono::Duration::seconds(MIN_INTERVAL_SECONDS + 1));
        assert!(TokioScheduler::is_due(&task, now));
    }
}
