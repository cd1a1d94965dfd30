//! Background scheduler for cron/one-shot agent invocations.
//!
//! # Architecture
//! ```text
//! Scheduler (trait)
//!   └── TokioScheduler          ← Tokio-driven, JSON-persisted scheduler
//!         ├── ScheduledTask      ← cron | run_at, gated by a fresh interceptor per fire
//!         └── SchedulerAuxiliaries ← AI reviewer / shield / phone verifier, borrowed not owned
//! ```
//!
//! # Key behaviours
//! - Ticks every second; executes due tasks concurrently via `tokio::spawn`
//! - Stuck detection: tasks running > 120 s emit `SystemError` via `EventBus`
//! - Cron expressions must fire no more than once an hour (`MIN_INTERVAL_SECONDS`)
//! - History ring-buffer: last 100 executions per task

pub mod tokio_scheduler;
pub mod traits;

pub use tokio_scheduler::{
    validate_cron_interval, SchedulerAuxiliaries, SchedulerError, TaskRunner, TokioScheduler,
    MIN_INTERVAL_SECONDS,
};
pub use traits::{ScheduledTask, Scheduler, TaskExecution, TaskId, TaskStatus};
