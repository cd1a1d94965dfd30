//! Notification routing service.
//!
//! `NotificationService` subscribes to the [`EventBus`] and routes
//! notification-worthy events to the user's preferred channel via
//! [`ChannelManager`].
//!
//! ## Event routing
//! | Event                | Category  | Config flag               |
//! |-----------------------|-----------|----------------------------|
//! | `CronFired`           | scheduler | `notify_scheduler`         |
//! | `AgentComplete`       | agent     | `notify_agent_complete`    |
//! | `ApprovalRequest`     | approval  | `notify_approval_request`  |
//! | `SystemError`         | system    | always on (unless DND)     |
//!
//! A global Do Not Disturb flag suppresses everything; an optional
//! time-of-day DND window additionally suppresses non-approval categories.

use std::sync::{Arc, RwLock};

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::{
    channels::ChannelManager,
    config::NotificationsConfig,
    event_bus::{AppEvent, EventBus},
};

// ─── NotificationCategory ────────────────────────────────────────────────────

/// Notification category — used for per-category preference settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Scheduler,
    Agent,
    Approval,
    System,
}

// ─── NotificationSpec ────────────────────────────────────────────────────────

/// A notification ready to be displayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSpec {
    pub title: String,
    pub body: String,
    pub category: NotificationCategory,
    /// Optional identifier for click-to-open navigation (session/task id).
    pub reference_id: Option<String>,
}

// ─── event_to_notification ───────────────────────────────────────────────────

/// Map an [`AppEvent`] to a [`NotificationSpec`], or `None` if the event
/// should not trigger a notification.
pub fn event_to_notification(event: &AppEvent) -> Option<NotificationSpec> {
    match event {
        AppEvent::CronFired {
            task_id,
            description,
        } => Some(NotificationSpec {
            title: "Scheduled Task".to_string(),
            body: format!("Task '{description}' fired"),
            category: NotificationCategory::Scheduler,
            reference_id: Some(task_id.clone()),
        }),
        AppEvent::AgentComplete {
            session_id,
            message,
        } => Some(NotificationSpec {
            title: "Agent Task Complete".to_string(),
            body: message.chars().take(120).collect(),
            category: NotificationCategory::Agent,
            reference_id: Some(session_id.clone()),
        }),
        AppEvent::ApprovalRequest {
            call_id,
            tool,
            arguments,
        } => Some(NotificationSpec {
            title: format!("Approval Required: {tool}"),
            body: arguments.chars().take(120).collect(),
            category: NotificationCategory::Approval,
            reference_id: Some(call_id.clone()),
        }),
        AppEvent::SystemError { message } => Some(NotificationSpec {
            title: "System Error".to_string(),
            body: message.chars().take(120).collect(),
            category: NotificationCategory::System,
            reference_id: None,
        }),
        // All other events do not trigger notifications.
        _ => None,
    }
}

fn category_key(category: NotificationCategory) -> &'static str {
    match category {
        NotificationCategory::Scheduler => "scheduler",
        NotificationCategory::Agent => "agent",
        NotificationCategory::Approval => "approval",
        NotificationCategory::System => "system",
    }
}

/// Return `true` if `hour` falls inside the `[start, end)` DND window,
/// wrapping past midnight when `start > end`.
fn in_dnd_window(start: u8, end: u8, hour: u8) -> bool {
    if start == end {
        return false;
    }
    if start < end {
        (start..end).contains(&hour)
    } else {
        hour >= start || hour < end
    }
}

// ─── NotificationService ─────────────────────────────────────────────────────

/// Subscribes to the event bus and routes events to the configured
/// notification channel via [`ChannelManager`].
pub struct NotificationService {
    config: Arc<RwLock<NotificationsConfig>>,
    bus: Arc<dyn EventBus>,
    channels: Arc<ChannelManager>,
    /// Channel name notifications are delivered on (e.g. `"web"`, `"bot"`).
    target_channel: String,
}

impl NotificationService {
    pub fn new(bus: Arc<dyn EventBus>, channels: Arc<ChannelManager>) -> Self {
        Self {
            config: Arc::new(RwLock::new(NotificationsConfig::default())),
            bus,
            channels,
            target_channel: "web".to_string(),
        }
    }

    pub fn with_config(
        bus: Arc<dyn EventBus>,
        channels: Arc<ChannelManager>,
        config: NotificationsConfig,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            bus,
            channels,
            target_channel: "web".to_string(),
        }
    }

    pub fn with_target_channel(mut self, channel: impl Into<String>) -> Self {
        self.target_channel = channel.into();
        self
    }

    /// Update the notification configuration at runtime.
    pub fn update_config(&self, new_config: NotificationsConfig) {
        if let Ok(mut guard) = self.config.write() {
            *guard = new_config;
        }
    }

    fn is_enabled_for(&self, category: NotificationCategory, now: chrono::DateTime<chrono::Utc>) -> bool {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        if !config.enabled || config.do_not_disturb {
            return false;
        }
        let flag_enabled = match category {
            NotificationCategory::Scheduler => config.notify_scheduler,
            NotificationCategory::Agent => config.notify_agent_complete,
            NotificationCategory::Approval => config.notify_approval_request,
            NotificationCategory::System => true,
        };
        if !flag_enabled {
            return false;
        }
        if let Some(&enabled) = config.categories.get(category_key(category)) {
            if !enabled {
                return false;
            }
        }
        // Approvals bypass the time-of-day DND window: they gate a pending action.
        if category != NotificationCategory::Approval
            && config.dnd_schedule_enabled
            && in_dnd_window(config.dnd_start_hour, config.dnd_end_hour, now.hour() as u8)
        {
            return false;
        }
        true
    }

    /// Return `true` if the event passes both the mapping and config filter.
    pub fn should_notify(&self, event: &AppEvent) -> bool {
        let Some(spec) = event_to_notification(event) else {
            return false;
        };
        self.is_enabled_for(spec.category, chrono::Utc::now())
    }

    /// Start the background listener loop, delivering enabled notifications
    /// to `target_channel` via the channel manager.
    pub fn start(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(spec) = event_to_notification(&event) else {
                            continue;
                        };
                        if !self.is_enabled_for(spec.category, chrono::Utc::now()) {
                            continue;
                        }
                        let body = format!("{}: {}", spec.title, spec.body);
                        if let Err(e) = self
                            .channels
                            .send(&self.target_channel, &body, spec.reference_id.as_deref())
                            .await
                        {
                            log::warn!("[notification] delivery on '{}' failed: {e}", self.target_channel);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("[notification] lagged by {n} events");
                    }
                }
            }
        });
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
