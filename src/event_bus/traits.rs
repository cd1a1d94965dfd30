use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// All events that flow through the application event bus.
///
/// Variant names mirror the Chat WebSocket protocol's `event` subtypes
/// (spec §6) so the gateway can serialize them near-verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// Emitted immediately after a session is registered, before the agent
    /// runs. Clients should capture `session_id` here to enable cancellation.
    AgentStarted {
        session_id: String,
    },
    AgentComplete {
        session_id: String,
        message: String,
    },
    ToolStart {
        call_id: String,
        tool: String,
        args: String,
    },
    ToolComplete {
        call_id: String,
        result: String,
    },
    ToolDenied {
        call_id: String,
        tool: String,
        reason: String,
    },
    ApprovalRequest {
        call_id: String,
        tool: String,
        arguments: String,
    },
    ApprovalResolved {
        call_id: String,
        tool: String,
        approved: bool,
    },
    AitlReviewStarted {
        call_id: String,
        tool: String,
    },
    AitlReviewComplete {
        call_id: String,
        tool: String,
        approved: bool,
        reason: String,
    },
    PhoneVerificationStarted {
        call_id: String,
        tool: String,
        arguments: String,
    },
    PhoneVerificationComplete {
        call_id: String,
        tool: String,
        approved: bool,
    },
    HeartbeatTick {
        timestamp: String,
    },
    CronFired {
        task_id: String,
        description: String,
    },
    SchedulerTaskComplete {
        task_id: String,
        result: Option<String>,
    },
    ChannelMessage {
        channel: String,
        from: String,
        content: String,
        #[serde(default)]
        metadata: std::collections::HashMap<String, String>,
    },
    ProactiveMessage {
        content: String,
    },
    SystemReady,
    SystemError {
        message: String,
    },
}

/// Selects which event variants a subscriber is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    AgentStarted,
    AgentComplete,
    ToolStart,
    ToolComplete,
    ToolDenied,
    ApprovalRequest,
    ApprovalResolved,
    AitlReviewStarted,
    AitlReviewComplete,
    PhoneVerificationStarted,
    PhoneVerificationComplete,
    HeartbeatTick,
    CronFired,
    SchedulerTaskComplete,
    ChannelMessage,
    ProactiveMessage,
    SystemReady,
    SystemError,
    /// Matches every variant.
    All,
}

impl EventType {
    /// Returns true if this filter matches `event`.
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            Self::All => true,
            Self::AgentStarted => matches!(event, AppEvent::AgentStarted { .. }),
            Self::AgentComplete => matches!(event, AppEvent::AgentComplete { .. }),
            Self::ToolStart => matches!(event, AppEvent::ToolStart { .. }),
            Self::ToolComplete => matches!(event, AppEvent::ToolComplete { .. }),
            Self::ToolDenied => matches!(event, AppEvent::ToolDenied { .. }),
            Self::ApprovalRequest => matches!(event, AppEvent::ApprovalRequest { .. }),
            Self::ApprovalResolved => matches!(event, AppEvent::ApprovalResolved { .. }),
            Self::AitlReviewStarted => matches!(event, AppEvent::AitlReviewStarted { .. }),
            Self::AitlReviewComplete => matches!(event, AppEvent::AitlReviewComplete { .. }),
            Self::PhoneVerificationStarted => {
                matches!(event, AppEvent::PhoneVerificationStarted { .. })
            }
            Self::PhoneVerificationComplete => {
                matches!(event, AppEvent::PhoneVerificationComplete { .. })
            }
            Self::HeartbeatTick => matches!(event, AppEvent::HeartbeatTick { .. }),
            Self::CronFired => matches!(event, AppEvent::CronFired { .. }),
            Self::SchedulerTaskComplete => matches!(event, AppEvent::SchedulerTaskComplete { .. }),
            Self::ChannelMessage => matches!(event, AppEvent::ChannelMessage { .. }),
            Self::ProactiveMessage => matches!(event, AppEvent::ProactiveMessage { .. }),
            Self::SystemReady => matches!(event, AppEvent::SystemReady),
            Self::SystemError => matches!(event, AppEvent::SystemError { .. }),
        }
    }
}

/// A set of event types used for filtering subscriptions.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    pub fn new(event_types: Vec<EventType>) -> Self {
        Self { event_types }
    }

    pub fn matches(&self, event: &AppEvent) -> bool {
        self.event_types.iter().any(|t| t.matches(event))
    }
}

/// Central pub/sub bus for application events.
///
/// All returned `Receiver`s receive every published event; callers are
/// responsible for filtering if they subscribed via [`subscribe_filtered`].
pub trait EventBus: Send + Sync {
    /// Publish an event to all active subscribers.
    fn publish(&self, event: AppEvent) -> Result<(), String>;

    /// Subscribe to all events.
    fn subscribe(&self) -> broadcast::Receiver<AppEvent>;

    /// Subscribe to events, pre-scoped to the given filter.
    ///
    /// The returned receiver still carries all events; the filter is provided
    /// as documentation / future optimisation surface. Consumers should call
    /// [`EventFilter::matches`] to discard unwanted events.
    fn subscribe_filtered(&self, filter: EventFilter) -> broadcast::Receiver<AppEvent>;
}
