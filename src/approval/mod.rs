//! Approval Broker — tracks pending human-in-the-loop approvals and
//! resolves them from whichever channel the human replies on.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// 300s, matching the original `_APPROVAL_TIMEOUT`.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("no pending approval for call_id {0}")]
    NotFound(String),
    #[error("approval timed out after {0:?}")]
    TimedOut(Duration),
    #[error("approval channel closed before resolution")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub approved: bool,
}

struct Pending {
    tool_name: String,
    sender: Option<oneshot::Sender<ApprovalOutcome>>,
    deadline: Instant,
}

/// Holds one [`oneshot`] future per in-flight `call_id`. A bot channel with
/// no addressable `call_id` (e.g. a bare "y" reply) resolves the oldest
/// still-pending entry instead — `resolve_latest_with_reply` implements
/// that FIFO fallback.
#[derive(Default)]
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, Pending>>,
    order: Mutex<Vec<String>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending approval and return the future side. The
    /// caller is responsible for awaiting it with a timeout (see
    /// [`APPROVAL_TIMEOUT`]).
    pub fn register(
        &self,
        call_id: &str,
        tool_name: &str,
    ) -> oneshot::Receiver<ApprovalOutcome> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + APPROVAL_TIMEOUT;
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(
            call_id.to_string(),
            Pending {
                tool_name: tool_name.to_string(),
                sender: Some(tx),
                deadline,
            },
        );
        self.order.lock().unwrap_or_else(|e| e.into_inner()).push(call_id.to_string());
        rx
    }

    /// Resolve a specific `call_id` (web channel: the client echoes back
    /// the `call_id` it was given in `approval_request`).
    pub fn resolve(&self, call_id: &str, approved: bool) -> Result<(), ApprovalError> {
        let sender = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let entry = pending.remove(call_id).ok_or_else(|| ApprovalError::NotFound(call_id.to_string()))?;
            entry.sender
        };
        self.order.lock().unwrap_or_else(|e| e.into_inner()).retain(|c| c != call_id);
        if let Some(sender) = sender {
            sender.send(ApprovalOutcome { approved }).map_err(|_| ApprovalError::Closed)?;
        }
        Ok(())
    }

    /// Resolve the oldest still-pending approval (bot channel: a plain
    /// "y"/anything-else reply carries no `call_id`).
    pub fn resolve_latest_with_reply(&self, approved: bool) -> Result<Option<String>, ApprovalError> {
        let call_id = {
            let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
            if order.is_empty() {
                return Ok(None);
            }
            order.remove(0)
        };
        self.resolve(&call_id, approved)?;
        Ok(Some(call_id))
    }

    pub fn tool_name_for(&self, call_id: &str) -> Option<String> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(call_id)
            .map(|p| p.tool_name.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop expired entries past their deadline, returning their `call_id`s
    /// so callers can emit `ToolDenied`/timeout events.
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            pending.remove(id);
        }
        drop(pending);
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        order.retain(|id| !expired.contains(id));
        expired
    }
}
