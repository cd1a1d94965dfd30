//! Phone-in-the-loop verifier — places an outbound call to a configured
//! number and waits for the callee to accept or decline the pending tool
//! call via voice-driven tool schemas.
//!
//! Grounded on `phone_verify.py`. Only one verification can be in flight
//! at a time, matching the original's single outbound-line assumption. A
//! second call arriving while one is pending does not run concurrently or
//! fail outright — it queues behind the line and is placed once the first
//! verification resolves (§4.5.3).

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::oneshot;

/// 300s, matching `_PHONE_VERIFY_TIMEOUT`.
pub const PHONE_VERIFY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum PitlError {
    #[error("no target phone number configured")]
    NotConfigured,
    #[error("call failed: {0}")]
    CallFailed(String),
    #[error("verification timed out after {0:?}")]
    TimedOut(Duration),
}

/// Places outbound calls and drives the in-call tool-use loop. Wraps
/// whatever telephony/voice provider a deployment configures.
#[async_trait]
pub trait PhoneDialer: Send + Sync {
    async fn call(&self, number: &str, summary: &str) -> Result<(), String>;
}

/// The two tool schemas exposed to the callee during a phone verification
/// call, verbatim in shape from `phone_verify.py::VERIFY_TOOL_SCHEMAS`.
pub fn verify_tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "name": "accept_operation",
            "description": "Accept the pending operation and allow it to proceed.",
            "parameters": { "type": "object", "properties": {}, "required": [] },
        }),
        json!({
            "type": "function",
            "name": "decline_operation",
            "description": "Decline the pending operation and block it.",
            "parameters": { "type": "object", "properties": {}, "required": [] },
        }),
    ]
}

struct Pending {
    sender: oneshot::Sender<bool>,
}

pub struct PhoneVerifier {
    target_number: Option<String>,
    dialer: Box<dyn PhoneDialer>,
    /// Held for the duration of one verification. A second caller's
    /// `.lock().await` simply queues behind whoever holds it — that's the
    /// single outbound line.
    line: tokio::sync::Mutex<()>,
    pending: Mutex<Option<Pending>>,
}

impl PhoneVerifier {
    pub fn new(target_number: Option<String>, dialer: Box<dyn PhoneDialer>) -> Self {
        Self {
            target_number,
            dialer,
            line: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
        }
    }

    /// Place a call and wait up to [`PHONE_VERIFY_TIMEOUT`] for the callee
    /// to invoke `accept_operation`/`decline_operation`. If another
    /// verification is already in flight, this call queues behind it and
    /// is dialed once the line frees up.
    pub async fn verify(&self, tool_name: &str, summary: &str) -> Result<bool, PitlError> {
        let Some(number) = &self.target_number else {
            return Err(PitlError::NotConfigured);
        };
        let _line = self.line.lock().await;
        let rx = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let (tx, rx) = oneshot::channel();
            *pending = Some(Pending { sender: tx });
            rx
        };

        if let Err(err) = self.dialer.call(number, &format!("Approve {tool_name}? {summary}")).await {
            *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = None;
            return Err(PitlError::CallFailed(err));
        }

        match tokio::time::timeout(PHONE_VERIFY_TIMEOUT, rx).await {
            Ok(Ok(approved)) => Ok(approved),
            Ok(Err(_)) => {
                *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = None;
                Err(PitlError::CallFailed("verification channel closed".to_string()))
            }
            Err(_) => {
                *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = None;
                Err(PitlError::TimedOut(PHONE_VERIFY_TIMEOUT))
            }
        }
    }

    /// Resolve the in-flight verification — called when the callee invokes
    /// `accept_operation`/`decline_operation`.
    pub fn resolve(&self, approved: bool) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        match pending {
            Some(p) => p.sender.send(approved).is_ok(),
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDialer;

    #[async_trait]
    impl PhoneDialer for FakeDialer {
        async fn call(&self, _number: &str, _summary: &str) -> Result<(), String> {
            Ok(())
        }
    }

    struct FailingDialer;

    #[async_trait]
    impl PhoneDialer for FailingDialer {
        async fn call(&self, _number: &str, _summary: &str) -> Result<(), String> {
            Err("no carrier".to_string())
        }
    }

    #[tokio::test]
    async fn not_configured_returns_error() {
        let verifier = PhoneVerifier::new(None, Box::new(FakeDialer));
        assert!(matches!(verifier.verify("send_email", "x").await, Err(PitlError::NotConfigured)));
    }

    #[tokio::test]
    async fn resolve_before_timeout_returns_outcome() {
        let verifier = std::sync::Arc::new(PhoneVerifier::new(
            Some("+15551234".to_string()),
            Box::new(FakeDialer),
        ));
        let v2 = verifier.clone();
        let handle = tokio::spawn(async move { v2.verify("send_email", "summary").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(verifier.resolve(true));
        assert_eq!(handle.await.unwrap().unwrap(), true);
    }

    #[tokio::test]
    async fn dial_failure_frees_the_line() {
        let verifier = PhoneVerifier::new(Some("+15551234".to_string()), Box::new(FailingDialer));
        assert!(verifier.verify("send_email", "x").await.is_err());
        assert!(!verifier.is_busy());
    }

    struct CountingDialer {
        calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl PhoneDialer for CountingDialer {
        async fn call(&self, _number: &str, _summary: &str) -> Result<(), String> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_verify_queues_behind_the_first() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let verifier = std::sync::Arc::new(PhoneVerifier::new(
            Some("+15551234".to_string()),
            Box::new(CountingDialer { calls: calls.clone() }),
        ));
        let v2 = verifier.clone();
        let first = tokio::spawn(async move { v2.verify("send_email", "first").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(verifier.is_busy());

        let v3 = verifier.clone();
        let second = tokio::spawn(async move { v3.verify("send_email", "second").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        // second hasn't dialed yet: it's queued behind the first's still-open line.
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        assert!(verifier.resolve(true));
        assert!(first.await.unwrap().unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(verifier.resolve(false));
        assert!(!second.await.unwrap().unwrap());
    }

    #[test]
    fn tool_schemas_expose_accept_and_decline() {
        let schemas = verify_tool_schemas();
        let names: Vec<&str> = schemas.iter().map(|s| s["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["accept_operation", "decline_operation"]);
    }
}
