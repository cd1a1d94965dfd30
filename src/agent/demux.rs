//! Event Demultiplexer — drains one [`AgentSession`](super::sdk::AgentSession)'s
//! event stream for a single turn, deduplicating `ToolCall`/`ToolResult` by
//! `call_id` (the SDK occasionally emits duplicates), and forwards
//! deltas/events downstream until a terminal `Complete`/`Error` event
//! resolves the turn.
//!
//! Distinct from [`crate::event_bus`] (runtime-wide pub/sub of [`crate::event_bus::AppEvent`]s)
//! and [`crate::agent::session_router`] (session-key bookkeeping): this is
//! per-turn plumbing between one session's event stream and whatever is
//! driving it (the gateway's WebSocket handler, a bot-processor loop).

use std::collections::HashSet;

use tokio::sync::{broadcast, mpsc};

use super::sdk::SessionEvent;

/// One deduplicated item the demultiplexer forwards downstream.
#[derive(Debug, Clone)]
pub enum DemuxOutput {
    /// Assistant-message streaming chunk (`SessionEvent::Message`).
    Delta(String),
    /// Any other event, already deduplicated for `ToolCall`/`ToolResult`.
    Event(SessionEvent),
}

pub struct EventDemux;

impl EventDemux {
    /// Drain `rx` until a terminal event, forwarding deduplicated items to
    /// `tx`. Returns `Ok(summary)` on `Complete`, `Err(message)` on
    /// `Error` or if the stream closes before either arrives.
    pub async fn run(
        mut rx: broadcast::Receiver<SessionEvent>,
        tx: mpsc::UnboundedSender<DemuxOutput>,
    ) -> Result<String, String> {
        let mut seen_calls = HashSet::new();
        let mut seen_results = HashSet::new();

        loop {
            match rx.recv().await {
                Ok(SessionEvent::Message { content }) => {
                    let _ = tx.send(DemuxOutput::Delta(content));
                }
                Ok(ev @ SessionEvent::ToolCall(_)) => {
                    let SessionEvent::ToolCall(ref invocation) = ev else { unreachable!() };
                    if seen_calls.insert(invocation.call_id.clone()) {
                        let _ = tx.send(DemuxOutput::Event(ev));
                    }
                }
                Ok(ev @ SessionEvent::ToolResult { .. }) => {
                    let SessionEvent::ToolResult { ref call_id, .. } = ev else { unreachable!() };
                    if seen_results.insert(call_id.clone()) {
                        let _ = tx.send(DemuxOutput::Event(ev));
                    }
                }
                Ok(ev @ SessionEvent::Started) => {
                    let _ = tx.send(DemuxOutput::Event(ev));
                }
                Ok(ev @ SessionEvent::Complete { .. }) => {
                    let SessionEvent::Complete { ref summary } = ev else { unreachable!() };
                    let summary = summary.clone();
                    let _ = tx.send(DemuxOutput::Event(ev));
                    return Ok(summary);
                }
                Ok(ev @ SessionEvent::Error { .. }) => {
                    let SessionEvent::Error { ref message } = ev else { unreachable!() };
                    let message = message.clone();
                    let _ = tx.send(DemuxOutput::Event(ev));
                    return Err(message);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(n, "event demultiplexer lagged, dropped buffered events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err("session event stream closed before completion".to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::sdk::ToolInvocation;

    fn invocation(call_id: &str) -> ToolInvocation {
        ToolInvocation {
            tool_name: "read_file".to_string(),
            call_id: call_id.to_string(),
            tool_args: "{}".to_string(),
            mcp_server: None,
        }
    }

    #[tokio::test]
    async fn forwards_deltas_and_completes() {
        let (tx, rx) = broadcast::channel(16);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        tx.send(SessionEvent::Started).unwrap();
        tx.send(SessionEvent::Message { content: "Hel".to_string() }).unwrap();
        tx.send(SessionEvent::Message { content: "lo".to_string() }).unwrap();
        tx.send(SessionEvent::Complete { summary: "done".to_string() }).unwrap();

        let result = EventDemux::run(rx, out_tx).await;
        assert_eq!(result, Ok("done".to_string()));

        let mut deltas = Vec::new();
        while let Ok(item) = out_rx.try_recv() {
            if let DemuxOutput::Delta(d) = item {
                deltas.push(d);
            }
        }
        assert_eq!(deltas, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn deduplicates_tool_call_and_result_by_call_id() {
        let (tx, rx) = broadcast::channel(16);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        tx.send(SessionEvent::ToolCall(invocation("c1"))).unwrap();
        tx.send(SessionEvent::ToolCall(invocation("c1"))).unwrap(); // duplicate
        tx.send(SessionEvent::ToolResult { call_id: "c1".to_string(), result: "ok".to_string() })
            .unwrap();
        tx.send(SessionEvent::ToolResult { call_id: "c1".to_string(), result: "ok".to_string() })
            .unwrap(); // duplicate
        tx.send(SessionEvent::Complete { summary: "done".to_string() }).unwrap();

        EventDemux::run(rx, out_tx).await.unwrap();

        let mut tool_calls = 0;
        let mut tool_results = 0;
        while let Ok(item) = out_rx.try_recv() {
            match item {
                DemuxOutput::Event(SessionEvent::ToolCall(_)) => tool_calls += 1,
                DemuxOutput::Event(SessionEvent::ToolResult { .. }) => tool_results += 1,
                _ => {}
            }
        }
        assert_eq!(tool_calls, 1, "duplicate ToolCall should be deduped by call_id");
        assert_eq!(tool_results, 1, "duplicate ToolResult should be deduped by call_id");
    }

    #[tokio::test]
    async fn error_event_is_terminal() {
        let (tx, rx) = broadcast::channel(16);
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        tx.send(SessionEvent::Error { message: "boom".to_string() }).unwrap();
        let result = EventDemux::run(rx, out_tx).await;
        assert_eq!(result, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn closed_stream_without_terminal_event_is_an_error() {
        let (tx, rx) = broadcast::channel(16);
        let (_out_tx, _out_rx) = mpsc::unbounded_channel();
        drop(tx);
        let result = EventDemux::run(rx, _out_tx).await;
        assert!(result.is_err());
    }
}
