//! Agent-facing plumbing: session-key routing and the consumed Agent SDK
//! boundary.
//!
//! The LLM reasoning loop itself is an external collaborator (see
//! [`sdk::AgentSdk`]); this module only tracks which session belongs to
//! which channel/peer and defines the trait surface the rest of the
//! runtime (interceptor, scheduler, proactive loop) drives.
//!
//! # Key types
//! - [`SessionRouter`] — resolves/creates sessions keyed by agent+scope+channel+peer
//! - [`sdk::AgentSdk`] / [`sdk::AgentSession`] — the consumed Agent SDK trait
//! - [`demux::EventDemux`] — deduplicates and forwards one session's event stream

pub mod demux;
pub mod sdk;
pub mod session_router;

pub use demux::{DemuxOutput, EventDemux};
pub use session_router::{Session, SessionKey, SessionMessage, SessionRouter};
