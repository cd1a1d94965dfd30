//! Proactive Delivery Loop — periodically considers whether the agent
//! should reach out to the user unprompted, and if so, delivers the
//! message on the appropriate channel.
//!
//! Grounded on `proactive_loop.py`. Two actions: `generate` (ask the agent
//! whether there's anything worth a follow-up) and `deliver` (send a
//! previously-generated candidate). A delivery failure is retried after 5
//! minutes rather than dropped.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};

/// The agent returns this sentinel when it has nothing worth sending.
pub const NO_FOLLOWUP: &str = "NO_FOLLOWUP";

/// A proactive message candidate must be within this length range to be
/// considered worth sending.
pub const MIN_CANDIDATE_LEN: usize = 10;
pub const MAX_CANDIDATE_LEN: usize = 500;

/// User must have been idle at least this long before a proactive message
/// is generated.
pub const MIN_USER_IDLE_HOURS: f64 = 1.0;

/// Minimum gap between two generation attempts, successful or not.
pub const GENERATION_COOLDOWN_MINUTES: i64 = 60;

/// Retry delay after a failed delivery.
pub const DELIVERY_RETRY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    start_minute: u32,
    end_minute: u32,
}

/// Parses `"9:00-12:00, 14:00-17:00"` into minute-of-day windows. A window
/// whose end is before its start wraps past midnight (e.g. `22:00-2:00`).
pub fn parse_preferred_windows(spec: &str) -> Vec<TimeWindow> {
    spec.split(',')
        .filter_map(|part| parse_one_window(part.trim()))
        .collect()
}

fn parse_one_window(part: &str) -> Option<TimeWindow> {
    let (start, end) = part.split_once('-')?;
    Some(TimeWindow {
        start_minute: parse_clock(start.trim())?,
        end_minute: parse_clock(end.trim())?,
    })
}

fn parse_clock(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// True if `now`'s local time falls inside any parsed window, handling
/// midnight wraparound.
pub fn in_preferred_window(windows: &[TimeWindow], now: DateTime<Utc>) -> bool {
    if windows.is_empty() {
        return true;
    }
    let minute_of_day = now.hour() * 60 + now.minute();
    windows.iter().any(|w| {
        if w.start_minute <= w.end_minute {
            (w.start_minute..w.end_minute).contains(&minute_of_day)
        } else {
            minute_of_day >= w.start_minute || minute_of_day < w.end_minute
        }
    })
}

/// True if a generated candidate is non-empty, not the sentinel, and
/// within the accepted length range.
pub fn is_valid_candidate(candidate: &str) -> bool {
    let trimmed = candidate.trim();
    if trimmed == NO_FOLLOWUP {
        return false;
    }
    let len = trimmed.chars().count();
    (MIN_CANDIDATE_LEN..=MAX_CANDIDATE_LEN).contains(&len)
}

/// Asks the agent whether there's a message worth sending proactively.
#[async_trait]
pub trait ProactiveGenerator: Send + Sync {
    async fn generate(&self) -> Result<String, String>;
}

/// Delivers a proactive message on whatever channel the user prefers.
#[async_trait]
pub trait ProactiveDeliverer: Send + Sync {
    async fn deliver(&self, content: &str) -> Result<(), String>;
}

pub struct ProactiveLoopState {
    pub last_generation: Option<DateTime<Utc>>,
    pub last_user_activity: Option<DateTime<Utc>>,
    pub pending_candidate: Option<String>,
}

impl Default for ProactiveLoopState {
    fn default() -> Self {
        Self {
            last_generation: None,
            last_user_activity: None,
            pending_candidate: None,
        }
    }
}

/// Decides, given the current state and time, whether generation should
/// run this tick.
pub fn should_generate(state: &ProactiveLoopState, now: DateTime<Utc>) -> bool {
    if state.pending_candidate.is_some() {
        return false;
    }
    if let Some(last) = state.last_generation {
        if (now - last).num_minutes() < GENERATION_COOLDOWN_MINUTES {
            return false;
        }
    }
    match state.last_user_activity {
        Some(last) => {
            let idle_hours = (now - last).num_seconds() as f64 / 3600.0;
            idle_hours >= MIN_USER_IDLE_HOURS
        }
        None => true,
    }
}

/// Runs one tick of the proactive loop: generate if due, else deliver a
/// pending candidate if the preferred-hours window allows it.
pub async fn tick(
    state: &mut ProactiveLoopState,
    windows: &[TimeWindow],
    generator: &dyn ProactiveGenerator,
    deliverer: &dyn ProactiveDeliverer,
    now: DateTime<Utc>,
) {
    if let Some(candidate) = state.pending_candidate.clone() {
        if in_preferred_window(windows, now) {
            match deliverer.deliver(&candidate).await {
                Ok(()) => {
                    state.pending_candidate = None;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "proactive delivery failed, retrying later");
                    tokio::time::sleep(DELIVERY_RETRY).await;
                }
            }
        }
        return;
    }

    if should_generate(state, now) {
        state.last_generation = Some(now);
        match generator.generate().await {
            Ok(candidate) if is_valid_candidate(&candidate) => {
                state.pending_candidate = Some(candidate.trim().to_string());
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "proactive generation failed");
            }
        }
    }
}
