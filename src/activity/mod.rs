//! Tool Activity Store — append-only audit log of every tool invocation.
//!
//! Entries are written as JSON-lines to `path` (default
//! `~/.wardenloop/tool_activity.jsonl`) and indexed in memory by `id`.
//! Re-appearing `id`s (a `started` row followed later by a `completed`/
//! `denied`/`error` row) supersede earlier versions on reload, so the file
//! is safe to replay top-to-bottom after a crash.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("failed to read activity log: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write activity log: {0}")]
    Write(#[source] std::io::Error),
    #[error("malformed activity entry: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// One row per tool invocation. A `started` entry is later superseded by a
/// `completed`/`denied`/`error` entry carrying the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolActivityEntry {
    pub id: String,
    pub session_id: String,
    pub tool: String,
    pub call_id: String,
    /// `sdk` | `custom` | `mcp` | `skill`
    pub category: String,
    pub arguments: String,
    #[serde(default)]
    pub result: String,
    /// `started` | `completed` | `denied` | `error`
    pub status: String,
    pub timestamp: f64,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub flag_reason: String,
    #[serde(default)]
    pub risk_score: u8,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub model: String,
    /// "" | hitl | aitl | pitl | filter | deny
    #[serde(default)]
    pub interaction_type: String,
    /// "" | clean | attack | error | skipped
    #[serde(default)]
    pub shield_result: String,
    #[serde(default)]
    pub shield_detail: String,
    #[serde(default)]
    pub shield_elapsed_ms: Option<f64>,
}

/// `(pattern, severity 1-100, description)`. Matched as plain lowercase
/// substring containment against `"{arguments} {result}"` — not a regex
/// engine — to match the original risk heuristic exactly.
const SUSPICIOUS_PATTERNS: &[(&str, u8, &str)] = &[
    ("rm -rf", 90, "Recursive forced deletion"),
    ("rm -r /", 100, "Root filesystem deletion"),
    ("drop table", 85, "SQL table drop"),
    ("delete from", 60, "SQL mass deletion"),
    ("curl", 80, "Remote code execution via curl"),
    ("wget", 80, "Remote code execution via wget"),
    ("eval(", 75, "Dynamic code evaluation"),
    ("exec(", 75, "Dynamic code execution"),
    ("os.system", 70, "Shell command execution"),
    ("subprocess", 50, "Subprocess invocation"),
    ("chmod 777", 65, "World-writable permissions"),
    ("passwd", 55, "Password file access"),
    ("/etc/shadow", 90, "Shadow password file access"),
    ("env | grep", 45, "Environment variable enumeration"),
    ("printenv", 45, "Environment variable dump"),
    ("base64 -d", 60, "Base64 decode (potential obfuscation)"),
    (".ssh/", 70, "SSH directory access"),
    ("id_rsa", 85, "SSH private key access"),
    ("private key", 95, "Private key exposure"),
    ("api_key", 50, "API key in arguments"),
    ("secret", 55, "Secret value in arguments"),
    ("token", 45, "Token value in arguments"),
    ("password", 50, "Password in arguments"),
    ("credentials", 55, "Credentials reference"),
    ("sudo ", 60, "Privilege escalation"),
    ("nc -l", 70, "Netcat listener (reverse shell)"),
    (">&/dev/tcp", 90, "Bash reverse shell"),
    ("/dev/tcp", 85, "Network device access"),
    ("mkfifo", 65, "Named pipe creation"),
    ("nmap", 55, "Network scanning"),
    ("sqlmap", 80, "SQL injection tool"),
    (".env", 40, "Environment file access"),
    ("aws configure", 50, "Cloud credential configuration"),
    ("gcloud auth", 50, "Cloud credential configuration"),
    ("az login", 40, "Azure CLI login"),
    ("docker run", 45, "Container execution"),
    ("kubectl exec", 55, "Kubernetes pod execution"),
];

/// Minimum severity at which an entry is auto-flagged.
const FLAG_THRESHOLD: u8 = 40;

fn check_suspicious(arguments: &str, result: &str) -> (bool, String, u8, Vec<String>) {
    let text = format!("{arguments} {result}").to_lowercase();
    let mut factors = Vec::new();
    let mut max_severity: u8 = 0;
    let mut primary_reason = String::new();
    for (pattern, severity, description) in SUSPICIOUS_PATTERNS {
        if text.contains(pattern) {
            factors.push((*description).to_string());
            if *severity > max_severity {
                max_severity = *severity;
                primary_reason = format!("Suspicious pattern: {pattern}");
            }
        }
    }
    (max_severity >= FLAG_THRESHOLD, primary_reason, max_severity, factors)
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn infer_category(tool: &str) -> String {
    const SDK_TOOLS: &[&str] = &["create", "edit", "view", "grep", "glob", "run", "bash"];
    let lower = tool.to_lowercase();
    if SDK_TOOLS.contains(&lower.as_str()) {
        "sdk".to_string()
    } else if tool.contains("__") || tool.contains('.') || tool.starts_with("mcp_") {
        "mcp".to_string()
    } else {
        "custom".to_string()
    }
}

#[derive(Default)]
struct Inner {
    entries: Vec<ToolActivityEntry>,
    pending_starts: HashMap<String, usize>, // call_id -> index into entries
    counter: u64,
}

/// Append-only audit store. Reads take a snapshot; writes are serialized
/// through a single mutex (matching §5's "file-level lock" requirement).
pub struct ToolActivityStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone)]
pub struct ActivityQuery {
    pub session_id: Option<String>,
    pub tool: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub flagged_only: bool,
    pub since: Option<f64>,
    pub model: Option<String>,
    pub interaction_type: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ActivityQuery {
    fn default() -> Self {
        Self {
            session_id: None,
            tool: None,
            category: None,
            status: None,
            flagged_only: false,
            since: None,
            model: None,
            interaction_type: None,
            limit: 500,
            offset: 0,
        }
    }
}

pub struct QueryResult {
    pub entries: Vec<ToolActivityEntry>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct ActivitySummary {
    pub total: usize,
    pub flagged: usize,
    pub by_tool: HashMap<String, usize>,
    pub by_category: HashMap<String, usize>,
    pub by_status: HashMap<String, usize>,
    pub by_model: HashMap<String, usize>,
    pub by_interaction_type: HashMap<String, usize>,
    pub sessions_with_activity: usize,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub risk_high: usize,
    pub risk_medium: usize,
    pub risk_low: usize,
}

#[derive(Debug, Serialize)]
pub struct TimelineBucket {
    pub timestamp: i64,
    pub total: usize,
    pub flagged: usize,
}

impl ToolActivityStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ActivityError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ActivityError::Write)?;
        }
        let store = Self {
            path,
            inner: Mutex::new(Inner::default()),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&self) -> Result<(), ActivityError> {
        if !self.path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&self.path).map_err(ActivityError::Read)?;
        let mut by_id: HashMap<String, ToolActivityEntry> = HashMap::new();
        let mut counter = 0u64;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: ToolActivityEntry =
                serde_json::from_str(line).map_err(ActivityError::Malformed)?;
            if let Some(n) = entry.id.rsplit('-').next().and_then(|s| s.parse::<u64>().ok()) {
                counter = counter.max(n);
            }
            by_id.insert(entry.id.clone(), entry);
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries = by_id.into_values().collect();
        inner.counter = counter;
        Ok(())
    }

    fn append_line(&self, entry: &ToolActivityEntry) -> Result<(), ActivityError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(ActivityError::Write)?;
        let line = serde_json::to_string(entry).map_err(ActivityError::Malformed)?;
        writeln!(file, "{line}").map_err(ActivityError::Write)?;
        Ok(())
    }

    /// Record the start of a tool invocation. Computes the initial risk
    /// score/factors from `arguments` alone.
    pub fn record_start(
        &self,
        session_id: &str,
        tool: &str,
        call_id: &str,
        arguments: &str,
        category: Option<&str>,
        model: &str,
        interaction_type: &str,
    ) -> Result<ToolActivityEntry, ActivityError> {
        let (flagged, flag_reason, risk_score, risk_factors) = check_suspicious(arguments, "");
        let entry = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.counter += 1;
            let id = format!("ta-{}", inner.counter);
            let entry = ToolActivityEntry {
                id,
                session_id: session_id.to_string(),
                tool: tool.to_string(),
                call_id: call_id.to_string(),
                category: category
                    .map(str::to_string)
                    .unwrap_or_else(|| infer_category(tool)),
                arguments: arguments.to_string(),
                result: String::new(),
                status: "started".to_string(),
                timestamp: now_unix(),
                duration_ms: None,
                flagged,
                flag_reason,
                risk_score,
                risk_factors,
                model: model.to_string(),
                interaction_type: interaction_type.to_string(),
                shield_result: String::new(),
                shield_detail: String::new(),
                shield_elapsed_ms: None,
            };
            let idx = inner.entries.len();
            inner.entries.push(entry.clone());
            inner.pending_starts.insert(call_id.to_string(), idx);
            entry
        };
        self.append_line(&entry)?;
        tracing::info!(id = %entry.id, tool, call_id, "tool activity: started");
        Ok(entry)
    }

    /// Attach a shield verdict to the still-pending entry for `call_id`.
    pub fn update_shield_result(
        &self,
        call_id: &str,
        shield_result: &str,
        shield_detail: &str,
        shield_elapsed_ms: Option<f64>,
    ) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&idx) = inner.pending_starts.get(call_id) {
            if let Some(entry) = inner.entries.get_mut(idx) {
                entry.shield_result = shield_result.to_string();
                entry.shield_detail = shield_detail.to_string();
                entry.shield_elapsed_ms = shield_elapsed_ms;
            }
        }
    }

    /// Record completion: looks up the pending start, computes duration,
    /// re-scans risk over `arguments ∪ result` (risk is monotone
    /// non-decreasing), and appends a terminal record under the same `id`.
    pub fn record_complete(
        &self,
        call_id: &str,
        result: &str,
        status: &str,
    ) -> Result<Option<ToolActivityEntry>, ActivityError> {
        let completion = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(idx) = inner.pending_starts.remove(call_id) else {
                return Ok(None);
            };
            let Some(entry) = inner.entries.get_mut(idx) else {
                return Ok(None);
            };
            let truncated: String = result.chars().take(2000).collect();
            entry.result = truncated;
            entry.status = status.to_string();
            entry.duration_ms = Some((now_unix() - entry.timestamp) * 1000.0);
            let (flagged, reason, risk, factors) =
                check_suspicious(&entry.arguments, &entry.result);
            if flagged && !entry.flagged {
                entry.flagged = true;
                entry.flag_reason = reason;
            }
            if risk > entry.risk_score {
                entry.risk_score = risk;
            }
            for f in factors {
                if !entry.risk_factors.contains(&f) {
                    entry.risk_factors.push(f);
                }
            }
            entry.clone()
        };
        self.append_line(&completion)?;
        tracing::info!(
            id = %completion.id, tool = %completion.tool, status, "tool activity: completed"
        );
        Ok(Some(completion))
    }

    fn snapshot_deduped(&self) -> Vec<ToolActivityEntry> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut by_id: HashMap<&str, &ToolActivityEntry> = HashMap::new();
        for e in &inner.entries {
            by_id.insert(&e.id, e);
        }
        let mut entries: Vec<ToolActivityEntry> = by_id.into_values().cloned().collect();
        entries.sort_by(|a, b| b.timestamp.partial_cmp(&a.timestamp).unwrap());
        entries
    }

    pub fn query(&self, q: &ActivityQuery) -> QueryResult {
        let mut entries = self.snapshot_deduped();
        if let Some(sid) = &q.session_id {
            entries.retain(|e| &e.session_id == sid);
        }
        if let Some(tool) = &q.tool {
            let needle = tool.to_lowercase();
            entries.retain(|e| e.tool.to_lowercase().contains(&needle));
        }
        if let Some(cat) = &q.category {
            entries.retain(|e| &e.category == cat);
        }
        if let Some(status) = &q.status {
            entries.retain(|e| &e.status == status);
        }
        if q.flagged_only {
            entries.retain(|e| e.flagged);
        }
        if let Some(since) = q.since {
            entries.retain(|e| e.timestamp >= since);
        }
        if let Some(model) = &q.model {
            let needle = model.to_lowercase();
            entries.retain(|e| e.model.to_lowercase().contains(&needle));
        }
        if let Some(itl) = &q.interaction_type {
            entries.retain(|e| &e.interaction_type == itl);
        }
        let total = entries.len();
        let page = entries
            .into_iter()
            .skip(q.offset)
            .take(q.limit)
            .collect();
        QueryResult {
            entries: page,
            total,
            offset: q.offset,
            limit: q.limit,
        }
    }

    pub fn get_entry(&self, id: &str) -> Option<ToolActivityEntry> {
        self.snapshot_deduped().into_iter().find(|e| e.id == id)
    }

    pub fn get_summary(&self) -> ActivitySummary {
        let entries = self.snapshot_deduped();
        let total = entries.len();
        let flagged = entries.iter().filter(|e| e.flagged).count();
        let mut by_tool = HashMap::new();
        let mut by_category = HashMap::new();
        let mut by_status = HashMap::new();
        let mut by_model = HashMap::new();
        let mut by_interaction_type = HashMap::new();
        let mut by_session: HashMap<String, usize> = HashMap::new();
        let mut durations: Vec<f64> = Vec::new();
        let mut risk_scores: Vec<u8> = Vec::new();

        for e in &entries {
            *by_tool.entry(e.tool.clone()).or_insert(0) += 1;
            *by_category.entry(e.category.clone()).or_insert(0) += 1;
            *by_status.entry(e.status.clone()).or_insert(0) += 1;
            *by_session.entry(e.session_id.clone()).or_insert(0) += 1;
            if !e.model.is_empty() {
                *by_model.entry(e.model.clone()).or_insert(0) += 1;
            }
            if !e.interaction_type.is_empty() {
                *by_interaction_type.entry(e.interaction_type.clone()).or_insert(0) += 1;
            }
            if let Some(d) = e.duration_ms {
                durations.push(d);
            }
            if e.risk_score > 0 {
                risk_scores.push(e.risk_score);
            }
        }

        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let avg_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };
        let max_duration_ms = durations.last().copied().unwrap_or(0.0);
        let p95_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations[((durations.len() as f64 * 0.95) as usize).min(durations.len() - 1)]
        };

        let risk_high = risk_scores.iter().filter(|s| **s >= 70).count();
        let risk_medium = risk_scores.iter().filter(|s| (40..70).contains(*s)).count();
        let risk_low = risk_scores.iter().filter(|s| **s > 0 && **s < 40).count();

        ActivitySummary {
            total,
            flagged,
            by_tool,
            by_category,
            by_status,
            by_model,
            by_interaction_type,
            sessions_with_activity: by_session.len(),
            avg_duration_ms,
            max_duration_ms,
            p95_duration_ms,
            risk_high,
            risk_medium,
            risk_low,
        }
    }

    pub fn get_timeline(&self, bucket_minutes: i64, since: Option<f64>, until: Option<f64>) -> Vec<TimelineBucket> {
        let entries = self.snapshot_deduped();
        if entries.is_empty() {
            return Vec::new();
        }
        let since = since.unwrap_or_else(|| entries.iter().map(|e| e.timestamp).fold(f64::MAX, f64::min));
        let until = until.unwrap_or_else(now_unix);
        let bucket_secs = (bucket_minutes * 60).max(1) as i64;

        let mut buckets: HashMap<i64, (usize, usize)> = HashMap::new();
        for e in &entries {
            if e.timestamp < since || e.timestamp > until {
                continue;
            }
            let bucket_ts = (e.timestamp as i64 / bucket_secs) * bucket_secs;
            let slot = buckets.entry(bucket_ts).or_insert((0, 0));
            slot.0 += 1;
            if e.flagged {
                slot.1 += 1;
            }
        }
        let mut out: Vec<TimelineBucket> = buckets
            .into_iter()
            .map(|(timestamp, (total, flagged))| TimelineBucket { timestamp, total, flagged })
            .collect();
        out.sort_by_key(|b| b.timestamp);
        out
    }

    pub fn flag_entry(&self, id: &str, reason: &str) -> Result<bool, ActivityError> {
        let updated = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = inner.entries.iter_mut().find(|e| e.id == id) else {
                return Ok(false);
            };
            entry.flagged = true;
            entry.flag_reason = if reason.is_empty() {
                "Manually flagged".to_string()
            } else {
                reason.to_string()
            };
            entry.risk_score = entry.risk_score.max(50);
            if !entry.risk_factors.iter().any(|f| f == "Manual review") {
                entry.risk_factors.push("Manual review".to_string());
            }
            entry.clone()
        };
        self.append_line(&updated)?;
        Ok(true)
    }

    pub fn unflag_entry(&self, id: &str) -> Result<bool, ActivityError> {
        let updated = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = inner.entries.iter_mut().find(|e| e.id == id) else {
                return Ok(false);
            };
            entry.flagged = false;
            entry.flag_reason.clear();
            entry.clone()
        };
        self.append_line(&updated)?;
        Ok(true)
    }

    /// Streaming CSV export honoring the same filters as [`query`].
    pub fn export_csv(&self, q: &ActivityQuery) -> String {
        let mut wide = q.clone();
        wide.limit = 10_000;
        let result = self.query(&wide);
        let mut out = String::from(
            "id,timestamp,session_id,tool,category,model,status,interaction_type,duration_ms,risk_score,flagged,flag_reason,shield_result,shield_detail,shield_elapsed_ms\n",
        );
        for e in result.entries {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
                csv_escape(&e.id),
                e.timestamp,
                csv_escape(&e.session_id),
                csv_escape(&e.tool),
                csv_escape(&e.category),
                csv_escape(&e.model),
                csv_escape(&e.status),
                csv_escape(&e.interaction_type),
                e.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
                e.risk_score,
                if e.flagged { "Yes" } else { "No" },
                csv_escape(&e.flag_reason),
                csv_escape(&e.shield_result),
                csv_escape(&e.shield_detail),
                e.shield_elapsed_ms.map(|d| d.to_string()).unwrap_or_default(),
            ));
        }
        out
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ToolActivityStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.jsonl");
        let store = ToolActivityStore::new(path).unwrap();
        (dir, store)
    }

    #[test]
    fn record_start_assigns_sequential_ids() {
        let (_dir, store) = store();
        let a = store
            .record_start("s1", "echo", "c1", "hello", None, "gpt-4o", "")
            .unwrap();
        let b = store
            .record_start("s1", "echo", "c2", "world", None, "gpt-4o", "")
            .unwrap();
        assert_eq!(a.id, "ta-1");
        assert_eq!(b.id, "ta-2");
    }

    #[test]
    fn record_complete_supersedes_start_same_id() {
        let (_dir, store) = store();
        let start = store
            .record_start("s1", "bash", "c1", "ls", None, "", "hitl")
            .unwrap();
        let done = store
            .record_complete("c1", "file1\nfile2", "completed")
            .unwrap()
            .unwrap();
        assert_eq!(start.id, done.id);
        assert_eq!(done.status, "completed");
        assert!(done.duration_ms.is_some());
    }

    #[test]
    fn suspicious_argument_flags_entry() {
        let (_dir, store) = store();
        let entry = store
            .record_start("s1", "bash", "c1", "rm -rf /", None, "", "")
            .unwrap();
        assert!(entry.flagged);
        assert!(entry.risk_score >= 90);
    }

    #[test]
    fn risk_score_monotonic_non_decreasing() {
        let (_dir, store) = store();
        let start = store
            .record_start("s1", "bash", "c1", "echo hi", None, "", "")
            .unwrap();
        assert_eq!(start.risk_score, 0);
        let done = store
            .record_complete("c1", "PRIVATE KEY leaked", "completed")
            .unwrap()
            .unwrap();
        assert!(done.risk_score >= start.risk_score);
    }

    #[test]
    fn query_filters_by_flagged_only() {
        let (_dir, store) = store();
        store
            .record_start("s1", "bash", "c1", "echo safe", None, "", "")
            .unwrap();
        store
            .record_start("s1", "bash", "c2", "rm -rf /", None, "", "")
            .unwrap();
        let result = store.query(&ActivityQuery {
            flagged_only: true,
            ..Default::default()
        });
        assert_eq!(result.total, 1);
    }

    #[test]
    fn reload_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.jsonl");
        {
            let store = ToolActivityStore::new(&path).unwrap();
            store
                .record_start("s1", "bash", "c1", "echo hi", None, "", "")
                .unwrap();
            store.record_complete("c1", "hi", "completed").unwrap();
        }
        let reloaded = ToolActivityStore::new(&path).unwrap();
        let result = reloaded.query(&ActivityQuery::default());
        assert_eq!(result.total, 1);
        assert_eq!(result.entries[0].status, "completed");
    }

    #[test]
    fn flag_entry_sets_minimum_risk() {
        let (_dir, store) = store();
        store
            .record_start("s1", "bash", "c1", "echo hi", None, "", "")
            .unwrap();
        let done = store.record_complete("c1", "hi", "completed").unwrap().unwrap();
        assert!(store.flag_entry(&done.id, "looked odd").unwrap());
        let entry = store.get_entry(&done.id).unwrap();
        assert!(entry.flagged);
        assert!(entry.risk_score >= 50);
    }

    #[test]
    fn get_summary_counts_totals() {
        let (_dir, store) = store();
        store
            .record_start("s1", "bash", "c1", "echo hi", None, "gpt-4o", "hitl")
            .unwrap();
        store.record_complete("c1", "hi", "completed").unwrap();
        let summary = store.get_summary();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.by_status.get("completed"), Some(&1));
    }

    #[test]
    fn export_csv_includes_header_and_row() {
        let (_dir, store) = store();
        store
            .record_start("s1", "bash", "c1", "echo hi", None, "", "")
            .unwrap();
        let csv = store.export_csv(&ActivityQuery::default());
        assert!(csv.starts_with("id,timestamp"));
        assert!(csv.contains("ta-1"));
    }

}
