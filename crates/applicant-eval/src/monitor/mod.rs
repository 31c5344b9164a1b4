//! Process-scoped ledger of step executions.
//!
//! One [`ExecutionMonitor`] is built at startup and shared as `Arc<ExecutionMonitor>` with
//! every component that runs steps and with any reader (the status router, the CLI). All
//! state sits behind a single lock that is held only for the map or buffer operation itself,
//! never across a capability or enrichment call, so a snapshot never sees a half-closed
//! execution.

mod router;

pub use router::monitor_router;

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_SNAPSHOT_WINDOW: usize = 20;

/// Lifecycle of a tracked step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// One bracketed invocation. `ended_at`/`duration_ms` are filled when the execution closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub model: Option<String>,
    pub input_size: Option<usize>,
    pub output_size: Option<usize>,
}

impl StepExecution {
    fn running(step_name: &str, model: Option<&str>, input_size: Option<usize>) -> Self {
        Self {
            step_name: step_name.to_string(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            error: None,
            model: model.map(str::to_string),
            input_size,
            output_size: None,
        }
    }

    fn close(
        &mut self,
        status: ExecutionStatus,
        error: Option<String>,
        output_size: Option<usize>,
        now: DateTime<Utc>,
    ) {
        // Wall-clock can step backwards; keep start <= end.
        let ended_at = now.max(self.started_at);
        self.status = status;
        self.ended_at = Some(ended_at);
        self.duration_ms = Some((ended_at - self.started_at).num_milliseconds());
        self.error = error;
        self.output_size = output_size;
    }
}

/// Returned by [`ExecutionMonitor::start`]; identifies the key to close with `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionHandle {
    pub step_name: String,
    pub started_at: DateTime<Utc>,
}

/// Read-only view handed to dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub running: BTreeMap<String, StepExecution>,
    pub recent: Vec<StepExecution>,
    pub total_calls: u64,
    pub total_errors: u64,
    pub average_duration_ms: Option<f64>,
}

#[derive(Debug, Default)]
struct MonitorState {
    running: HashMap<String, StepExecution>,
    history: VecDeque<StepExecution>,
    total_calls: u64,
    total_errors: u64,
}

/// Thread-safe ledger of running and recently finished step executions.
#[derive(Debug)]
pub struct ExecutionMonitor {
    state: Mutex<MonitorState>,
    history_limit: usize,
    snapshot_window: usize,
}

impl Default for ExecutionMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ExecutionMonitor {
    /// Build a monitor retaining at most `history_limit` closed executions (minimum 1).
    pub fn new(history_limit: usize) -> Self {
        Self::with_window(history_limit, DEFAULT_SNAPSHOT_WINDOW)
    }

    pub fn with_window(history_limit: usize, snapshot_window: usize) -> Self {
        let history_limit = history_limit.max(1);
        Self {
            state: Mutex::new(MonitorState {
                history: VecDeque::with_capacity(history_limit),
                ..MonitorState::default()
            }),
            history_limit,
            snapshot_window: snapshot_window.max(1),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Record a running execution under `step_name`. A previous running entry with the same
    /// key is replaced, so concurrently tracked steps need distinct keys.
    pub fn start(
        &self,
        step_name: &str,
        model: Option<&str>,
        input_size: Option<usize>,
    ) -> ExecutionHandle {
        let execution = StepExecution::running(step_name, model, input_size);
        let handle = ExecutionHandle {
            step_name: step_name.to_string(),
            started_at: execution.started_at,
        };

        let mut state = self.state.lock();
        state.total_calls += 1;
        if state
            .running
            .insert(step_name.to_string(), execution)
            .is_some()
        {
            debug!(step = step_name, "replaced running execution with same key");
        }
        drop(state);

        debug!(step = step_name, ?model, "execution started");
        handle
    }

    /// Close the execution keyed by `step_name` and append it to history. When no running
    /// entry exists a zero-duration execution is synthesized so the outcome is not lost.
    pub fn end(
        &self,
        step_name: &str,
        status: ExecutionStatus,
        error: Option<String>,
        output_size: Option<usize>,
    ) -> StepExecution {
        let now = Utc::now();
        let mut state = self.state.lock();

        let mut execution = match state.running.remove(step_name) {
            Some(execution) => execution,
            None => {
                let mut synthetic = StepExecution::running(step_name, None, None);
                synthetic.started_at = now;
                synthetic
            }
        };
        execution.close(status, error, output_size, now);

        if status == ExecutionStatus::Failed {
            state.total_errors += 1;
        }

        state.history.push_back(execution.clone());
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }
        drop(state);

        debug!(
            step = step_name,
            status = status.label(),
            duration_ms = execution.duration_ms,
            "execution ended"
        );
        execution
    }

    /// Consistent view of running entries, the most recent history window, and counters.
    pub fn snapshot(&self) -> MonitorSnapshot {
        let state = self.state.lock();

        let running = state
            .running
            .iter()
            .map(|(key, execution)| (key.clone(), execution.clone()))
            .collect();

        let skip = state.history.len().saturating_sub(self.snapshot_window);
        let recent: Vec<StepExecution> = state.history.iter().skip(skip).cloned().collect();

        MonitorSnapshot {
            running,
            average_duration_ms: average_completed_duration(&recent),
            recent,
            total_calls: state.total_calls,
            total_errors: state.total_errors,
        }
    }

    /// History entries for `step_name`, most recent first, at most `limit` of them.
    pub fn history_for(&self, step_name: &str, limit: usize) -> Vec<StepExecution> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .rev()
            .filter(|execution| execution.step_name == step_name)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().running.len()
    }

    /// Drop retained history. Running entries and counters are kept.
    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }
}

fn average_completed_duration(executions: &[StepExecution]) -> Option<f64> {
    let durations: Vec<i64> = executions
        .iter()
        .filter(|execution| execution.status == ExecutionStatus::Completed)
        .filter_map(|execution| execution.duration_ms)
        .collect();

    if durations.is_empty() {
        return None;
    }
    Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
}
