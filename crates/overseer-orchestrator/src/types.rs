use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Dispatched, or queued for dispatch, and waiting on a worker.
    Pending,
    /// Waiting for its backoff timer before re-entering the dispatch queue.
    RetryScheduled,
    /// Blocked on a human decision.
    AwaitingCheckpoint,
    /// A worker reported success.
    Completed,
    /// Gave up without a human path.
    Failed,
    /// Cancelled by a caller or a rejected checkpoint.
    Cancelled,
}

impl TaskStatus {
    /// Wire-friendly name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::RetryScheduled => "retry_scheduled",
            TaskStatus::AwaitingCheckpoint => "awaiting_checkpoint",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a worker agent as seen by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Heartbeating on schedule.
    Healthy,
    /// Missed at least one health interval.
    Degraded,
    /// Missed three intervals, or marked down by a caller.
    Unavailable,
    /// Never heartbeated.
    Unknown,
}

impl AgentStatus {
    pub(crate) fn severity(&self) -> u8 {
        match self {
            AgentStatus::Healthy | AgentStatus::Unknown => 0,
            AgentStatus::Degraded => 1,
            AgentStatus::Unavailable => 2,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Healthy => write!(f, "healthy"),
            AgentStatus::Degraded => write!(f, "degraded"),
            AgentStatus::Unavailable => write!(f, "unavailable"),
            AgentStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Answer to `get_task_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusReport {
    /// Task id.
    pub task_id: String,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Automatic retries consumed.
    pub retry_count: u32,
    /// Assigned agent.
    pub current_agent: String,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Messages applied so far.
    pub history_len: usize,
}

/// Per-agent entry of `get_agent_health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealthReport {
    /// Agent name.
    pub name: String,
    /// Agent domain.
    pub domain: String,
    /// Current health.
    pub status: AgentStatus,
    /// Last heartbeat, if any.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Successful responses.
    pub tasks_completed: u64,
    /// Failed responses and errors.
    pub tasks_failed: u64,
    /// Rolling mean processing time.
    pub average_response_ms: f64,
}

/// Unresolved checkpoint as listed by `get_pending_checkpoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// Task id, or the cost-alert key.
    pub task_id: String,
    /// Why a human is needed.
    pub reason: String,
    /// Accepted decisions.
    pub options: Vec<String>,
    /// When it was raised.
    pub created_at: DateTime<Utc>,
}

/// Accumulated API spend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    /// Spend across every API.
    pub total: f64,
    /// Spend per API name.
    pub per_api: BTreeMap<String, f64>,
}

/// Task counts by lifecycle bucket.
///
/// `active` counts every non-terminal task; `queued` counts the subset in
/// [`TaskStatus::Pending`], i.e. handed to the dispatch queue and not yet
/// answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    /// Every tracked task.
    pub total: usize,
    /// Non-terminal tasks.
    pub active: usize,
    /// Tasks in pending.
    pub queued: usize,
    /// Tasks blocked on a human.
    pub awaiting_checkpoint: usize,
    /// Completed tasks.
    pub completed: usize,
    /// Failed tasks.
    pub failed: usize,
    /// Cancelled tasks.
    pub cancelled: usize,
}

/// Point-in-time view of the whole orchestrator, for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverseerSnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Task counts.
    pub tasks: TaskCounts,
    /// Unresolved checkpoints.
    pub pending_checkpoints: Vec<CheckpointSummary>,
    /// API spend.
    pub costs: CostReport,
    /// Agent health.
    pub agents: Vec<AgentHealthReport>,
}

/// What `handle_response` did with an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// The task finished successfully.
    Completed {
        /// Where the result is stored.
        output_ref: Option<String>,
        /// Worker confidence.
        confidence: Option<f64>,
    },
    /// A retry was scheduled.
    RetryScheduled {
        /// The new retry count.
        attempt: u32,
        /// Backoff before the request re-enters the dispatch queue.
        delay_ms: u64,
    },
    /// The task is now blocked on a human decision.
    CheckpointRaised {
        /// Decisions the checkpoint accepts.
        options: Vec<String>,
    },
    /// The task failed permanently.
    Failed,
    /// Appended to history without a transition.
    Recorded,
    /// A worker reply arrived while the task was waiting on a checkpoint or
    /// a scheduled retry. Recorded and counted, but not applied.
    Deferred {
        /// The status the task kept.
        status: TaskStatus,
    },
    /// The task was already terminal; audited but not applied.
    Stale,
    /// No task with this id is tracked; dropped.
    UnknownTask,
}
