use crate::task_store::TaskSnapshot;
use crate::types::CheckpointSummary;
use chrono::{DateTime, Utc};
use overseer_core::{Message, OverseerError, OverseerResult, Protocol, OVERSEER};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Options offered when a task asks for approval before dispatch.
pub const APPROVAL_OPTIONS: [&str; 3] = ["approve", "reject", "modify"];
/// Options offered when a task exhausts its retry budget.
pub const RETRY_EXHAUSTED_OPTIONS: [&str; 3] = ["retry", "redirect", "cancel"];
/// Options offered when a worker error demands a human.
pub const HUMAN_ERROR_OPTIONS: [&str; 4] = ["retry", "redirect", "cancel", "ignore"];
/// Options offered when API spend crosses the alert threshold.
pub const COST_ALERT_OPTIONS: [&str; 3] = ["continue", "pause", "switch_to_local"];
/// Checkpoint key for cost alerts not tied to a task.
pub const COST_ALERT_KEY: &str = "cost_alert";

/// Decision recorded on a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The chosen option.
    pub decision: String,
    /// When it was recorded.
    pub resolved_at: DateTime<Utc>,
}

/// A pending or resolved human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Task id, or the cost-alert key.
    pub task_id: String,
    /// Why a human is needed.
    pub reason: String,
    /// Accepted decisions.
    pub options: Vec<String>,
    /// Task state when raised; `None` for system-wide alerts.
    pub context: Option<TaskSnapshot>,
    /// When it was raised.
    pub created_at: DateTime<Utc>,
    /// Set once resolved.
    pub resolution: Option<Resolution>,
}

impl Checkpoint {
    /// Whether a decision has been recorded.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// The recorded decision, if any.
    pub fn decision(&self) -> Option<&str> {
        self.resolution.as_ref().map(|r| r.decision.as_str())
    }

    fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            task_id: self.task_id.clone(),
            reason: self.reason.clone(),
            options: self.options.clone(),
            created_at: self.created_at,
        }
    }
}

/// Pending checkpoints, at most one per task id, plus the resolved history.
#[derive(Debug, Default)]
pub struct CheckpointManager {
    pending: HashMap<String, Checkpoint>,
    resolved: Vec<Checkpoint>,
}

impl CheckpointManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a checkpoint without emitting a message. Supersedes any pending
    /// checkpoint for the same task id.
    pub fn open(
        &mut self,
        task_id: &str,
        reason: &str,
        options: Vec<String>,
        context: Option<TaskSnapshot>,
    ) -> &Checkpoint {
        let checkpoint = Checkpoint {
            task_id: task_id.to_string(),
            reason: reason.to_string(),
            options,
            context,
            created_at: Utc::now(),
            resolution: None,
        };
        if self.pending.contains_key(task_id) {
            debug!(task_id = %task_id, "Superseding pending checkpoint");
        }
        info!(task_id = %task_id, reason = %reason, options = ?checkpoint.options, "Checkpoint raised");
        self.pending.insert(task_id.to_string(), checkpoint);
        &self.pending[task_id]
    }

    /// Store a checkpoint and build the HumanIntervention message announcing
    /// it. The caller records the message in the audit trail.
    pub fn raise(
        &mut self,
        task_id: &str,
        reason: &str,
        options: &[&str],
        context: Option<TaskSnapshot>,
    ) -> Message {
        let options: Vec<String> = options.iter().map(|o| (*o).to_string()).collect();
        let intervention = Protocol::create_human_intervention(OVERSEER, task_id, reason, &options);
        self.open(task_id, reason, options, context);
        intervention
    }

    /// Record `decision` on the pending checkpoint for `task_id` and move it
    /// to the resolved history.
    pub fn resolve(&mut self, task_id: &str, decision: &str) -> OverseerResult<Checkpoint> {
        let Some(checkpoint) = self.pending.get(task_id) else {
            return Err(OverseerError::CheckpointNotFound(task_id.to_string()));
        };
        if !checkpoint.options.iter().any(|o| o == decision) {
            return Err(OverseerError::InvalidDecision {
                decision: decision.to_string(),
                options: checkpoint.options.clone(),
            });
        }

        let Some(mut checkpoint) = self.pending.remove(task_id) else {
            return Err(OverseerError::CheckpointNotFound(task_id.to_string()));
        };
        checkpoint.resolution = Some(Resolution {
            decision: decision.to_string(),
            resolved_at: Utc::now(),
        });
        info!(task_id = %task_id, decision = %decision, "Checkpoint resolved");
        self.resolved.push(checkpoint.clone());
        Ok(checkpoint)
    }

    /// Whether `task_id` has an unresolved checkpoint.
    pub fn is_pending(&self, task_id: &str) -> bool {
        self.pending.contains_key(task_id)
    }

    /// The unresolved checkpoint for `task_id`.
    pub fn get(&self, task_id: &str) -> Option<&Checkpoint> {
        self.pending.get(task_id)
    }

    /// Every unresolved checkpoint, oldest first.
    pub fn pending(&self) -> Vec<CheckpointSummary> {
        let mut pending: Vec<&Checkpoint> = self.pending.values().collect();
        pending.sort_by_key(|c| c.created_at);
        pending.into_iter().map(Checkpoint::summary).collect()
    }

    /// Number of unresolved checkpoints.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Resolved checkpoints in resolution order.
    pub fn resolved(&self) -> &[Checkpoint] {
        &self.resolved
    }
}
