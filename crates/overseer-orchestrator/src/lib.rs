//! Task orchestration engine with routing, retries, and human checkpoints.
//!
//! The [`Overseer`] owns every piece of mutable orchestration state behind a
//! single lock: the agent directory, the task store, pending checkpoints, and
//! API cost accumulators. Requests leave through a dispatch queue; worker
//! replies come back through [`Overseer::handle_response`].
//!
//! # Main types
//!
//! - [`Overseer`]: Core state machine driving each task to a terminal state or checkpoint.
//! - [`AgentDirectory`]: Worker identity, health, and outcome statistics.
//! - [`TaskRouter`]: Static task-type to worker mapping.
//! - [`CheckpointManager`]: Pending human decisions, at most one per task.
//! - [`CostTracker`]: API spend with an escalating alert ladder.
//! - [`AgentHandler`]: In-process worker invoked by [`run_dispatcher`].

/// Pending and resolved human checkpoints.
pub mod checkpoint;
/// API cost accounting.
pub mod cost;
/// Agent directory and health sweeps.
pub mod directory;
/// Dispatch loop and the in-process worker trait.
pub mod dispatch;
/// The orchestrator state machine.
pub mod engine;
/// Exponential backoff.
pub mod retry;
/// Task-type routing table.
pub mod router;
/// Task lifecycle records.
pub mod task_store;
/// Shared orchestration types (statuses, reports, outcomes).
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, Resolution};
pub use cost::CostTracker;
pub use directory::{AgentDirectory, AgentInfo, DEFAULT_ROSTER};
pub use dispatch::{run_dispatcher, AgentHandler};
pub use engine::Overseer;
pub use retry::compute_backoff;
pub use router::{TaskRouter, DEFAULT_ROUTES};
pub use task_store::{TaskContext, TaskSnapshot, TaskStore};
pub use types::{
    AgentHealthReport, AgentStatus, CheckpointSummary, CostReport, OverseerSnapshot,
    ResponseOutcome, TaskCounts, TaskStatus, TaskStatusReport,
};
