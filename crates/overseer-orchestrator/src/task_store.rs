use crate::types::{TaskCounts, TaskStatus, TaskStatusReport};
use chrono::{DateTime, Utc};
use overseer_core::{keys, Message};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mutable lifecycle record for one submitted task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Task id.
    pub task_id: String,
    /// The Request built at submission. Never replaced.
    pub original_request: Message,
    /// The Request that retries and approvals re-enqueue. Differs from
    /// `original_request` after a redirect.
    pub request: Message,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Automatic retries consumed.
    pub retry_count: u32,
    /// Agent the current request targets.
    pub current_agent: String,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// When the scheduled retry may be re-enqueued. Set while the task is
    /// [`TaskStatus::RetryScheduled`].
    pub retry_due_at: Option<DateTime<Utc>>,
    /// Every message applied to this task, in arrival order.
    pub history: Vec<Message>,
}

impl TaskContext {
    /// Track a freshly built request in [`TaskStatus::Pending`].
    pub fn new(request: Message) -> Self {
        Self {
            task_id: request.task_id().to_string(),
            current_agent: request.agent_to().to_string(),
            original_request: request.clone(),
            request,
            created_at: Utc::now(),
            retry_count: 0,
            status: TaskStatus::Pending,
            retry_due_at: None,
            history: Vec::new(),
        }
    }

    /// The task type of the original request.
    pub fn task_type(&self) -> &str {
        self.original_request.task_type().unwrap_or_default()
    }

    /// Status query answer.
    pub fn report(&self) -> TaskStatusReport {
        TaskStatusReport {
            task_id: self.task_id.clone(),
            status: self.status,
            retry_count: self.retry_count,
            current_agent: self.current_agent.clone(),
            created_at: self.created_at,
            history_len: self.history.len(),
        }
    }

    /// Frozen copy attached to checkpoints.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            task_type: self.task_type().to_string(),
            input_ref: self
                .original_request
                .param_str(keys::INPUT_REF)
                .map(str::to_string),
            status: self.status,
            retry_count: self.retry_count,
            current_agent: self.current_agent.clone(),
            history_len: self.history.len(),
            taken_at: Utc::now(),
        }
    }
}

/// Task state captured when a checkpoint is raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task id.
    pub task_id: String,
    /// Task type of the original request.
    pub task_type: String,
    /// Input reference of the original request.
    pub input_ref: Option<String>,
    /// Status when captured.
    pub status: TaskStatus,
    /// Retries consumed when captured.
    pub retry_count: u32,
    /// Assigned agent when captured.
    pub current_agent: String,
    /// Messages in history when captured.
    pub history_len: usize,
    /// Capture time.
    pub taken_at: DateTime<Utc>,
}

/// All tracked tasks, keyed by task id.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<String, TaskContext>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a task. Returns false and keeps the existing entry when the id
    /// is already taken.
    pub fn insert(&mut self, context: TaskContext) -> bool {
        if self.tasks.contains_key(&context.task_id) {
            return false;
        }
        self.tasks.insert(context.task_id.clone(), context);
        true
    }

    /// Get a task by id.
    pub fn get(&self, task_id: &str) -> Option<&TaskContext> {
        self.tasks.get(task_id)
    }

    /// Get a mutable reference to a task.
    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut TaskContext> {
        self.tasks.get_mut(task_id)
    }

    /// Whether `task_id` is tracked and terminal.
    pub fn is_terminal(&self, task_id: &str) -> bool {
        self.tasks
            .get(task_id)
            .is_some_and(|t| t.status.is_terminal())
    }

    /// List all tasks, oldest first.
    pub fn all_tasks(&self) -> Vec<&TaskContext> {
        let mut tasks: Vec<&TaskContext> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Ids and attempt numbers of scheduled retries whose delay has
    /// elapsed at `now`, oldest due first.
    pub fn due_retries(&self, now: DateTime<Utc>) -> Vec<(String, u32)> {
        let mut due: Vec<(DateTime<Utc>, String, u32)> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::RetryScheduled)
            .filter_map(|t| {
                t.retry_due_at
                    .filter(|at| *at <= now)
                    .map(|at| (at, t.task_id.clone(), t.retry_count))
            })
            .collect();
        due.sort_by_key(|(at, _, _)| *at);
        due.into_iter().map(|(_, id, attempt)| (id, attempt)).collect()
    }

    /// Total number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task has been submitted.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Count tasks per lifecycle bucket.
    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts {
            total: self.tasks.len(),
            ..TaskCounts::default()
        };
        for task in self.tasks.values() {
            if !task.status.is_terminal() {
                counts.active += 1;
            }
            match task.status {
                TaskStatus::Pending => counts.queued += 1,
                TaskStatus::AwaitingCheckpoint => counts.awaiting_checkpoint += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
                TaskStatus::RetryScheduled => {}
            }
        }
        counts
    }
}
