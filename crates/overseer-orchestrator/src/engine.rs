use crate::checkpoint::{
    Checkpoint, CheckpointManager, APPROVAL_OPTIONS, COST_ALERT_KEY, COST_ALERT_OPTIONS,
    HUMAN_ERROR_OPTIONS, RETRY_EXHAUSTED_OPTIONS,
};
use crate::cost::CostTracker;
use crate::directory::AgentDirectory;
use crate::dispatch::AgentHandler;
use crate::retry::compute_backoff;
use crate::router::TaskRouter;
use crate::task_store::{TaskContext, TaskStore};
use crate::types::{
    AgentHealthReport, CheckpointSummary, CostReport, OverseerSnapshot, ResponseOutcome,
    TaskStatus, TaskStatusReport,
};
use chrono::Utc;
use overseer_audit::AuditLog;
use overseer_core::{
    Message, MessageBody, OverseerConfig, OverseerError, OverseerResult, Priority, Protocol,
    ResponseStatus, OVERSEER,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything guarded by the orchestrator lock. Each public operation takes
/// the lock once and applies its read-decide-write step without interleaving.
struct State {
    directory: AgentDirectory,
    router: TaskRouter,
    tasks: TaskStore,
    checkpoints: CheckpointManager,
    costs: CostTracker,
}

struct Shared {
    config: OverseerConfig,
    state: Mutex<State>,
    audit: Arc<AuditLog>,
    dispatch_tx: mpsc::UnboundedSender<Message>,
}

/// The orchestrator: routes tasks, tracks their lifecycle, schedules retries,
/// raises human checkpoints, and accounts API spend.
///
/// Cloning is cheap and every clone drives the same state.
#[derive(Clone)]
pub struct Overseer {
    inner: Arc<Shared>,
}

impl Overseer {
    /// Create an orchestrator with the default roster and routing table.
    ///
    /// Returns the receiving end of the dispatch queue; hand it to
    /// [`crate::run_dispatcher`] or drain it from an external transport.
    pub fn new(
        config: OverseerConfig,
        audit: Arc<AuditLog>,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        Self::with_components(
            config,
            audit,
            AgentDirectory::with_default_roster(),
            TaskRouter::new(),
        )
    }

    /// Create an orchestrator around a caller-built directory and router.
    pub fn with_components(
        config: OverseerConfig,
        audit: Arc<AuditLog>,
        directory: AgentDirectory,
        router: TaskRouter,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let state = State {
            directory,
            router,
            tasks: TaskStore::new(),
            checkpoints: CheckpointManager::new(),
            costs: CostTracker::new(config.cost_alert_threshold),
        };
        let overseer = Self {
            inner: Arc::new(Shared {
                config,
                state: Mutex::new(state),
                audit,
                dispatch_tx,
            }),
        };
        (overseer, dispatch_rx)
    }

    /// The configuration this orchestrator was built with.
    pub fn config(&self) -> &OverseerConfig {
        &self.inner.config
    }

    /// The shared audit trail.
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.inner.audit
    }

    // --- Submission ---

    /// Route and submit a task. Returns the generated task id.
    ///
    /// With `requires_human_approval` the task waits on an approval
    /// checkpoint instead of being dispatched.
    pub fn submit_task(
        &self,
        task_type: &str,
        input_ref: &str,
        priority: Priority,
        deadline: Option<&str>,
        requires_human_approval: bool,
    ) -> OverseerResult<String> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let agent = state.router.route(task_type)?.to_string();
        let request =
            Protocol::create_request(OVERSEER, &agent, task_type, input_ref, priority, deadline, None);
        Protocol::validate(&request, &state.directory)?;

        let task_id = request.task_id().to_string();
        if state.tasks.get(&task_id).is_some() {
            return Err(OverseerError::InvalidMessage(format!(
                "duplicate task id: {task_id}"
            )));
        }
        let mut context = TaskContext::new(request.clone());
        self.inner.audit.append(&request);
        context.history.push(request.clone());

        if requires_human_approval {
            context.status = TaskStatus::AwaitingCheckpoint;
            let reason = format!("Approval required for {task_type} task");
            self.raise_checkpoint(
                &mut state.checkpoints,
                Some(&mut context),
                &task_id,
                &reason,
                &APPROVAL_OPTIONS,
            );
            info!(task_id = %task_id, agent = %agent, "Task submitted, awaiting approval");
        } else {
            info!(task_id = %task_id, agent = %agent, "Task submitted");
            self.enqueue(request);
        }

        state.tasks.insert(context);
        Ok(task_id)
    }

    // --- Worker replies ---

    /// Decode one wire line and apply it with [`Overseer::handle_response`].
    pub fn handle_wire(&self, line: &str) -> OverseerResult<ResponseOutcome> {
        let message = Message::from_wire(line).map_err(|e| {
            warn!(error = %e, "Rejected malformed protocol input");
            e
        })?;
        self.handle_response(message)
    }

    /// Apply an inbound message for a tracked task.
    ///
    /// Messages failing validation are rejected and never reach the task
    /// store. Unknown task ids are dropped. Messages for terminal tasks are
    /// audited but not applied. A task awaiting a checkpoint leaves that
    /// state only through a human decision, so worker replies for it are
    /// recorded without a transition. The same holds for failure and retry
    /// replies while a retry is already scheduled.
    pub fn handle_response(&self, message: Message) -> OverseerResult<ResponseOutcome> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if let Err(e) = Protocol::validate(&message, &state.directory) {
            warn!(task_id = %message.task_id(), error = %e, "Rejected invalid message");
            return Err(e);
        }

        let task_id = message.task_id().to_string();
        let Some(context) = state.tasks.get_mut(&task_id) else {
            warn!(task_id = %task_id, from = %message.agent_from(), "Message for unknown task dropped");
            return Ok(ResponseOutcome::UnknownTask);
        };

        self.inner.audit.append(&message);
        if context.status.is_terminal() {
            info!(
                task_id = %task_id,
                status = %context.status,
                action = %message.action(),
                "Stale message for terminal task ignored"
            );
            return Ok(ResponseOutcome::Stale);
        }
        context.history.push(message.clone());

        if Self::defers(context.status, &message) {
            info!(
                task_id = %task_id,
                status = %context.status,
                action = %message.action(),
                "Reply recorded while task is held"
            );
            Self::record_sender_outcome(&mut state.directory, &message);
            return Ok(ResponseOutcome::Deferred {
                status: context.status,
            });
        }

        let outcome = match message.body() {
            MessageBody::Response { status, .. } => match status {
                Some(ResponseStatus::Success) => {
                    context.status = TaskStatus::Completed;
                    info!(
                        task_id = %task_id,
                        output_ref = ?message.output_ref(),
                        confidence = ?message.confidence(),
                        "Task completed"
                    );
                    ResponseOutcome::Completed {
                        output_ref: message.output_ref().map(str::to_string),
                        confidence: message.confidence(),
                    }
                }
                Some(ResponseStatus::Failed) => {
                    if context.retry_count < self.inner.config.max_retries {
                        self.schedule_retry(context)
                    } else {
                        let reason = format!(
                            "Task failed after {} retries",
                            self.inner.config.max_retries
                        );
                        self.escalate(
                            &mut state.checkpoints,
                            context,
                            &reason,
                            &RETRY_EXHAUSTED_OPTIONS,
                        )
                    }
                }
                Some(ResponseStatus::Retry) => self.schedule_retry(context),
                Some(ResponseStatus::Partial | ResponseStatus::Pending) | None => {
                    debug!(task_id = %task_id, status = ?status, "Interim response recorded");
                    ResponseOutcome::Recorded
                }
            },
            MessageBody::Error {
                retry_possible,
                requires_human,
                ..
            } => {
                warn!(
                    task_id = %task_id,
                    from = %message.agent_from(),
                    code = ?message.error_code(),
                    error = ?message.error_message(),
                    "Worker reported error"
                );
                if *requires_human {
                    let reason = format!(
                        "Error requires human intervention: {}",
                        message.error_message().unwrap_or("unspecified")
                    );
                    self.escalate(&mut state.checkpoints, context, &reason, &HUMAN_ERROR_OPTIONS)
                } else if *retry_possible && context.retry_count < self.inner.config.max_retries {
                    self.schedule_retry(context)
                } else {
                    context.status = TaskStatus::Failed;
                    error!(task_id = %task_id, "Task failed permanently");
                    ResponseOutcome::Failed
                }
            }
            MessageBody::HumanIntervention => {
                let (reason, options) = Protocol::intervention_details(&message);
                context.status = TaskStatus::AwaitingCheckpoint;
                let snapshot = Some(context.snapshot());
                state
                    .checkpoints
                    .open(&task_id, &reason, options.clone(), snapshot);
                ResponseOutcome::CheckpointRaised { options }
            }
            MessageBody::StatusUpdate | MessageBody::Request => {
                debug!(task_id = %task_id, action = %message.action(), "Message recorded");
                ResponseOutcome::Recorded
            }
        };

        Self::record_sender_outcome(&mut state.directory, &message);
        Ok(outcome)
    }

    // --- Checkpoints and follow-ups ---

    /// Record a human decision.
    ///
    /// `approve` re-enqueues the task's request and `reject` cancels it. Other
    /// options are recorded for the caller to act on with
    /// [`Overseer::retry_task`], [`Overseer::redirect_task`], or
    /// [`Overseer::cancel_task`]. A task that turned terminal meanwhile keeps
    /// its state.
    pub fn resolve_checkpoint(&self, task_id: &str, decision: &str) -> OverseerResult<Checkpoint> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let checkpoint = state.checkpoints.resolve(task_id, decision).map_err(|e| {
            warn!(task_id = %task_id, decision = %decision, error = %e, "Checkpoint resolution refused");
            e
        })?;

        let Some(context) = state.tasks.get_mut(task_id) else {
            return Ok(checkpoint);
        };
        if context.status.is_terminal() {
            info!(task_id = %task_id, status = %context.status, "Decision recorded for terminal task");
            return Ok(checkpoint);
        }

        match decision {
            "approve" => {
                context.status = TaskStatus::Pending;
                info!(task_id = %task_id, "Task approved and resumed");
                self.enqueue(context.request.clone());
            }
            "reject" => Self::cancel(context, "Rejected by human"),
            _ => {}
        }
        Ok(checkpoint)
    }

    /// Cancel a non-terminal task. Pending timers and checkpoints for it
    /// become no-ops.
    pub fn cancel_task(&self, task_id: &str, reason: &str) -> OverseerResult<()> {
        let mut state = self.inner.state.lock();
        let context = Self::active_task(&mut state.tasks, task_id)?;
        Self::cancel(context, reason);
        Ok(())
    }

    /// Re-enqueue a non-terminal task's request without consuming retry
    /// budget.
    pub fn retry_task(&self, task_id: &str) -> OverseerResult<()> {
        let mut state = self.inner.state.lock();
        let context = Self::active_task(&mut state.tasks, task_id)?;
        context.status = TaskStatus::Pending;
        info!(task_id = %task_id, "Manual retry");
        self.enqueue(context.request.clone());
        Ok(())
    }

    /// Send a non-terminal task to a different agent. The new Request keeps
    /// the task id and becomes the one future retries re-enqueue.
    pub fn redirect_task(&self, task_id: &str, agent: &str) -> OverseerResult<()> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let context = Self::active_task(&mut state.tasks, task_id)?;

        let original = &context.original_request;
        let input_ref = original
            .param_str(overseer_core::keys::INPUT_REF)
            .unwrap_or_default();
        let deadline = original.param_str(overseer_core::keys::DEADLINE);
        let request = Protocol::create_request(
            OVERSEER,
            agent,
            context.task_type(),
            input_ref,
            original.priority(),
            deadline,
            Some(task_id),
        );
        Protocol::validate(&request, &state.directory)?;

        self.inner.audit.append(&request);
        context.history.push(request.clone());
        context.request = request.clone();
        context.current_agent = agent.to_string();
        context.status = TaskStatus::Pending;
        info!(task_id = %task_id, agent = %agent, "Task redirected");
        self.enqueue(request);
        Ok(())
    }

    // --- Costs ---

    /// Add API spend. Returns true when the call raised a cost-alert
    /// checkpoint; the alert is advisory and leaves in-flight tasks alone.
    pub fn track_api_cost(
        &self,
        api_name: &str,
        cost: f64,
        task_id: Option<&str>,
    ) -> OverseerResult<bool> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let Some(total) = state.costs.record(api_name, cost)? else {
            return Ok(false);
        };

        let key = task_id.unwrap_or(COST_ALERT_KEY);
        let reason = format!("API costs have reached ${total:.2}");
        let context = state.tasks.get_mut(key);
        self.raise_checkpoint(&mut state.checkpoints, context, key, &reason, &COST_ALERT_OPTIONS);
        Ok(true)
    }

    // --- Health ---

    /// Register or replace an agent.
    pub fn register_agent(
        &self,
        name: &str,
        domain: &str,
        handler: Option<Arc<dyn AgentHandler>>,
    ) {
        self.inner.state.lock().directory.register(name, domain, handler);
    }

    /// Record a heartbeat. Returns false for an unknown agent.
    pub fn heartbeat(&self, name: &str) -> bool {
        self.inner.state.lock().directory.heartbeat(name)
    }

    /// Force an agent to unavailable. Returns false for an unknown agent.
    pub fn mark_agent_unavailable(&self, name: &str) -> bool {
        self.inner.state.lock().directory.mark_unavailable(name)
    }

    /// Downgrade agents that missed heartbeats.
    pub fn sweep_health(&self) -> usize {
        let interval = chrono::Duration::from_std(Duration::from_secs(
            self.inner.config.health_check_interval_secs,
        ))
        .unwrap_or_else(|_| chrono::Duration::days(365));
        let changed = self
            .inner
            .state
            .lock()
            .directory
            .sweep_health(Utc::now(), interval);
        changed.len()
    }

    /// Re-enqueue every scheduled retry whose backoff has elapsed. Returns
    /// how many were released.
    ///
    /// Timers armed on a tokio runtime do this on their own; callers driving
    /// the orchestrator without one poll this instead.
    pub fn release_due_retries(&self) -> usize {
        self.release_due_retries_at(Utc::now())
    }

    pub(crate) fn release_due_retries_at(&self, now: chrono::DateTime<Utc>) -> usize {
        let mut state = self.inner.state.lock();
        let due = state.tasks.due_retries(now);
        let mut released = 0;
        for (task_id, attempt) in due {
            if let Some(context) = state.tasks.get_mut(&task_id) {
                if self.release_retry(context, attempt) {
                    released += 1;
                }
            }
        }
        released
    }

    /// Run [`Overseer::sweep_health`] and [`Overseer::release_due_retries`]
    /// every `health_check_interval_secs`.
    pub fn spawn_health_monitor(&self) -> JoinHandle<()> {
        let overseer = self.clone();
        let period = Duration::from_secs(self.inner.config.health_check_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let changed = overseer.sweep_health();
                if changed > 0 {
                    debug!(changed, "Health sweep downgraded agents");
                }
                let released = overseer.release_due_retries();
                if released > 0 {
                    debug!(released, "Overdue retries released");
                }
            }
        })
    }

    // --- Queries ---

    /// Status of one task, or `None` if it is not tracked.
    pub fn get_task_status(&self, task_id: &str) -> Option<TaskStatusReport> {
        self.inner.state.lock().tasks.get(task_id).map(TaskContext::report)
    }

    /// Messages applied to one task, in order.
    pub fn task_history(&self, task_id: &str) -> Option<Vec<Message>> {
        self.inner
            .state
            .lock()
            .tasks
            .get(task_id)
            .map(|t| t.history.clone())
    }

    /// Health of every agent, sorted by name.
    pub fn get_agent_health(&self) -> Vec<AgentHealthReport> {
        self.inner.state.lock().directory.health_report()
    }

    /// Every unresolved checkpoint, oldest first.
    pub fn get_pending_checkpoints(&self) -> Vec<CheckpointSummary> {
        self.inner.state.lock().checkpoints.pending()
    }

    /// Checkpoints resolved so far, in resolution order.
    pub fn resolved_checkpoints(&self) -> Vec<Checkpoint> {
        self.inner.state.lock().checkpoints.resolved().to_vec()
    }

    /// Accumulated API spend.
    pub fn cost_report(&self) -> CostReport {
        self.inner.state.lock().costs.report()
    }

    /// Whole-system view.
    pub fn snapshot(&self) -> OverseerSnapshot {
        let state = self.inner.state.lock();
        OverseerSnapshot {
            taken_at: Utc::now(),
            tasks: state.tasks.counts(),
            pending_checkpoints: state.checkpoints.pending(),
            costs: state.costs.report(),
            agents: state.directory.health_report(),
        }
    }

    /// Serialize the snapshot as JSON (for dashboards).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_else(|e| {
            error!(error = %e, "Failed to serialize snapshot");
            serde_json::Value::Null
        })
    }

    pub(crate) fn is_task_terminal(&self, task_id: &str) -> bool {
        self.inner.state.lock().tasks.is_terminal(task_id)
    }

    pub(crate) fn handler_for(&self, agent: &str) -> Option<Arc<dyn AgentHandler>> {
        self.inner.state.lock().directory.handler(agent)
    }

    // --- Internals ---

    fn active_task<'a>(
        tasks: &'a mut TaskStore,
        task_id: &str,
    ) -> OverseerResult<&'a mut TaskContext> {
        let context = tasks
            .get_mut(task_id)
            .ok_or_else(|| OverseerError::TaskNotFound(task_id.to_string()))?;
        if context.status.is_terminal() {
            return Err(OverseerError::InvalidTransition {
                task_id: task_id.to_string(),
                status: context.status.to_string(),
            });
        }
        Ok(context)
    }

    /// Whether a reply must be recorded without applying a transition.
    fn defers(status: TaskStatus, message: &Message) -> bool {
        match (status, message.body()) {
            (
                TaskStatus::AwaitingCheckpoint,
                MessageBody::Response { .. } | MessageBody::Error { .. },
            )
            | (TaskStatus::RetryScheduled, MessageBody::Error { .. }) => true,
            (TaskStatus::RetryScheduled, MessageBody::Response { status, .. }) => matches!(
                status,
                Some(ResponseStatus::Failed | ResponseStatus::Retry)
            ),
            _ => false,
        }
    }

    fn record_sender_outcome(directory: &mut AgentDirectory, message: &Message) {
        if matches!(
            message.body(),
            MessageBody::Response { .. } | MessageBody::Error { .. }
        ) {
            let success = message.status() == Some(ResponseStatus::Success);
            directory.record_outcome(
                message.agent_from(),
                success,
                message.processing_time_ms().unwrap_or(0),
            );
        }
    }

    fn cancel(context: &mut TaskContext, reason: &str) {
        context.status = TaskStatus::Cancelled;
        info!(task_id = %context.task_id, reason = %reason, "Task cancelled");
    }

    fn enqueue(&self, request: Message) {
        if let Err(e) = self.inner.dispatch_tx.send(request) {
            warn!(task_id = %e.0.task_id(), "Dispatch queue closed; request dropped");
        }
    }

    /// Raise a checkpoint, audit its intervention message, and add the
    /// message to the task's history when the task is tracked.
    fn raise_checkpoint(
        &self,
        checkpoints: &mut CheckpointManager,
        context: Option<&mut TaskContext>,
        key: &str,
        reason: &str,
        options: &[&str],
    ) {
        let snapshot = context.as_ref().map(|c| c.snapshot());
        let intervention = checkpoints.raise(key, reason, options, snapshot);
        self.inner.audit.append(&intervention);
        if let Some(context) = context {
            context.history.push(intervention);
        }
    }

    fn escalate(
        &self,
        checkpoints: &mut CheckpointManager,
        context: &mut TaskContext,
        reason: &str,
        options: &[&str],
    ) -> ResponseOutcome {
        context.status = TaskStatus::AwaitingCheckpoint;
        let key = context.task_id.clone();
        self.raise_checkpoint(checkpoints, Some(context), &key, reason, options);
        ResponseOutcome::CheckpointRaised {
            options: options.iter().map(|o| (*o).to_string()).collect(),
        }
    }

    /// Count the attempt, stamp when it falls due, and arm a backoff timer
    /// that re-enqueues the request. Without a tokio runtime no timer is
    /// armed and [`Overseer::release_due_retries`] re-enqueues it instead.
    fn schedule_retry(&self, context: &mut TaskContext) -> ResponseOutcome {
        context.retry_count += 1;
        let attempt = context.retry_count;
        let delay_ms = compute_backoff(
            self.inner.config.backoff_base_ms,
            self.inner.config.backoff_jitter_ms,
            attempt,
        );
        let delay = Duration::from_millis(delay_ms);
        context.status = TaskStatus::RetryScheduled;
        context.retry_due_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .or(Some(chrono::DateTime::<Utc>::MAX_UTC));
        info!(task_id = %context.task_id, attempt, delay_ms, "Retry scheduled");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let overseer = self.clone();
                let task_id = context.task_id.clone();
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    overseer.fire_retry(&task_id, attempt);
                });
            }
            Err(_) => {
                debug!(task_id = %context.task_id, attempt, "No runtime; retry waits for release_due_retries");
            }
        }
        ResponseOutcome::RetryScheduled { attempt, delay_ms }
    }

    fn fire_retry(&self, task_id: &str, attempt: u32) {
        let mut state = self.inner.state.lock();
        if let Some(context) = state.tasks.get_mut(task_id) {
            self.release_retry(context, attempt);
        }
    }

    /// Re-enqueue a scheduled retry if it is still current.
    fn release_retry(&self, context: &mut TaskContext, attempt: u32) -> bool {
        if context.status != TaskStatus::RetryScheduled || context.retry_count != attempt {
            debug!(task_id = %context.task_id, attempt, status = %context.status, "Retry timer superseded");
            return false;
        }
        context.status = TaskStatus::Pending;
        context.retry_due_at = None;
        debug!(task_id = %context.task_id, attempt, "Retry re-enqueued");
        self.enqueue(context.request.clone());
        true
    }
}
