use crate::message::{keys, Message, MessageBody, Params, Priority, ResponseStatus};
use crate::{OverseerError, OverseerResult};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

/// Identity of the orchestrator. Human-intervention messages are always
/// addressed to it.
pub const OVERSEER: &str = "Overseer";

/// Lookup of the agents a message may name as sender or recipient.
pub trait AgentRoster {
    /// Whether `name` is a known agent.
    fn contains_agent(&self, name: &str) -> bool;
}

impl AgentRoster for HashSet<String> {
    fn contains_agent(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl AgentRoster for [&str] {
    fn contains_agent(&self, name: &str) -> bool {
        self.iter().any(|known| *known == name)
    }
}

impl<const N: usize> AgentRoster for [&str; N] {
    fn contains_agent(&self, name: &str) -> bool {
        self.as_slice().contains_agent(name)
    }
}

/// Factory and validator for protocol messages.
pub struct Protocol;

impl Protocol {
    /// Generate a task id of the form `<prefix>_<8 hex chars>`.
    pub fn generate_task_id(prefix: &str) -> String {
        let short = Uuid::new_v4().simple().to_string();
        format!("{prefix}_{}", &short[..8])
    }

    /// Create a task request. A task id is generated from `task_type` when
    /// none is supplied.
    pub fn create_request(
        from: &str,
        to: &str,
        task_type: &str,
        input_ref: &str,
        priority: Priority,
        deadline: Option<&str>,
        task_id: Option<&str>,
    ) -> Message {
        let mut params = Params::new();
        params.insert(keys::TASK_TYPE.into(), json!(task_type));
        params.insert(keys::INPUT_REF.into(), json!(input_ref));
        if let Some(deadline) = deadline {
            params.insert(keys::DEADLINE.into(), json!(deadline));
        }

        let task_id = task_id
            .map(str::to_string)
            .unwrap_or_else(|| Self::generate_task_id(task_type));

        Message::new(from, to, task_id, params, priority, MessageBody::Request)
    }

    /// Create a response to `original`, with sender and recipient swapped.
    pub fn create_response(
        original: &Message,
        status: ResponseStatus,
        output_ref: &str,
        confidence: f64,
        processing_time_ms: u64,
    ) -> Message {
        Message::new(
            original.agent_to(),
            original.agent_from(),
            original.task_id(),
            original.params().clone(),
            original.priority(),
            MessageBody::Response {
                status: Some(status),
                output_ref: Some(output_ref.to_string()),
                confidence: Some(confidence),
                processing_time_ms: Some(processing_time_ms),
            },
        )
    }

    /// Create an error reply to `original`. Errors always travel at
    /// [`Priority::High`].
    pub fn create_error(
        original: &Message,
        error_code: &str,
        error_message: &str,
        retry_possible: bool,
        requires_human: bool,
    ) -> Message {
        Message::new(
            original.agent_to(),
            original.agent_from(),
            original.task_id(),
            original.params().clone(),
            Priority::High,
            MessageBody::Error {
                error_code: Some(error_code.to_string()),
                error_message: Some(error_message.to_string()),
                retry_possible,
                requires_human,
            },
        )
    }

    /// Create a progress note. Status updates always travel at [`Priority::Low`].
    pub fn create_status_update(
        from: &str,
        to: &str,
        task_id: &str,
        status_message: &str,
        progress: f64,
    ) -> Message {
        let mut params = Params::new();
        params.insert(keys::STATUS_MESSAGE.into(), json!(status_message));
        params.insert(keys::PROGRESS.into(), json!(progress));
        Message::new(from, to, task_id, params, Priority::Low, MessageBody::StatusUpdate)
    }

    /// Create a request for a human decision, addressed to [`OVERSEER`] at
    /// [`Priority::Critical`].
    pub fn create_human_intervention(
        from: &str,
        task_id: &str,
        reason: &str,
        options: &[String],
    ) -> Message {
        let mut params = Params::new();
        params.insert(keys::REASON.into(), json!(reason));
        params.insert(keys::OPTIONS.into(), json!(options));
        params.insert(keys::REQUIRES_DECISION.into(), json!(true));
        Message::new(
            from,
            OVERSEER,
            task_id,
            params,
            Priority::Critical,
            MessageBody::HumanIntervention,
        )
    }

    /// Check the structural invariants of `message` against `roster`.
    pub fn validate<R: AgentRoster + ?Sized>(message: &Message, roster: &R) -> OverseerResult<()> {
        if !roster.contains_agent(message.agent_from()) {
            return Err(OverseerError::InvalidMessage(format!(
                "unknown source agent: {}",
                message.agent_from()
            )));
        }
        if !roster.contains_agent(message.agent_to()) {
            return Err(OverseerError::InvalidMessage(format!(
                "unknown destination agent: {}",
                message.agent_to()
            )));
        }
        if message.task_id().is_empty() {
            return Err(OverseerError::InvalidMessage("missing task_id".into()));
        }

        match message.body() {
            MessageBody::Request if !message.params().contains_key(keys::TASK_TYPE) => Err(
                OverseerError::InvalidMessage("request missing task_type in params".into()),
            ),
            MessageBody::Response { status: None, .. } => {
                Err(OverseerError::InvalidMessage("response missing status".into()))
            }
            MessageBody::Error { error_code, .. }
                if error_code.as_deref().map_or(true, str::is_empty) =>
            {
                Err(OverseerError::InvalidMessage("error missing error_code".into()))
            }
            _ => Ok(()),
        }
    }

    /// Read the reason and options carried by a human-intervention message.
    pub fn intervention_details(message: &Message) -> (String, Vec<String>) {
        let reason = message
            .param_str(keys::REASON)
            .unwrap_or("human decision requested")
            .to_string();
        let options = message
            .params()
            .get(keys::OPTIONS)
            .and_then(|v| v.as_array())
            .map(|opts| {
                opts.iter()
                    .filter_map(|o| o.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        (reason, options)
    }
}
