use crate::{OverseerError, OverseerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Field separator of the compact wire encoding.
pub const WIRE_DELIMITER: char = '|';

/// Free-form message parameters. Recognized keys are listed in [`keys`];
/// unrecognized keys are carried through untouched.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Parameter keys with a defined meaning per action kind.
pub mod keys {
    /// Request: the task type the worker should perform. Required.
    pub const TASK_TYPE: &str = "task_type";
    /// Request: opaque reference to the task input.
    pub const INPUT_REF: &str = "input_ref";
    /// Request: optional deadline, passed through verbatim.
    pub const DEADLINE: &str = "deadline";
    /// StatusUpdate: human-readable progress note.
    pub const STATUS_MESSAGE: &str = "status_message";
    /// StatusUpdate: progress fraction in `0.0..=1.0`.
    pub const PROGRESS: &str = "progress";
    /// HumanIntervention: why a decision is needed.
    pub const REASON: &str = "reason";
    /// HumanIntervention: the permissible decisions.
    pub const OPTIONS: &str = "options";
    /// HumanIntervention: always `true`.
    pub const REQUIRES_DECISION: &str = "requires_decision";
    /// Holds an undecodable parameter blob received on the wire.
    pub const RAW: &str = "raw";
}

/// Delivery priority of a [`Message`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Errors and urgent requests.
    High,
    /// Human interventions.
    Critical,
}

impl Priority {
    /// Wire form of the priority.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = OverseerError;

    fn from_str(s: &str) -> OverseerResult<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(OverseerError::Protocol(format!("unknown priority '{other}'"))),
        }
    }
}

/// Outcome reported by a worker in a Response message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The task is done.
    Success,
    /// Some output is ready; more may follow.
    Partial,
    /// The attempt failed; the orchestrator may retry.
    Failed,
    /// Accepted, still working.
    Pending,
    /// Asks the orchestrator to retry.
    Retry,
}

impl ResponseStatus {
    /// Wire form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::Partial => "partial",
            ResponseStatus::Failed => "failed",
            ResponseStatus::Pending => "pending",
            ResponseStatus::Retry => "retry",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseStatus {
    type Err = OverseerError;

    fn from_str(s: &str) -> OverseerResult<Self> {
        match s {
            "success" => Ok(ResponseStatus::Success),
            "partial" => Ok(ResponseStatus::Partial),
            "failed" => Ok(ResponseStatus::Failed),
            "pending" => Ok(ResponseStatus::Pending),
            "retry" => Ok(ResponseStatus::Retry),
            other => Err(OverseerError::Protocol(format!("unknown status '{other}'"))),
        }
    }
}

/// The tag of a [`MessageBody`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// A task request.
    Request,
    /// A worker answer.
    Response,
    /// A worker error.
    Error,
    /// A progress note.
    StatusUpdate,
    /// A call for a human decision.
    HumanIntervention,
}

impl ActionKind {
    /// Wire form of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Request => "request",
            ActionKind::Response => "response",
            ActionKind::Error => "error",
            ActionKind::StatusUpdate => "status_update",
            ActionKind::HumanIntervention => "human_intervention",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = OverseerError;

    fn from_str(s: &str) -> OverseerResult<Self> {
        match s {
            "request" => Ok(ActionKind::Request),
            "response" => Ok(ActionKind::Response),
            "error" => Ok(ActionKind::Error),
            "status_update" => Ok(ActionKind::StatusUpdate),
            "human_intervention" => Ok(ActionKind::HumanIntervention),
            other => Err(OverseerError::Protocol(format!("unknown action '{other}'"))),
        }
    }
}

/// Action-specific part of a [`Message`].
///
/// Response and Error fields are optional here because decoded wire input may
/// omit them; [`crate::Protocol::validate`] rejects messages that lack the
/// required ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MessageBody {
    /// Ask a worker to perform a task.
    Request,
    /// A worker's answer to a request.
    Response {
        /// Outcome reported by the worker.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<ResponseStatus>,
        /// Where the result is stored.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_ref: Option<String>,
        /// Worker confidence in `0.0..=1.0`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        /// Time the worker spent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        processing_time_ms: Option<u64>,
    },
    /// A worker could not complete a request.
    Error {
        /// Machine-readable code.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        /// Human-readable description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        /// Whether another attempt may succeed.
        #[serde(default)]
        retry_possible: bool,
        /// Whether a human must look at it before anything else happens.
        #[serde(default)]
        requires_human: bool,
    },
    /// Progress note; never changes task state.
    StatusUpdate,
    /// A human decision is required before the task can proceed.
    HumanIntervention,
}

impl MessageBody {
    /// The tag of this body.
    pub fn kind(&self) -> ActionKind {
        match self {
            MessageBody::Request => ActionKind::Request,
            MessageBody::Response { .. } => ActionKind::Response,
            MessageBody::Error { .. } => ActionKind::Error,
            MessageBody::StatusUpdate => ActionKind::StatusUpdate,
            MessageBody::HumanIntervention => ActionKind::HumanIntervention,
        }
    }
}

/// One protocol exchange between two agents.
///
/// Messages are immutable: fields are only readable through accessors, and
/// the timestamp is fixed when the value is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    agent_from: String,
    agent_to: String,
    task_id: String,
    #[serde(default)]
    params: Params,
    #[serde(default)]
    priority: Priority,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    body: MessageBody,
}

impl Message {
    /// Builds a message without validating it. Prefer the [`crate::Protocol`]
    /// constructors, which fill in the per-action invariants.
    pub fn new(
        agent_from: impl Into<String>,
        agent_to: impl Into<String>,
        task_id: impl Into<String>,
        params: Params,
        priority: Priority,
        body: MessageBody,
    ) -> Self {
        Self {
            agent_from: agent_from.into(),
            agent_to: agent_to.into(),
            task_id: task_id.into(),
            params,
            priority,
            timestamp: Utc::now(),
            body,
        }
    }

    /// Sending agent.
    pub fn agent_from(&self) -> &str {
        &self.agent_from
    }

    /// Receiving agent.
    pub fn agent_to(&self) -> &str {
        &self.agent_to
    }

    /// Task this message belongs to.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Task parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Delivery priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// When the message was built.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Action-specific fields.
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// The action tag.
    pub fn action(&self) -> ActionKind {
        self.body.kind()
    }

    /// Look up a parameter as a string.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// The `task_type` parameter, if present.
    pub fn task_type(&self) -> Option<&str> {
        self.param_str(keys::TASK_TYPE)
    }

    /// Response status; `None` for other actions or when absent.
    pub fn status(&self) -> Option<ResponseStatus> {
        match &self.body {
            MessageBody::Response { status, .. } => *status,
            _ => None,
        }
    }

    /// Result location of a response.
    pub fn output_ref(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Response { output_ref, .. } => output_ref.as_deref(),
            _ => None,
        }
    }

    /// Confidence of a response.
    pub fn confidence(&self) -> Option<f64> {
        match &self.body {
            MessageBody::Response { confidence, .. } => *confidence,
            _ => None,
        }
    }

    /// Processing time of a response.
    pub fn processing_time_ms(&self) -> Option<u64> {
        match &self.body {
            MessageBody::Response {
                processing_time_ms, ..
            } => *processing_time_ms,
            _ => None,
        }
    }

    /// Code of an error.
    pub fn error_code(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Error { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }

    /// Description of an error.
    pub fn error_message(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Error { error_message, .. } => error_message.as_deref(),
            _ => None,
        }
    }

    /// Encode to the compact pipe-delimited line.
    ///
    /// `sender|recipient|task_id|action|params_json|priority`, followed by
    /// `status|output_ref|confidence|processing_time_ms` for responses and
    /// `error_code|error_message|yes/no|yes/no` for errors. In the free-text
    /// trailing fields `\` and `|` are escaped with a backslash, so they
    /// decode back unchanged.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Decode a line produced by [`Message::to_wire`]. The decoded message
    /// gets a fresh timestamp.
    pub fn from_wire(line: &str) -> OverseerResult<Self> {
        line.parse()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = if self.params.is_empty() {
            "{}".to_string()
        } else {
            serde_json::to_string(&self.params).unwrap_or_else(|_| "{}".to_string())
        };
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.agent_from,
            self.agent_to,
            self.task_id,
            self.action(),
            params,
            self.priority
        )?;

        match &self.body {
            MessageBody::Response {
                status,
                output_ref,
                confidence,
                processing_time_ms,
            } => write!(
                f,
                "|{}|{}|{}|{}",
                status.map(|s| s.as_str()).unwrap_or_default(),
                wire_text(output_ref.as_deref()),
                confidence.unwrap_or(0.0),
                processing_time_ms.unwrap_or(0)
            ),
            MessageBody::Error {
                error_code,
                error_message,
                retry_possible,
                requires_human,
            } => write!(
                f,
                "|{}|{}|{}|{}",
                wire_text(error_code.as_deref()),
                wire_text(error_message.as_deref()),
                yes_no(*retry_possible),
                yes_no(*requires_human)
            ),
            MessageBody::Request | MessageBody::StatusUpdate | MessageBody::HumanIntervention => {
                Ok(())
            }
        }
    }
}

impl FromStr for Message {
    type Err = OverseerError;

    fn from_str(line: &str) -> OverseerResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let parts = split_wire(line);
        if parts.len() < 6 {
            return Err(OverseerError::Protocol(format!(
                "requires at least 6 fields, got {}",
                parts.len()
            )));
        }

        let action: ActionKind = parts[3].parse()?;
        let trailing = match action {
            ActionKind::Response | ActionKind::Error if parts.len() >= 10 => 4,
            _ => 0,
        };
        // The JSON blob may itself contain delimiters, so the fixed fields are
        // taken from both ends and the params are whatever lies between.
        let priority_idx = parts.len() - 1 - trailing;
        let params = decode_params(&parts[4..priority_idx].join("|"));
        let priority: Priority = parts[priority_idx].parse()?;
        let tail = &parts[priority_idx + 1..];

        let body = match action {
            ActionKind::Request => MessageBody::Request,
            ActionKind::StatusUpdate => MessageBody::StatusUpdate,
            ActionKind::HumanIntervention => MessageBody::HumanIntervention,
            ActionKind::Response => match tail {
                [status, output_ref, confidence, processing_time] => MessageBody::Response {
                    status: non_empty(status).map(str::parse).transpose()?,
                    output_ref: non_empty(output_ref).map(unescape_wire),
                    confidence: non_empty(confidence)
                        .map(|s| {
                            s.parse::<f64>().map_err(|e| {
                                OverseerError::Protocol(format!("bad confidence '{s}': {e}"))
                            })
                        })
                        .transpose()?,
                    processing_time_ms: non_empty(processing_time)
                        .map(|s| {
                            s.parse::<u64>().map_err(|e| {
                                OverseerError::Protocol(format!("bad processing time '{s}': {e}"))
                            })
                        })
                        .transpose()?,
                },
                _ => MessageBody::Response {
                    status: None,
                    output_ref: None,
                    confidence: None,
                    processing_time_ms: None,
                },
            },
            ActionKind::Error => match tail {
                [code, message, retry, human] => MessageBody::Error {
                    error_code: non_empty(code).map(unescape_wire),
                    error_message: non_empty(message).map(unescape_wire),
                    retry_possible: retry.eq_ignore_ascii_case("yes"),
                    requires_human: human.eq_ignore_ascii_case("yes"),
                },
                _ => MessageBody::Error {
                    error_code: None,
                    error_message: None,
                    retry_possible: false,
                    requires_human: false,
                },
            },
        };

        Ok(Message::new(parts[0], parts[1], parts[2], params, priority, body))
    }
}

/// Parameters that fail to decode as a JSON object are kept as a raw string
/// under [`keys::RAW`] instead of rejecting the whole message.
fn decode_params(blob: &str) -> Params {
    if blob.is_empty() || blob == "{}" {
        return Params::new();
    }
    serde_json::from_str::<Params>(blob).unwrap_or_else(|_| {
        let mut params = Params::new();
        params.insert(keys::RAW.to_string(), serde_json::Value::String(blob.to_string()));
        params
    })
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Split on delimiters that are not backslash-escaped. Slices keep their
/// escapes, so rejoining a run of them with the delimiter restores the input.
fn split_wire(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == WIRE_DELIMITER {
            parts.push(&line[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&line[start..]);
    parts
}

fn wire_text(s: Option<&str>) -> String {
    let s = s.unwrap_or_default();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || c == WIRE_DELIMITER {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape_wire(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next().unwrap_or('\\'));
        } else {
            out.push(c);
        }
    }
    out
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
