//! Core types and error definitions for the Overseer orchestrator.
//!
//! This crate holds everything the participants of the protocol agree on:
//! the immutable [`Message`] value, the [`Protocol`] factory and validator,
//! the pipe-delimited wire encoding, and the configuration constants
//! consumed by the orchestrator.
//!
//! # Main types
//!
//! - [`OverseerError`]: Unified error enum for all Overseer subsystems.
//! - [`OverseerResult`]: Convenience alias for `Result<T, OverseerError>`.
//! - [`Message`]: One protocol exchange between two agents.
//! - [`MessageBody`]: Action-specific payload (request, response, error, ...).
//! - [`Protocol`]: Constructs and validates well-formed messages.
//! - [`OverseerConfig`]: Retry, backoff, health, and cost-alert settings.

/// Orchestrator configuration values.
pub mod config;
/// The protocol message model and its wire encoding.
pub mod message;
/// Message factory and structural validation.
pub mod protocol;

pub use config::OverseerConfig;
pub use message::{
    keys, ActionKind, Message, MessageBody, Params, Priority, ResponseStatus, WIRE_DELIMITER,
};
pub use protocol::{AgentRoster, Protocol, OVERSEER};

// --- Error types ---

/// Top-level error type for the Overseer orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OverseerError {
    /// Encoded input could not be parsed into a message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A message failed structural validation.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// No worker is mapped to the requested task type.
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    /// No task context exists for the given id.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// No unresolved checkpoint exists for the given task id.
    #[error("No pending checkpoint for task: {0}")]
    CheckpointNotFound(String),

    /// A checkpoint decision outside the checkpoint's option list.
    #[error("Invalid decision '{decision}', expected one of {options:?}")]
    InvalidDecision {
        /// The rejected decision.
        decision: String,
        /// The options the checkpoint accepts.
        options: Vec<String>,
    },

    /// The requested transition is not allowed from the task's current status.
    #[error("Task {task_id} cannot transition from status '{status}'")]
    InvalidTransition {
        /// The task that refused the transition.
        task_id: String,
        /// Its current status.
        status: String,
    },

    /// A cost value that is negative or not finite.
    #[error("Invalid cost: {0}")]
    InvalidCost(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`OverseerError`].
pub type OverseerResult<T> = Result<T, OverseerError>;
