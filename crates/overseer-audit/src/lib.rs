//! Audit trail for the Overseer orchestrator.
//!
//! Every protocol message the orchestrator produces or consumes is appended
//! here exactly once, in the order the orchestrator accepted it. The trail is
//! mirrored to `audit.jsonl` so external reporting tools can tail it.
//!
//! # Main types
//!
//! - [`AuditLog`]: Append-only sink with an in-memory mirror and query helpers.
//! - [`AuditRecord`]: One appended line: timestamp, wire form, structured fields.

/// Audit log and record types.
pub mod audit;

pub use audit::{read_jsonl, AuditLog, AuditRecord, AUDIT_FILE_NAME};
