use chrono::{DateTime, Utc};
use overseer_core::{ActionKind, Message, OverseerError, OverseerResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// File name of the JSONL trail inside the audit directory.
pub const AUDIT_FILE_NAME: &str = "audit.jsonl";

/// One line of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the orchestrator accepted the message.
    pub logged_at: DateTime<Utc>,
    /// The message in its wire encoding.
    pub wire: String,
    /// The structured message fields.
    #[serde(flatten)]
    pub message: Message,
}

enum WriterCommand {
    Append(String),
    Flush(oneshot::Sender<()>),
}

/// Append-only audit log of protocol messages.
///
/// Records are kept in memory for queries and, when built with
/// [`AuditLog::new`], written to `<dir>/audit.jsonl` by a background task in
/// the same order they were appended.
pub struct AuditLog {
    records: RwLock<Vec<AuditRecord>>,
    tx: Option<mpsc::UnboundedSender<WriterCommand>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Create a file-backed log with its writer task on the current tokio
    /// runtime. Outside a runtime the log falls back to [`AuditLog::in_memory`].
    pub fn new(log_dir: PathBuf) -> Self {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(dir = %log_dir.display(), "No tokio runtime; audit trail kept in memory only");
            return Self::in_memory();
        };
        let path = log_dir.join(AUDIT_FILE_NAME);
        let (tx, rx) = mpsc::unbounded_channel::<WriterCommand>();
        handle.spawn(write_loop(log_dir, path.clone(), rx));

        Self {
            records: RwLock::new(Vec::new()),
            tx: Some(tx),
            path: Some(path),
        }
    }

    /// Create a log that only keeps records in memory.
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            tx: None,
            path: None,
        }
    }

    /// Path of the JSONL file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append `message` to the trail and return the stored record.
    pub fn append(&self, message: &Message) -> AuditRecord {
        let record = AuditRecord {
            logged_at: Utc::now(),
            wire: message.to_wire(),
            message: message.clone(),
        };

        info!(
            task_id = %message.task_id(),
            action = %message.action(),
            from = %message.agent_from(),
            to = %message.agent_to(),
            "audit"
        );

        // The write lock orders the in-memory push and the file send together.
        let mut records = self.records.write();
        if let Some(tx) = &self.tx {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    let _ = tx.send(WriterCommand::Append(line));
                }
                Err(e) => error!(error = %e, "Failed to serialize audit record"),
            }
        }
        records.push(record.clone());
        record
    }

    /// Wait until every record appended so far has been written to disk.
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(WriterCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Number of records appended.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// All records in append order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }

    /// All messages for one task, in append order.
    pub fn task_history(&self, task_id: &str) -> Vec<Message> {
        self.filter(|m| m.task_id() == task_id)
    }

    /// All messages sent or received by `agent`.
    pub fn agent_messages(&self, agent: &str) -> Vec<Message> {
        self.filter(|m| m.agent_from() == agent || m.agent_to() == agent)
    }

    /// All Error messages.
    pub fn errors(&self) -> Vec<Message> {
        self.filter(|m| m.action() == ActionKind::Error)
    }

    /// All HumanIntervention messages.
    pub fn human_interventions(&self) -> Vec<Message> {
        self.filter(|m| m.action() == ActionKind::HumanIntervention)
    }

    /// Write the whole trail as a pretty-printed JSON array.
    pub async fn export(&self, output: &Path) -> OverseerResult<()> {
        let json = serde_json::to_string_pretty(&self.records())?;
        tokio::fs::write(output, json).await?;
        Ok(())
    }

    fn filter(&self, pred: impl Fn(&Message) -> bool) -> Vec<Message> {
        self.records
            .read()
            .iter()
            .map(|r| &r.message)
            .filter(|m| pred(*m))
            .cloned()
            .collect()
    }
}

async fn write_loop(
    log_dir: PathBuf,
    path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
) {
    if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
        error!(dir = %log_dir.display(), error = %e, "Failed to create audit directory");
    }
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(f) => Some(f),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to open audit log");
            None
        }
    };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCommand::Append(line) => {
                if let Some(f) = file.as_mut() {
                    let line = format!("{line}\n");
                    if let Err(e) = f.write_all(line.as_bytes()).await {
                        error!(error = %e, "Failed to write audit record");
                    }
                }
            }
            WriterCommand::Flush(done) => {
                if let Some(f) = file.as_mut() {
                    let _ = f.flush().await;
                }
                let _ = done.send(());
            }
        }
    }
}

/// Read an audit trail written by [`AuditLog`].
///
/// The writer may be appending concurrently, so an unterminated final line
/// is treated as in flight and skipped rather than reported as corrupt.
pub async fn read_jsonl(path: &Path) -> OverseerResult<Vec<AuditRecord>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let complete = contents.ends_with('\n');
    let lines: Vec<&str> = contents.lines().collect();
    let mut records = Vec::with_capacity(lines.len());

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(line) {
            Ok(record) => records.push(record),
            Err(_) if !complete && idx + 1 == lines.len() => break,
            Err(e) => {
                return Err(OverseerError::Protocol(format!(
                    "corrupt audit line {}: {e}",
                    idx + 1
                )))
            }
        }
    }
    Ok(records)
}
