//! `overseer` command-line front end: runs a demo workload, decodes wire
//! messages, and prints audit trails and the routing table.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use overseer_audit::{read_jsonl, AuditLog};
use overseer_core::{Message, OverseerConfig, Priority, Protocol, ResponseStatus};
use overseer_orchestrator::{
    run_dispatcher, AgentDirectory, AgentHandler, Overseer, TaskRouter, TaskStatus,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "overseer", about = "Overseer: multi-agent task orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "overseer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sample workload against in-process mock workers
    Demo {
        /// Failures the analyst worker reports before succeeding
        #[arg(long, default_value_t = 2)]
        flaky: u32,
        /// Seconds to wait for tasks to settle
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Decode a wire-encoded message and print it as JSON
    Decode {
        /// The pipe-delimited line
        line: String,
    },
    /// Print records from an audit trail
    Audit {
        /// Trail file (defaults to <audit_dir>/audit.jsonl)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Only show records for this task
        #[arg(long)]
        task: Option<String>,
    },
    /// List the routing table
    Routes,
}

/// Mock worker that succeeds after `fail_first` retryable errors.
struct MockWorker {
    output_prefix: &'static str,
    fail_first: AtomicU32,
}

impl MockWorker {
    fn new(output_prefix: &'static str, fail_first: u32) -> Self {
        Self {
            output_prefix,
            fail_first: AtomicU32::new(fail_first),
        }
    }
}

#[async_trait]
impl AgentHandler for MockWorker {
    async fn handle(&self, request: Message) -> Message {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Protocol::create_error(&request, "UPSTREAM_TIMEOUT", "upstream timed out", true, false);
        }
        let input = request.param_str("input_ref").unwrap_or("none");
        Protocol::create_response(
            &request,
            ResponseStatus::Success,
            &format!("{}:{input}", self.output_prefix),
            0.9,
            20,
        )
    }
}

async fn load_config(path: &Path) -> anyhow::Result<OverseerConfig> {
    let config = match tokio::fs::read_to_string(path).await {
        Ok(contents) => OverseerConfig::from_toml_str(&contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "Config file not found, using defaults");
            OverseerConfig::default()
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        }
    };
    config.validate()?;
    Ok(config)
}

async fn run_demo(config: OverseerConfig, flaky: u32, timeout_secs: u64) -> anyhow::Result<()> {
    let audit = Arc::new(AuditLog::new(config.audit_dir.clone()));
    let (overseer, rx) = Overseer::new(config, audit.clone());

    let workers: [(&str, &str, Arc<dyn AgentHandler>); 5] = [
        ("ResumeAgent", "resume_transformation", Arc::new(MockWorker::new("cv", 0))),
        ("ScraperAgent", "job_posting_collection", Arc::new(MockWorker::new("postings", 0))),
        ("FieldIntelAgent", "media_processing", Arc::new(MockWorker::new("media", 0))),
        ("AnalystAgent", "predictions_and_scoring", Arc::new(MockWorker::new("scores", flaky))),
        ("ReportAgent", "assessment_generation", Arc::new(MockWorker::new("report", 0))),
    ];
    for (name, domain, handler) in workers {
        overseer.register_agent(name, domain, Some(handler));
    }

    let dispatcher = tokio::spawn(run_dispatcher(overseer.clone(), rx));
    let monitor = overseer.spawn_health_monitor();

    let mut task_ids = vec![
        overseer.submit_task("scrape_jobs", "board:remote-rust", Priority::Normal, None, false)?,
        overseer.submit_task("analyze", "candidates:batch-7", Priority::High, None, false)?,
        overseer.submit_task("process_photo", "upload:site-visit-3", Priority::Low, None, false)?,
    ];
    let gated = overseer.submit_task("transform", "resume:jdoe", Priority::Normal, None, true)?;
    info!(task_id = %gated, "Approving gated task");
    overseer.resolve_checkpoint(&gated, "approve")?;
    task_ids.push(gated);

    overseer.track_api_cost("openai", 4.25, None)?;
    overseer.track_api_cost("whisper", 1.10, None)?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        let settled = task_ids.iter().all(|id| {
            overseer.get_task_status(id).is_some_and(|s| {
                s.status.is_terminal() || s.status == TaskStatus::AwaitingCheckpoint
            })
        });
        if settled {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!("Demo timed out before every task settled");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    dispatcher.abort();
    monitor.abort();
    audit.flush().await;

    println!("{}", serde_json::to_string_pretty(&overseer.to_json())?);
    if let Some(path) = audit.path() {
        println!("\nAudit trail: {} ({} records)", path.display(), audit.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Demo {
            flaky,
            timeout_secs,
        } => run_demo(config, flaky, timeout_secs).await?,
        Commands::Decode { line } => {
            let message = Message::from_wire(&line)?;
            println!("{}", serde_json::to_string_pretty(&message)?);
            let roster = AgentDirectory::with_default_roster();
            match Protocol::validate(&message, &roster) {
                Ok(()) => println!("\nValid against the default roster."),
                Err(e) => println!("\nNot valid against the default roster: {e}"),
            }
        }
        Commands::Audit { file, task } => {
            let path = file.unwrap_or_else(|| config.audit_dir.join(overseer_audit::AUDIT_FILE_NAME));
            let records = read_jsonl(&path).await?;
            let mut shown = 0;
            for record in &records {
                if task.as_deref().is_some_and(|t| t != record.message.task_id()) {
                    continue;
                }
                println!("{}  {}", record.logged_at.to_rfc3339(), record.wire);
                shown += 1;
            }
            println!("\nTotal: {shown} record(s)");
        }
        Commands::Routes => {
            let router = TaskRouter::new();
            println!("Routing table:");
            for task_type in router.task_types() {
                println!("  {task_type} -> {}", router.route(task_type)?);
            }
        }
    }

    Ok(())
}
