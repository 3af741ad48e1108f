use crate::dispatch::AgentHandler;
use crate::types::{AgentHealthReport, AgentStatus};
use chrono::{DateTime, Duration, Utc};
use overseer_core::{AgentRoster, OVERSEER};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Built-in agents and their domains.
pub const DEFAULT_ROSTER: [(&str, &str); 6] = [
    (OVERSEER, "orchestration"),
    ("ResumeAgent", "resume_transformation"),
    ("ScraperAgent", "job_posting_collection"),
    ("FieldIntelAgent", "media_processing"),
    ("AnalystAgent", "predictions_and_scoring"),
    ("ReportAgent", "assessment_generation"),
];

/// Directory entry for one worker.
#[derive(Clone)]
pub struct AgentInfo {
    /// Unique agent name.
    pub name: String,
    /// What the agent specialises in.
    pub domain: String,
    /// In-process handler, when the worker runs inside this process.
    pub handler: Option<Arc<dyn AgentHandler>>,
    /// Current health.
    pub status: AgentStatus,
    /// Last heartbeat, if any.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Successful responses.
    pub tasks_completed: u64,
    /// Failed responses and errors.
    pub tasks_failed: u64,
    /// Rolling mean of reported processing times.
    pub average_response_ms: f64,
}

impl std::fmt::Debug for AgentInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentInfo")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("has_handler", &self.handler.is_some())
            .field("status", &self.status)
            .field("last_heartbeat", &self.last_heartbeat)
            .field("tasks_completed", &self.tasks_completed)
            .field("tasks_failed", &self.tasks_failed)
            .field("average_response_ms", &self.average_response_ms)
            .finish()
    }
}

impl AgentInfo {
    fn new(name: &str, domain: &str, handler: Option<Arc<dyn AgentHandler>>) -> Self {
        Self {
            name: name.to_string(),
            domain: domain.to_string(),
            handler,
            status: AgentStatus::Unknown,
            last_heartbeat: None,
            tasks_completed: 0,
            tasks_failed: 0,
            average_response_ms: 0.0,
        }
    }

    /// Completed plus failed.
    pub fn total_tasks(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    fn report(&self) -> AgentHealthReport {
        AgentHealthReport {
            name: self.name.clone(),
            domain: self.domain.clone(),
            status: self.status,
            last_heartbeat: self.last_heartbeat,
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            average_response_ms: self.average_response_ms,
        }
    }
}

/// Identity and health bookkeeping for every known worker.
#[derive(Debug, Default)]
pub struct AgentDirectory {
    agents: HashMap<String, AgentInfo>,
}

impl AgentDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory holding [`DEFAULT_ROSTER`], every entry in
    /// [`AgentStatus::Unknown`] until it heartbeats.
    pub fn with_default_roster() -> Self {
        let mut directory = Self::new();
        for (name, domain) in DEFAULT_ROSTER {
            directory
                .agents
                .insert(name.to_string(), AgentInfo::new(name, domain, None));
        }
        directory
    }

    /// Insert or replace an agent. Registration counts as a heartbeat.
    pub fn register(&mut self, name: &str, domain: &str, handler: Option<Arc<dyn AgentHandler>>) {
        let mut info = AgentInfo::new(name, domain, handler);
        info.status = AgentStatus::Healthy;
        info.last_heartbeat = Some(Utc::now());
        if self.agents.insert(name.to_string(), info).is_some() {
            info!(agent = %name, "Agent re-registered");
        } else {
            info!(agent = %name, domain = %domain, "Agent registered");
        }
    }

    /// Count one finished task and fold `response_time_ms` into the rolling
    /// average. Returns false (and logs) for an unknown agent.
    pub fn record_outcome(&mut self, name: &str, success: bool, response_time_ms: u64) -> bool {
        let Some(agent) = self.agents.get_mut(name) else {
            warn!(agent = %name, "Outcome reported for unknown agent");
            return false;
        };

        if success {
            agent.tasks_completed += 1;
        } else {
            agent.tasks_failed += 1;
        }
        let n = agent.total_tasks() as f64;
        agent.average_response_ms =
            (agent.average_response_ms * (n - 1.0) + response_time_ms as f64) / n;
        true
    }

    /// Agents currently reporting [`AgentStatus::Healthy`], sorted by name.
    pub fn list_healthy(&self) -> Vec<&AgentInfo> {
        self.sorted(|a| a.status == AgentStatus::Healthy)
    }

    /// Agents serving `domain`, sorted by name.
    pub fn find_by_domain(&self, domain: &str) -> Vec<&AgentInfo> {
        self.sorted(|a| a.domain == domain)
    }

    /// Stamp a heartbeat and mark the agent healthy.
    pub fn heartbeat(&mut self, name: &str) -> bool {
        self.heartbeat_at(name, Utc::now())
    }

    pub(crate) fn heartbeat_at(&mut self, name: &str, at: DateTime<Utc>) -> bool {
        match self.agents.get_mut(name) {
            Some(agent) => {
                agent.last_heartbeat = Some(at);
                agent.status = AgentStatus::Healthy;
                true
            }
            None => {
                warn!(agent = %name, "Heartbeat from unknown agent");
                false
            }
        }
    }

    /// Downgrade agents whose last heartbeat is older than `interval`
    /// (Degraded) or three intervals (Unavailable). Only a heartbeat restores
    /// health. Returns the agents whose status changed.
    pub fn sweep_health(&mut self, now: DateTime<Utc>, interval: Duration) -> Vec<(String, AgentStatus)> {
        let unavailable_after = interval
            .checked_add(&interval)
            .and_then(|d| d.checked_add(&interval))
            .unwrap_or(interval);
        let mut changed = Vec::new();

        for agent in self.agents.values_mut() {
            let Some(last) = agent.last_heartbeat else {
                continue;
            };
            let age = now.signed_duration_since(last);
            let target = if age > unavailable_after {
                AgentStatus::Unavailable
            } else if age > interval {
                AgentStatus::Degraded
            } else {
                continue;
            };
            if target.severity() > agent.status.severity() {
                warn!(agent = %agent.name, status = %target, "Agent missed heartbeats");
                agent.status = target;
                changed.push((agent.name.clone(), target));
            }
        }
        changed.sort_by(|a, b| a.0.cmp(&b.0));
        changed
    }

    /// Force an agent to [`AgentStatus::Unavailable`].
    pub fn mark_unavailable(&mut self, name: &str) -> bool {
        match self.agents.get_mut(name) {
            Some(agent) => {
                agent.status = AgentStatus::Unavailable;
                true
            }
            None => false,
        }
    }

    /// Look up one agent.
    pub fn get(&self, name: &str) -> Option<&AgentInfo> {
        self.agents.get(name)
    }

    /// The in-process handler registered for `name`, if any.
    pub fn handler(&self, name: &str) -> Option<Arc<dyn AgentHandler>> {
        self.agents.get(name).and_then(|a| a.handler.clone())
    }

    /// Health report for every agent, sorted by name.
    pub fn health_report(&self) -> Vec<AgentHealthReport> {
        self.sorted(|_| true).into_iter().map(AgentInfo::report).collect()
    }

    /// Number of known agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn sorted(&self, pred: impl Fn(&AgentInfo) -> bool) -> Vec<&AgentInfo> {
        let mut agents: Vec<&AgentInfo> = self.agents.values().filter(|a| pred(*a)).collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }
}

impl AgentRoster for AgentDirectory {
    fn contains_agent(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }
}
