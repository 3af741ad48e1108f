use overseer_core::{OverseerError, OverseerResult};
use std::collections::HashMap;

/// Built-in task-type to worker mapping.
pub const DEFAULT_ROUTES: [(&str, &str); 13] = [
    ("transform", "ResumeAgent"),
    ("parse_resume", "ResumeAgent"),
    ("scrape", "ScraperAgent"),
    ("scrape_jobs", "ScraperAgent"),
    ("process_photo", "FieldIntelAgent"),
    ("process_audio", "FieldIntelAgent"),
    ("process_video", "FieldIntelAgent"),
    ("transcribe", "FieldIntelAgent"),
    ("analyze", "AnalystAgent"),
    ("predict", "AnalystAgent"),
    ("score", "AnalystAgent"),
    ("generate_report", "ReportAgent"),
    ("export", "ReportAgent"),
];

/// Static lookup from task type to the worker that handles it.
#[derive(Debug, Clone)]
pub struct TaskRouter {
    routes: HashMap<String, String>,
}

impl TaskRouter {
    /// A router with [`DEFAULT_ROUTES`].
    pub fn new() -> Self {
        Self {
            routes: DEFAULT_ROUTES
                .iter()
                .map(|(task_type, agent)| (task_type.to_string(), agent.to_string()))
                .collect(),
        }
    }

    /// A router with no routes.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Add or replace a route.
    pub fn with_route(mut self, task_type: impl Into<String>, agent: impl Into<String>) -> Self {
        self.routes.insert(task_type.into(), agent.into());
        self
    }

    /// The worker for `task_type`. Never guesses a default.
    pub fn route(&self, task_type: &str) -> OverseerResult<&str> {
        self.routes
            .get(task_type)
            .map(String::as_str)
            .ok_or_else(|| OverseerError::UnknownTaskType(task_type.to_string()))
    }

    /// All routable task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self::new()
    }
}
