use crate::types::CostReport;
use overseer_core::{OverseerError, OverseerResult};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Running API spend with an escalating alert ladder.
///
/// An alert fires the first time the total reaches the threshold and again
/// each time it reaches the next multiple of it. Calls that stay inside the
/// current band never alert.
#[derive(Debug)]
pub struct CostTracker {
    threshold: f64,
    total: f64,
    per_api: BTreeMap<String, f64>,
    alert_level: u64,
}

impl CostTracker {
    /// Create a tracker that alerts at multiples of `threshold`.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            total: 0.0,
            per_api: BTreeMap::new(),
            alert_level: 0,
        }
    }

    /// Add `cost` for `api_name`. Returns the new total when this call
    /// climbed into a new alert band.
    pub fn record(&mut self, api_name: &str, cost: f64) -> OverseerResult<Option<f64>> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(OverseerError::InvalidCost(format!("{api_name}: {cost}")));
        }

        *self.per_api.entry(api_name.to_string()).or_insert(0.0) += cost;
        self.total += cost;
        debug!(api = %api_name, cost, total = self.total, "API cost recorded");

        let level = (self.total / self.threshold).floor() as u64;
        if level > self.alert_level {
            self.alert_level = level;
            warn!(total = self.total, threshold = self.threshold, "API cost alert");
            return Ok(Some(self.total));
        }
        Ok(None)
    }

    /// Total across every API.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Spend for one API.
    pub fn api_total(&self, api_name: &str) -> f64 {
        self.per_api.get(api_name).copied().unwrap_or(0.0)
    }

    /// Totals as a report.
    pub fn report(&self) -> CostReport {
        CostReport {
            total: self.total,
            per_api: self.per_api.clone(),
        }
    }
}
