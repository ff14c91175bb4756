//! Plan files: simulated steps described in TOML.
//!
//! ```toml
//! [[steps]]
//! name = "fetch"
//! duration_ms = 200
//! wait_ms = 100
//!
//! [[steps]]
//! name = "render"
//! order = 5
//! fail = true
//! dispose = [1]
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use supertask_engine::{StepError, StepId, StepOutput, StepSpec};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannedStep {
    pub name: String,
    pub id: Option<i64>,
    pub order: Option<i64>,
    /// Simulated work time.
    #[serde(default)]
    pub duration_ms: u64,
    pub wait_ms: Option<u64>,
    /// Fail the first attempt; a retry after `resume` succeeds.
    #[serde(default)]
    pub fail: bool,
    #[serde(default)]
    pub dispose: Vec<i64>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid plan {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let plan: Plan = toml::from_str(content)?;
        if plan.steps.is_empty() {
            tracing::warn!("Plan has no steps");
        }
        Ok(plan)
    }

    pub fn step_specs(&self) -> Vec<StepSpec> {
        self.steps.iter().map(PlannedStep::to_spec).collect()
    }
}

impl PlannedStep {
    fn to_spec(&self) -> StepSpec {
        let name: Arc<str> = Arc::from(self.name.as_str());
        let duration = Duration::from_millis(self.duration_ms);
        let fail_next = Arc::new(AtomicBool::new(self.fail));

        let mut spec = StepSpec::new(move || {
            let name = Arc::clone(&name);
            let fail_next = Arc::clone(&fail_next);
            async move {
                tokio::time::sleep(duration).await;
                if fail_next.swap(false, Ordering::SeqCst) {
                    return Err(StepError::new(format!("{name} failed")));
                }
                let value = json!({ "step": &*name, "elapsed_ms": duration.as_millis() as u64 });
                Ok(StepOutput::new(value).with_disposer(move || {
                    tracing::info!(step = %name, "Disposed step result");
                }))
            }
        })
        .dispose_all(self.dispose.iter().copied());

        if let Some(id) = self.id {
            spec = spec.id(id);
        }
        if let Some(order) = self.order {
            spec = spec.order(order);
        }
        if let Some(wait_ms) = self.wait_ms {
            spec = spec.wait(Duration::from_millis(wait_ms));
        }
        spec
    }
}

/// Predicts the identifiers the engine assigns, so steps can be shown by name.
///
/// Mirrors the engine's numbering: explicit identifiers are kept and the
/// rest are numbered in input order from a counter that continues across
/// reloads.
#[derive(Debug, Clone)]
pub struct StepNumbering {
    next: i64,
}

impl Default for StepNumbering {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl StepNumbering {
    pub fn assign(&mut self, plan: &Plan) -> Vec<(StepId, String)> {
        plan.steps
            .iter()
            .map(|step| {
                let id = step.id.unwrap_or_else(|| {
                    let id = self.next;
                    self.next += 1;
                    id
                });
                (StepId::new(id), step.name.clone())
            })
            .collect()
    }
}
