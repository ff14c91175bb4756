//! Step queue model: step inputs and the normalized, ordered generation built from them.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use supertask_types::{StepError, StepId};

use crate::store::StepOutput;

pub type StepFuture = BoxFuture<'static, Result<StepOutput, StepError>>;

/// Zero-argument operation producing a step's future value.
///
/// Shared so a generation can run again after a restart.
pub type StepAction = Arc<dyn Fn() -> StepFuture + Send + Sync>;

/// A step as supplied by the caller. Everything except the action is optional.
///
/// ```ignore
/// let spec = StepSpec::new(|| async { Ok(StepOutput::new("done")) })
///     .order(10)
///     .wait(Duration::from_millis(100))
///     .dispose(1);
/// ```
#[derive(Clone)]
pub struct StepSpec {
    id: Option<StepId>,
    order: Option<i64>,
    wait: Option<Duration>,
    dispose: Vec<StepId>,
    action: StepAction,
}

impl StepSpec {
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
    {
        Self {
            id: None,
            order: None,
            wait: None,
            dispose: Vec::new(),
            action: Arc::new(move || action().boxed()),
        }
    }

    pub fn id(mut self, id: impl Into<StepId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    /// Idle time after this step completes, before the next one starts.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Dispose the stored result of `id` before this step runs.
    pub fn dispose(mut self, id: impl Into<StepId>) -> Self {
        self.dispose.push(id.into());
        self
    }

    pub fn dispose_all<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<StepId>,
    {
        self.dispose.extend(ids.into_iter().map(Into::into));
        self
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("wait", &self.wait)
            .field("dispose", &self.dispose)
            .finish_non_exhaustive()
    }
}

/// A normalized step. Immutable once queued.
#[derive(Clone)]
pub struct Step {
    id: StepId,
    order: i64,
    wait: Duration,
    dispose: Vec<StepId>,
    action: StepAction,
}

impl Step {
    #[must_use]
    pub fn id(&self) -> StepId {
        self.id
    }

    #[must_use]
    pub fn order(&self) -> i64 {
        self.order
    }

    #[must_use]
    pub fn wait(&self) -> Duration {
        self.wait
    }

    #[must_use]
    pub fn dispose_refs(&self) -> &[StepId] {
        &self.dispose
    }

    pub(crate) fn run(&self) -> StepFuture {
        (self.action)()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("wait", &self.wait)
            .field("dispose", &self.dispose)
            .finish_non_exhaustive()
    }
}

/// Identifier counter shared by every generation an engine builds.
///
/// Never reset; only constructing a new engine starts again at 1.
#[derive(Debug)]
pub(crate) struct IdSeed {
    next: i64,
}

impl IdSeed {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> StepId {
        let id = StepId::new(self.next);
        self.next += 1;
        id
    }
}

/// The ordered sequence of steps currently active.
///
/// Never reordered after construction; replacing the queue builds a new one.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    steps: Vec<Step>,
}

impl Generation {
    /// Normalize and stable-sort step inputs by order key.
    ///
    /// Missing identifiers come from `seed`, a missing order key defaults to the
    /// identifier and a missing wait to `default_wait`.
    pub(crate) fn build(inputs: Vec<StepSpec>, seed: &mut IdSeed, default_wait: Duration) -> Self {
        let mut steps: Vec<Step> = inputs
            .into_iter()
            .map(|spec| {
                let id = spec.id.unwrap_or_else(|| seed.next_id());
                Step {
                    id,
                    order: spec.order.unwrap_or(id.value()),
                    wait: spec.wait.unwrap_or(default_wait),
                    dispose: spec.dispose,
                    action: spec.action,
                }
            })
            .collect();

        // `sort_by_key` is stable: equal keys keep input order.
        steps.sort_by_key(Step::order);

        let mut seen = HashSet::with_capacity(steps.len());
        for step in &steps {
            if !seen.insert(step.id) {
                tracing::warn!(step = %step.id, "Duplicate step identifier in queue");
            }
        }

        Self { steps }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn get(&self, cursor: usize) -> Option<&Step> {
        self.steps.get(cursor)
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<StepId> {
        self.steps.iter().map(Step::id).collect()
    }
}
