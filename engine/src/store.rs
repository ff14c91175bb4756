//! Result store: last produced value per step, plus disposal bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use supertask_types::{DisposePolicy, StepId};

/// Cleanup action carried by a step result.
///
/// Cloning shares the underlying closure and its invocation counter.
#[derive(Clone)]
pub struct Disposer {
    inner: Arc<DisposerInner>,
}

struct DisposerInner {
    run: Box<dyn Fn() + Send + Sync>,
    invocations: AtomicUsize,
}

impl Disposer {
    pub fn new(run: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(DisposerInner {
                run: Box::new(run),
                invocations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn invoke(&self) {
        self.inner.invocations.fetch_add(1, Ordering::Relaxed);
        (self.inner.run)();
    }

    /// How many times this disposer has run, across all clones.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.inner.invocations.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("invocations", &self.invocations())
            .finish_non_exhaustive()
    }
}

/// Value produced by a successful step.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    value: Value,
    disposer: Option<Disposer>,
}

impl StepOutput {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            disposer: None,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result that is only a disposer, with a null value.
    pub fn cleanup(run: impl Fn() + Send + Sync + 'static) -> Self {
        Self::empty().with_disposer(run)
    }

    pub fn with_disposer(mut self, run: impl Fn() + Send + Sync + 'static) -> Self {
        self.disposer = Some(Disposer::new(run));
        self
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn disposer(&self) -> Option<&Disposer> {
        self.disposer.as_ref()
    }

    #[must_use]
    pub fn is_invocable(&self) -> bool {
        self.disposer.is_some()
    }
}

struct Entry {
    output: StepOutput,
    disposed: bool,
}

/// Mapping from step identifier to its last produced value.
///
/// Disposal never removes an entry; only [`ResultStore::clear`] does.
pub(crate) struct ResultStore {
    entries: HashMap<StepId, Entry>,
    policy: DisposePolicy,
}

impl ResultStore {
    pub fn new(policy: DisposePolicy) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
        }
    }

    pub fn insert(&mut self, id: StepId, output: StepOutput) {
        self.entries.insert(
            id,
            Entry {
                output,
                disposed: false,
            },
        );
    }

    pub fn get(&self, id: StepId) -> Option<&StepOutput> {
        self.entries.get(&id).map(|entry| &entry.output)
    }

    /// Invoke the disposer stored under `id`, if there is one.
    ///
    /// Returns whether a disposer actually ran.
    pub fn dispose(&mut self, id: StepId) -> bool {
        let policy = self.policy;
        match self.entries.get_mut(&id) {
            Some(entry) => Self::dispose_entry(policy, id, entry),
            None => {
                tracing::debug!(step = %id, "No stored result to dispose");
                false
            }
        }
    }

    /// Invoke every stored disposer, regardless of which steps referenced them.
    pub fn dispose_all(&mut self) -> usize {
        let policy = self.policy;
        // Deterministic order: oldest identifiers first.
        let mut ids: Vec<StepId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        let mut invoked = 0;
        for id in ids {
            if let Some(entry) = self.entries.get_mut(&id)
                && Self::dispose_entry(policy, id, entry)
            {
                invoked += 1;
            }
        }
        invoked
    }

    /// A panicking disposer still counts as run; the panic is logged.
    fn dispose_entry(policy: DisposePolicy, id: StepId, entry: &mut Entry) -> bool {
        let Some(disposer) = entry.output.disposer() else {
            return false;
        };
        if policy == DisposePolicy::Once && entry.disposed {
            return false;
        }
        if panic::catch_unwind(AssertUnwindSafe(|| disposer.invoke())).is_err() {
            tracing::warn!(step = %id, "Disposer panicked");
        }
        entry.disposed = true;
        true
    }

    pub fn policy(&self) -> DisposePolicy {
        self.policy
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
