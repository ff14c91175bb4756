//! Shared test utilities and fixtures
//!
//! Hook recorders and step builders used across the integration suite.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use supertask_engine::{
    QueueHooks, QueueOptions, QueueState, StepError, StepId, StepOutput, StepSpec, TaskQueue,
};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;

/// Lifecycle event observed by [`Journal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    BeforeQueue,
    AfterQueue,
    BeforeStep(i64),
    AfterStep(i64),
    Failed(i64),
    BeforeDestroy,
    AfterDestroyed,
    Status(QueueState, QueueState),
}

/// Records every hook call with the (paused-clock) time it happened.
#[derive(Debug, Default)]
pub struct Journal {
    events: Mutex<Vec<(Instant, Event)>>,
}

impl Journal {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push((Instant::now(), event));
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn timed(&self) -> Vec<(Instant, Event)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Step identifiers in the order their `before_step` fired.
    pub fn started_steps(&self) -> Vec<i64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::BeforeStep(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl QueueHooks for Journal {
    fn before_queue(&self) {
        self.record(Event::BeforeQueue);
    }

    fn after_queue(&self) {
        self.record(Event::AfterQueue);
    }

    fn before_step(&self, id: StepId) {
        self.record(Event::BeforeStep(id.value()));
    }

    fn after_step(&self, id: StepId, _output: &StepOutput) {
        self.record(Event::AfterStep(id.value()));
    }

    fn on_step_failed(&self, id: StepId, _error: &StepError) {
        self.record(Event::Failed(id.value()));
    }

    fn before_destroy(&self) {
        self.record(Event::BeforeDestroy);
    }

    fn after_destroyed(&self) {
        self.record(Event::AfterDestroyed);
    }

    fn on_status_change(&self, new: QueueState, old: QueueState) {
        self.record(Event::Status(new, old));
    }
}

pub fn spawn(steps: Vec<StepSpec>, options: QueueOptions) -> (TaskQueue, Arc<Journal>) {
    let journal = Journal::shared();
    let queue = TaskQueue::spawn(steps, Arc::clone(&journal), options);
    (queue, journal)
}

/// Step that sleeps for `work` and returns `value`.
pub fn sleeper(work: Duration, value: i64) -> StepSpec {
    StepSpec::new(move || async move {
        tokio::time::sleep(work).await;
        Ok(StepOutput::new(value))
    })
}

pub fn instant(value: i64) -> StepSpec {
    sleeper(Duration::ZERO, value)
}

/// Blocks each run until the test adds a permit; reports every start.
pub struct Gate {
    permits: Arc<Semaphore>,
    started_tx: mpsc::UnboundedSender<()>,
    started_rx: mpsc::UnboundedReceiver<()>,
}

impl Gate {
    pub fn new() -> Self {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            permits: Arc::new(Semaphore::new(0)),
            started_tx,
            started_rx,
        }
    }

    pub fn step(&self) -> StepSpec {
        let permits = Arc::clone(&self.permits);
        let started = self.started_tx.clone();
        StepSpec::new(move || {
            let permits = Arc::clone(&permits);
            let started = started.clone();
            async move {
                let _ = started.send(());
                permits
                    .acquire()
                    .await
                    .map_err(StepError::from_display)?
                    .forget();
                Ok(StepOutput::new("gated"))
            }
        })
    }

    pub async fn started(&mut self) {
        self.started_rx.recv().await.unwrap();
    }

    pub fn open(&self) {
        self.permits.add_permits(1);
    }
}

pub async fn settle_on(queue: &TaskQueue, state: QueueState) {
    queue.wait_for_state(|s| s == state).await.unwrap();
}
