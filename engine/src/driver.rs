//! Driver task: the single owner of generation, cursor, results, intents and state.
//!
//! Control requests arrive over a command channel and are applied between
//! polls of the in-flight step, so no two actors ever touch queue state at
//! the same time.
//!
//! # Checkpoints
//!
//! ```text
//!            ┌──────────────┐ settle  ┌──────────────────────┐
//! advance ──>│  step future │───────> │ check_continuation   │
//!    ^       └──────────────┘         │ restart > destroy >  │
//!    │                                │ pause > end > wait   │
//!    └────────── idle timer <──────── └──────────────────────┘
//! ```
//!
//! Pause, restart and destroy issued while a step is in flight only set an
//! intent; the intent is consumed at the next checkpoint.

use std::future::pending;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{FutureExt, ready};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};

use supertask_types::{DisposePolicy, QueueSnapshot, QueueState, StepError, StepId};

use crate::generation::{Generation, IdSeed, StepFuture, StepSpec};
use crate::hooks::QueueHooks;
use crate::store::{ResultStore, StepOutput};

pub(crate) enum Command {
    Pause {
        reply: oneshot::Sender<QueueState>,
    },
    Resume {
        reply: oneshot::Sender<QueueState>,
    },
    Restart {
        delay: Duration,
        reply: oneshot::Sender<QueueState>,
    },
    Destroy {
        reply: oneshot::Sender<QueueState>,
    },
    Replace {
        steps: Vec<StepSpec>,
        run: bool,
        reply: oneshot::Sender<QueueState>,
    },
    Result {
        id: StepId,
        reply: oneshot::Sender<Option<StepOutput>>,
    },
}

/// Control requests recorded while a step is in flight.
#[derive(Debug, Default)]
struct Intents {
    pending: bool,
    restart: Option<Duration>,
    destroy: bool,
}

struct InFlight {
    id: StepId,
    wait: Duration,
    future: StepFuture,
}

enum Event {
    Command(Command),
    CommandsClosed,
    Settled(Result<StepOutput, StepError>),
    IdleElapsed,
    StartDue,
    Quiescent,
}

pub(crate) struct DriverSettings {
    pub immediate: bool,
    pub default_wait: Duration,
    pub dispose_policy: DisposePolicy,
}

pub(crate) struct Driver {
    generation: Generation,
    cursor: usize,
    store: ResultStore,
    seed: IdSeed,
    intents: Intents,
    state: QueueState,
    hooks: Arc<dyn QueueHooks>,
    snapshot_tx: watch::Sender<QueueSnapshot>,
    default_wait: Duration,
    immediate: bool,
    in_flight: Option<InFlight>,
    /// Inter-step delay; the next step starts when it elapses.
    idle_until: Option<Instant>,
    /// Deferred start armed by a delayed restart.
    start_at: Option<Instant>,
}

impl Driver {
    pub fn new(
        steps: Vec<StepSpec>,
        hooks: Arc<dyn QueueHooks>,
        settings: &DriverSettings,
        snapshot_tx: watch::Sender<QueueSnapshot>,
    ) -> Self {
        let mut seed = IdSeed::new();
        let generation = Generation::build(steps, &mut seed, settings.default_wait);
        let driver = Self {
            generation,
            cursor: 0,
            store: ResultStore::new(settings.dispose_policy),
            seed,
            intents: Intents::default(),
            state: QueueState::Ready,
            hooks,
            snapshot_tx,
            default_wait: settings.default_wait,
            immediate: settings.immediate,
            in_flight: None,
            idle_until: None,
            start_at: None,
        };
        driver.publish();
        driver
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!(
            steps = self.generation.len(),
            dispose_policy = self.store.policy().as_str(),
            "Task queue driver started"
        );
        if self.immediate {
            self.start_or_continue();
        }

        let mut commands_open = true;
        loop {
            match self.next_event(&mut commands, commands_open).await {
                Event::Command(command) => self.handle_command(command),
                Event::CommandsClosed => {
                    tracing::debug!("All queue handles dropped; draining scheduled work");
                    commands_open = false;
                }
                Event::Settled(result) => self.on_settled(result),
                Event::IdleElapsed => {
                    self.idle_until = None;
                    self.advance();
                }
                Event::StartDue => {
                    self.start_at = None;
                    self.start_or_continue();
                }
                Event::Quiescent => break,
            }
        }

        tracing::debug!(state = %self.state, "Task queue driver stopped");
    }

    async fn next_event(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
        commands_open: bool,
    ) -> Event {
        let idle_until = self.idle_until;
        let start_at = self.start_at;
        let in_flight = self.in_flight.as_mut().map(|step| &mut step.future);
        let has_in_flight = in_flight.is_some();

        tokio::select! {
            biased;
            command = commands.recv(), if commands_open => match command {
                Some(command) => Event::Command(command),
                None => Event::CommandsClosed,
            },
            result = settle(in_flight), if has_in_flight => Event::Settled(result),
            () = sleep_until_opt(idle_until), if idle_until.is_some() => Event::IdleElapsed,
            () = sleep_until_opt(start_at), if start_at.is_some() => Event::StartDue,
            else => Event::Quiescent,
        }
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    /// Sole mutation point for `state`. Notifies only on a distinct transition.
    fn set_state(&mut self, next: QueueState) {
        let prev = self.state;
        if prev == next {
            return;
        }
        self.state = next;
        tracing::debug!(from = %prev, to = %next, "Queue state changed");
        self.notify("on_status_change", |hooks| hooks.on_status_change(next, prev));
        self.publish();
    }

    /// Call into user hooks. A panicking hook is logged and does not stop the driver.
    fn notify(&self, hook: &'static str, call: impl FnOnce(&dyn QueueHooks)) {
        let hooks = &*self.hooks;
        if panic::catch_unwind(AssertUnwindSafe(|| call(hooks))).is_err() {
            tracing::warn!(hook, "Queue hook panicked");
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(QueueSnapshot {
            state: self.state,
            cursor: self.cursor,
            len: self.generation.len(),
            current: self.generation.get(self.cursor).map(|step| step.id()),
        });
    }

    // ------------------------------------------------------------------------
    // Driver loop
    // ------------------------------------------------------------------------

    fn start_or_continue(&mut self) {
        if matches!(
            self.state,
            QueueState::Executing
                | QueueState::Finished
                | QueueState::Destroyed
                | QueueState::Failed
        ) {
            return;
        }
        if self.generation.is_empty() {
            tracing::warn!("Task queue started with an empty step list");
        }
        self.advance();
    }

    fn advance(&mut self) {
        if self.cursor >= self.generation.len() {
            self.finish();
            return;
        }
        // A control request settled the queue since this activation was scheduled.
        if self.state.is_settled() {
            return;
        }
        self.set_state(QueueState::Executing);
        if self.cursor == 0 {
            self.notify("before_queue", |hooks| hooks.before_queue());
        }

        let Some(step) = self.generation.get(self.cursor).cloned() else {
            return;
        };
        let id = step.id();
        self.notify("before_step", |hooks| hooks.before_step(id));
        for target in step.dispose_refs() {
            self.store.dispose(*target);
        }

        tracing::debug!(step = %id, cursor = self.cursor, "Dispatching step");
        // The action may panic before returning a future, or while it is polled.
        let future = match panic::catch_unwind(AssertUnwindSafe(|| step.run())) {
            Ok(future) => AssertUnwindSafe(future)
                .catch_unwind()
                .map(|outcome| outcome.unwrap_or_else(|_| Err(step_panicked())))
                .boxed(),
            Err(_) => ready(Err(step_panicked())).boxed(),
        };
        self.start_at = None;
        self.in_flight = Some(InFlight {
            id,
            wait: step.wait(),
            future,
        });
        self.publish();
    }

    fn on_settled(&mut self, result: Result<StepOutput, StepError>) {
        let Some(InFlight { id, wait, .. }) = self.in_flight.take() else {
            return;
        };
        match result {
            Ok(output) => {
                self.store.insert(id, output.clone());
                self.cursor += 1;
                self.publish();
                self.notify("after_step", |hooks| hooks.after_step(id, &output));
                self.check_continuation(wait);
            }
            Err(error) => {
                tracing::warn!(step = %id, error = %error, "Step failed");
                self.notify("on_step_failed", |hooks| hooks.on_step_failed(id, &error));
                self.check_failure();
            }
        }
    }

    /// Checkpoint after a successful step. The only place intents are consumed.
    fn check_continuation(&mut self, wait: Duration) {
        if let Some(delay) = self.intents.restart.take() {
            self.run_restart(delay);
            return;
        }
        if mem::take(&mut self.intents.destroy) {
            self.run_destroy();
            return;
        }
        if mem::take(&mut self.intents.pending) {
            tracing::info!(cursor = self.cursor, "Queue paused");
            self.set_state(QueueState::Pending);
            return;
        }
        if self.cursor >= self.generation.len() {
            self.finish();
            return;
        }
        if wait.is_zero() {
            self.advance();
        } else {
            self.idle_until = Some(Instant::now() + wait);
        }
    }

    /// Checkpoint after a failed step: restart and destroy still win.
    fn check_failure(&mut self) {
        self.intents.pending = false;
        if let Some(delay) = self.intents.restart.take() {
            self.run_restart(delay);
            return;
        }
        if mem::take(&mut self.intents.destroy) {
            self.run_destroy();
            return;
        }
        self.set_state(QueueState::Failed);
    }

    fn finish(&mut self) {
        self.notify("after_queue", |hooks| hooks.after_queue());
        self.set_state(QueueState::Finished);
        tracing::info!(steps = self.generation.len(), "Queue finished");
    }

    // ------------------------------------------------------------------------
    // Reset and teardown
    // ------------------------------------------------------------------------

    fn run_restart(&mut self, delay: Duration) {
        let disposed = self.store.dispose_all();
        self.store.clear();
        self.cursor = 0;
        self.idle_until = None;
        self.set_state(QueueState::Ready);
        self.publish();
        tracing::info!(
            disposed,
            delay_ms = delay.as_millis() as u64,
            "Queue restarting"
        );
        if delay.is_zero() {
            self.start_at = None;
            self.start_or_continue();
        } else {
            self.start_at = Some(Instant::now() + delay);
        }
    }

    fn run_destroy(&mut self) {
        self.notify("before_destroy", |hooks| hooks.before_destroy());
        let disposed = self.store.dispose_all();
        self.notify("after_destroyed", |hooks| hooks.after_destroyed());
        self.idle_until = None;
        self.start_at = None;
        self.set_state(QueueState::Destroyed);
        tracing::info!(disposed, "Queue destroyed");
    }

    // ------------------------------------------------------------------------
    // Control API
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Pause { reply } => {
                self.pause();
                let _ = reply.send(self.state);
            }
            Command::Resume { reply } => {
                self.resume();
                let _ = reply.send(self.state);
            }
            Command::Restart { delay, reply } => {
                self.restart(delay);
                let _ = reply.send(self.state);
            }
            Command::Destroy { reply } => {
                self.destroy();
                let _ = reply.send(self.state);
            }
            Command::Replace { steps, run, reply } => {
                self.replace_queue(steps, run);
                let _ = reply.send(self.state);
            }
            Command::Result { id, reply } => {
                let _ = reply.send(self.store.get(id).cloned());
            }
        }
    }

    fn pause(&mut self) {
        self.intents.pending = true;
        if self.state == QueueState::Ready {
            self.set_state(QueueState::Pending);
        }
    }

    fn resume(&mut self) {
        match self.state {
            QueueState::Ready => self.start_or_continue(),
            QueueState::Pending | QueueState::Failed => {
                self.intents.pending = false;
                self.set_state(QueueState::Executing);
                self.advance();
            }
            QueueState::Executing | QueueState::Finished | QueueState::Destroyed => {
                tracing::debug!(state = %self.state, "Resume ignored");
            }
        }
    }

    fn restart(&mut self, delay: Duration) {
        if self.state == QueueState::Executing {
            self.intents.restart = Some(delay);
        } else {
            self.run_restart(delay);
        }
    }

    fn destroy(&mut self) {
        match self.state {
            QueueState::Destroyed => {}
            QueueState::Executing => self.intents.destroy = true,
            _ => self.run_destroy(),
        }
    }

    fn replace_queue(&mut self, steps: Vec<StepSpec>, run: bool) {
        if self.state == QueueState::Executing {
            tracing::debug!("Replace ignored while executing");
            return;
        }
        self.generation = Generation::build(steps, &mut self.seed, self.default_wait);
        if !self.store.is_empty() {
            tracing::debug!(
                discarded = self.store.len(),
                "Dropping stored results of replaced queue"
            );
        }
        self.store.clear();
        self.cursor = 0;
        self.set_state(QueueState::Ready);
        self.publish();
        tracing::info!(steps = self.generation.len(), run, "Queue replaced");
        if run {
            self.restart(Duration::ZERO);
        }
    }
}

fn step_panicked() -> StepError {
    StepError::new("step panicked")
}

async fn settle(future: Option<&mut StepFuture>) -> Result<StepOutput, StepError> {
    match future {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
