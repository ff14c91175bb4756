//! TaskQueue facade: the control API consumed by callers.
//!
//! Every control call is forwarded to the driver task and answered with the
//! queue state right after the call's immediate effect. A call that only
//! recorded an intent (the queue was executing) answers `Executing`; a call
//! that was a no-op answers the unchanged state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use supertask_types::{QueueSnapshot, QueueState, StepId};

use crate::config::{QueueOptions, SupertaskConfig};
use crate::driver::{Command, Driver, DriverSettings};
use crate::generation::StepSpec;
use crate::hooks::QueueHooks;
use crate::store::StepOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("task queue driver has shut down")]
    Closed,
}

/// Handle to a running task queue. Cheap to clone.
///
/// The driver task keeps running until every handle is dropped and the work
/// it has already scheduled is done.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<QueueSnapshot>,
}

impl TaskQueue {
    /// Build a queue from `steps` and spawn its driver on the current tokio runtime.
    ///
    /// With `options.immediate` the first step is dispatched right away;
    /// otherwise the queue waits in `Ready` for [`TaskQueue::resume`] or
    /// [`TaskQueue::restart`].
    pub fn spawn(
        steps: Vec<StepSpec>,
        hooks: impl QueueHooks + 'static,
        options: QueueOptions,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(options.command_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(QueueSnapshot::default());
        let settings = DriverSettings {
            immediate: options.immediate,
            default_wait: options.default_wait,
            dispose_policy: options.dispose_policy,
        };
        let driver = Driver::new(steps, Arc::new(hooks), &settings, snapshot_tx);
        tokio::spawn(driver.run(command_rx));

        Self {
            commands: command_tx,
            snapshot: snapshot_rx,
        }
    }

    /// Like [`TaskQueue::spawn`], with options taken from a loaded config file.
    pub fn with_config(
        steps: Vec<StepSpec>,
        hooks: impl QueueHooks + 'static,
        config: &SupertaskConfig,
    ) -> Self {
        Self::spawn(steps, hooks, config.queue_options())
    }

    /// Request a pause. Takes effect immediately when nothing has started,
    /// otherwise after the in-flight step settles.
    pub async fn pause(&self) -> Result<QueueState, QueueError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    /// Start from the beginning when `Ready`; continue from the retained
    /// cursor when `Pending`; retry the failed step when `Failed`.
    pub async fn resume(&self) -> Result<QueueState, QueueError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Dispose every stored result, reset to the first step and start again
    /// after `delay`. Deferred to the next checkpoint while executing.
    pub async fn restart(&self, delay: Duration) -> Result<QueueState, QueueError> {
        self.request(|reply| Command::Restart { delay, reply }).await
    }

    /// Tear the queue down. Idempotent; deferred to the next checkpoint while executing.
    pub async fn destroy(&self) -> Result<QueueState, QueueError> {
        self.request(|reply| Command::Destroy { reply }).await
    }

    /// Swap in a new set of steps. Ignored while executing.
    ///
    /// With `run` the new queue starts immediately.
    pub async fn replace_queue(
        &self,
        steps: Vec<StepSpec>,
        run: bool,
    ) -> Result<QueueState, QueueError> {
        self.request(|reply| Command::Replace { steps, run, reply })
            .await
    }

    /// Last value stored for `id`, if the step has completed since the last reset.
    pub async fn result(&self, id: impl Into<StepId>) -> Result<Option<StepOutput>, QueueError> {
        let id = id.into();
        self.request(|reply| Command::Result { id, reply }).await
    }

    #[must_use]
    pub fn state(&self) -> QueueState {
        self.snapshot.borrow().state
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        *self.snapshot.borrow()
    }

    /// Receiver that observes every published snapshot.
    ///
    /// Only the latest value is retained; use hooks to see every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the published state satisfies `accept`.
    pub async fn wait_for_state(
        &self,
        mut accept: impl FnMut(QueueState) -> bool,
    ) -> Result<QueueState, QueueError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|snapshot| accept(snapshot.state))
            .await
            .map_err(|_| QueueError::Closed)?;
        Ok(snapshot.state)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| QueueError::Closed)?;
        reply_rx.await.map_err(|_| QueueError::Closed)
    }
}
