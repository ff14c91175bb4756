//! Lifecycle callbacks.
//!
//! Hooks run on the driver task, one at a time and in the order the events
//! happen. A slow hook delays the queue; hand long work off elsewhere. A
//! panicking hook is logged and the queue carries on.

use std::sync::Arc;

use supertask_types::{QueueState, StepError, StepId};

use crate::store::StepOutput;

pub trait QueueHooks: Send + Sync {
    /// A run starts at cursor 0 (again after every restart).
    fn before_queue(&self) {}

    /// The cursor reached the end of the generation.
    fn after_queue(&self) {}

    fn before_step(&self, _id: StepId) {}

    fn after_step(&self, _id: StepId, _output: &StepOutput) {}

    /// A step's action failed; the queue is now `Failed` unless a pending
    /// restart or destroy took precedence.
    fn on_step_failed(&self, _id: StepId, _error: &StepError) {}

    fn before_destroy(&self) {}

    fn after_destroyed(&self) {}

    /// Fired exactly once per distinct transition.
    fn on_status_change(&self, _new: QueueState, _old: QueueState) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl QueueHooks for NoopHooks {}

impl<T: QueueHooks + ?Sized> QueueHooks for Arc<T> {
    fn before_queue(&self) {
        (**self).before_queue();
    }

    fn after_queue(&self) {
        (**self).after_queue();
    }

    fn before_step(&self, id: StepId) {
        (**self).before_step(id);
    }

    fn after_step(&self, id: StepId, output: &StepOutput) {
        (**self).after_step(id, output);
    }

    fn on_step_failed(&self, id: StepId, error: &StepError) {
        (**self).on_step_failed(id, error);
    }

    fn before_destroy(&self) {
        (**self).before_destroy();
    }

    fn after_destroyed(&self) {
        (**self).after_destroyed();
    }

    fn on_status_change(&self, new: QueueState, old: QueueState) {
        (**self).on_status_change(new, old);
    }
}
