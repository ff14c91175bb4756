//! Single-flow task queue engine.
//!
//! Runs an ordered list of asynchronous steps one at a time, with an idle
//! delay between steps, and exposes pause/resume/restart/destroy/replace
//! controls plus lifecycle hooks.
//!
//! ```text
//! TaskQueue (handle) ──commands──> Driver task ──hooks──> QueueHooks
//!        ^                              │
//!        └──────── watch<QueueSnapshot> ┘
//! ```
//!
//! The driver owns all queue state; handles only send commands and read snapshots.

// Re-export domain types for the public API
pub use supertask_types::{DisposePolicy, QueueSnapshot, QueueState, StepError, StepId};

mod config;
pub use config::{
    ConfigError, DEFAULT_COMMAND_CAPACITY, QueueConfig, QueueOptions, SupertaskConfig,
};

mod driver;
mod generation;
pub use generation::{StepAction, StepFuture, StepSpec};

mod handle;
pub use handle::{QueueError, TaskQueue};

mod hooks;
pub use hooks::{NoopHooks, QueueHooks};

mod store;
pub use store::{Disposer, StepOutput};
