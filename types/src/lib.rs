//! Core domain types for the supertask queue engine.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The engine, the CLI and any embedding UI share these definitions.

mod ids;
pub use ids::StepId;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Queue State
// ============================================================================

/// Lifecycle state of a task queue.
///
/// ```text
///            resume / restart                 last step settles
///  Ready ──────────────────────> Executing ─────────────────────> Finished
///    │                            │  ^   │
///    │ pause                pause │  │   │ step fails
///    v                            v  │   v
///  Pending <──────────────────────┘  └── Failed (resume retries the step)
///
///  any state ── destroy ──> Destroyed ── restart ──> Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// Idle: nothing started yet, or fully reset.
    #[default]
    Ready,
    /// A step is in flight or about to be dispatched.
    Executing,
    /// Paused at a step boundary; the cursor is retained.
    Pending,
    /// The cursor reached the end of the generation.
    Finished,
    /// Teardown complete.
    Destroyed,
    /// A step's action failed; the cursor still points at it.
    Failed,
}

impl QueueState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Pending => "pending",
            Self::Finished => "finished",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
        }
    }

    /// States in which no step is in flight and nothing will start on its own.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Finished | Self::Destroyed | Self::Failed
        )
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time view of a queue, published after every observable change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub state: QueueState,
    /// Number of steps whose completion has been observed in this generation.
    pub cursor: usize,
    /// Number of steps in the current generation.
    pub len: usize,
    /// Step the cursor points at, if any.
    pub current: Option<StepId>,
}

impl QueueSnapshot {
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.len.saturating_sub(self.cursor)
    }
}

// ============================================================================
// Disposal
// ============================================================================

/// How stored disposers behave when referenced more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisposePolicy {
    /// Every reference invokes the stored disposer again.
    #[default]
    Repeat,
    /// A stored disposer runs at most once until its entry is replaced.
    Once,
}

impl DisposePolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Repeat => "repeat",
            Self::Once => "once",
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by a step's action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StepError {
    message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wrap any displayable error, keeping only its rendered message.
    pub fn from_display(err: impl fmt::Display) -> Self {
        Self::new(err.to_string())
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for StepError {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StepError {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
