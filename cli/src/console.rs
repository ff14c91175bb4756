//! Terminal front end: hook status lines and stdin control commands.

use std::collections::HashMap;
use std::io::{Write, stdout};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use supertask_engine::{QueueHooks, QueueState, StepError, StepId, StepOutput};

/// Prints one status line per lifecycle event.
#[derive(Debug, Default)]
pub struct ConsoleHooks {
    names: Mutex<HashMap<StepId, String>>,
}

impl ConsoleHooks {
    pub fn new(names: impl IntoIterator<Item = (StepId, String)>) -> Self {
        Self {
            names: Mutex::new(names.into_iter().collect()),
        }
    }

    /// Replace the step names after the queue was reloaded.
    pub fn rename(&self, names: impl IntoIterator<Item = (StepId, String)>) {
        let mut current = self.names.lock().unwrap_or_else(|e| e.into_inner());
        *current = names.into_iter().collect();
    }

    fn label(&self, id: StepId) -> String {
        let names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        match names.get(&id) {
            Some(name) => format!("#{id} {name}"),
            None => format!("#{id}"),
        }
    }

    fn emit(&self, line: &str) {
        let mut out = stdout().lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

impl QueueHooks for ConsoleHooks {
    fn before_queue(&self) {
        self.emit("queue: start");
    }

    fn after_queue(&self) {
        self.emit("queue: done");
    }

    fn before_step(&self, id: StepId) {
        self.emit(&format!("step {}: start", self.label(id)));
    }

    fn after_step(&self, id: StepId, output: &StepOutput) {
        self.emit(&format!("step {}: done {}", self.label(id), output.value()));
    }

    fn on_step_failed(&self, id: StepId, error: &StepError) {
        self.emit(&format!("step {}: failed: {error}", self.label(id)));
    }

    fn before_destroy(&self) {
        self.emit("queue: destroying");
    }

    fn after_destroyed(&self) {
        self.emit("queue: destroyed");
    }

    fn on_status_change(&self, new: QueueState, old: QueueState) {
        self.emit(&format!("state: {old} -> {new}"));
    }
}

/// A control command typed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Restart(Duration),
    Destroy,
    /// Swap in the steps of another plan file; `run` starts it right away.
    Reload { plan: PathBuf, run: bool },
    State,
    Quit,
}

impl ControlCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((verb, args)) = words.split_first() else {
            return Ok(None);
        };

        let command = match (verb.to_ascii_lowercase().as_str(), args) {
            ("pause", []) => Self::Pause,
            ("resume", []) => Self::Resume,
            ("restart", []) => Self::Restart(Duration::ZERO),
            ("restart", [ms]) => {
                let ms: u64 = ms
                    .parse()
                    .map_err(|_| format!("invalid delay '{ms}', expected milliseconds"))?;
                Self::Restart(Duration::from_millis(ms))
            }
            ("destroy", []) => Self::Destroy,
            ("reload", []) => return Err("reload needs a plan file".to_string()),
            ("reload", [plan]) => Self::Reload {
                plan: PathBuf::from(plan),
                run: false,
            },
            ("reload", [plan, flag]) if flag.eq_ignore_ascii_case("run") => Self::Reload {
                plan: PathBuf::from(plan),
                run: true,
            },
            ("state" | "status", []) => Self::State,
            ("quit" | "exit", []) => Self::Quit,
            (
                "pause" | "resume" | "restart" | "destroy" | "reload" | "state" | "status" | "quit"
                | "exit",
                [.., extra],
            ) => return Err(format!("unexpected argument '{extra}'")),
            (other, _) => return Err(format!("unknown command '{other}'")),
        };
        Ok(Some(command))
    }
}

pub const HELP: &str =
    "commands: pause | resume | restart [ms] | destroy | reload <plan.toml> [run] | state | quit";
