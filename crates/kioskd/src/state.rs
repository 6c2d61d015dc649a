//! System state - what the machine is currently doing
//!
//! Three flags rather than one enum: a requested shutdown or restart stays
//! pending at the OS level until it runs or is cancelled, and cancellation
//! clears it independently of anything else.
//!
//! Rules:
//! - At most one flag is set at any time
//! - A new operation starts only from idle
//! - Sleeping clears itself when the suspend call returns
//! - Restarting / shutting down clear only through cancellation

use kiosk_common::{ControlError, ControlResult};
use serde::{Deserialize, Serialize};

/// A state-changing machine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Sleep,
    Restart,
    Shutdown,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Sleep => "sleep",
            Operation::Restart => "restart",
            Operation::Shutdown => "shutdown",
        }
    }
}

/// Derived single-word view of [`SystemState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Sleeping,
    Restarting,
    ShuttingDown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Sleeping => "sleeping",
            Phase::Restarting => "restarting",
            Phase::ShuttingDown => "shutting_down",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(into = "StateSnapshot")]
pub struct SystemState {
    sleeping: bool,
    restarting: bool,
    shutting_down: bool,
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn is_idle(&self) -> bool {
        self.active_count() == 0
    }

    /// Number of flags currently set; never more than one
    pub fn active_count(&self) -> usize {
        [self.sleeping, self.restarting, self.shutting_down]
            .iter()
            .filter(|f| **f)
            .count()
    }

    /// A restart or shutdown has been requested from the OS
    pub fn has_pending_action(&self) -> bool {
        self.restarting || self.shutting_down
    }

    pub fn phase(&self) -> Phase {
        if self.sleeping {
            Phase::Sleeping
        } else if self.restarting {
            Phase::Restarting
        } else if self.shutting_down {
            Phase::ShuttingDown
        } else {
            Phase::Idle
        }
    }

    /// Idle → sleeping / restarting / shutting down
    pub fn begin(&mut self, operation: Operation) -> ControlResult<()> {
        if !self.is_idle() {
            return Err(ControlError::InvalidStateTransition {
                requested: operation.as_str().to_string(),
                current: self.phase().as_str().to_string(),
            });
        }
        *self.flag_mut(operation) = true;
        Ok(())
    }

    /// Sleeping → idle, once suspend has returned either way
    pub fn finish_sleep(&mut self) {
        self.sleeping = false;
    }

    /// Undo `begin` when the OS never accepted the request
    pub fn abort(&mut self, operation: Operation) {
        *self.flag_mut(operation) = false;
    }

    /// Restarting / shutting down → idle
    pub fn cancel_pending(&mut self) {
        self.restarting = false;
        self.shutting_down = false;
    }

    fn flag_mut(&mut self, operation: Operation) -> &mut bool {
        match operation {
            Operation::Sleep => &mut self.sleeping,
            Operation::Restart => &mut self.restarting,
            Operation::Shutdown => &mut self.shutting_down,
        }
    }
}

/// Serialized form of [`SystemState`]: the flags plus the derived phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub phase: Phase,
    pub sleeping: bool,
    pub restarting: bool,
    pub shutting_down: bool,
}

impl From<SystemState> for StateSnapshot {
    fn from(state: SystemState) -> Self {
        Self {
            phase: state.phase(),
            sleeping: state.sleeping,
            restarting: state.restarting,
            shutting_down: state.shutting_down,
        }
    }
}
