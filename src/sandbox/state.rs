//! Invocation lifecycle states.
//!
//! `Pending → Validating → Provisioning → Executing → Finalizing → Done`.
//! States only move forward; any state may jump straight to `Done`.

use std::fmt;

use serde::Serialize;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Validating,
    Provisioning,
    Executing,
    Finalizing,
    Done,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Provisioning => "provisioning",
            Self::Executing => "executing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Ordered record of the states one invocation passed through.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    states: Vec<ExecutionState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            states: vec![ExecutionState::Pending],
        }
    }

    pub fn current(&self) -> ExecutionState {
        self.states
            .last()
            .copied()
            .unwrap_or(ExecutionState::Pending)
    }

    /// Move forward. Backward or repeated moves are ignored.
    pub fn advance(&mut self, next: ExecutionState) {
        let current = self.current();
        if next <= current {
            warn!(from = %current, to = %next, "ignored backward state transition");
            return;
        }
        trace!(from = %current, to = %next, "state transition");
        self.states.push(next);
    }

    pub fn finish(&mut self) {
        if self.current() != ExecutionState::Done {
            self.advance(ExecutionState::Done);
        }
    }

    pub fn into_states(self) -> Vec<ExecutionState> {
        self.states
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_path_in_order() {
        let mut life = Lifecycle::new();
        life.advance(ExecutionState::Validating);
        life.advance(ExecutionState::Provisioning);
        life.advance(ExecutionState::Executing);
        life.advance(ExecutionState::Finalizing);
        life.finish();
        assert_eq!(
            life.into_states(),
            vec![
                ExecutionState::Pending,
                ExecutionState::Validating,
                ExecutionState::Provisioning,
                ExecutionState::Executing,
                ExecutionState::Finalizing,
                ExecutionState::Done,
            ]
        );
    }

    #[test]
    fn early_exit_jumps_to_done() {
        let mut life = Lifecycle::new();
        life.advance(ExecutionState::Validating);
        life.finish();
        life.finish();
        assert_eq!(
            life.into_states(),
            vec![
                ExecutionState::Pending,
                ExecutionState::Validating,
                ExecutionState::Done
            ]
        );
    }
}
