//! Pipeline lifecycle state machine (spec §3)
//!
//! `idle -> initializing -> ready -> running -> finalizing -> terminated`,
//! plus a terminal `cancelled` absorbing state reachable from any
//! non-terminal state. Transitions are driven solely by messages and are
//! idempotent on re-entry (re-sending the message that produced the current
//! state is a no-op, not an error).

use crate::pipeline::error::{PipelineError, PipelineErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Initializing,
  Ready,
  Running,
  Finalizing,
  Terminated,
  Cancelled,
}

impl PipelineState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, PipelineState::Terminated | PipelineState::Cancelled)
  }

  /// Validate a requested transition, per the table implied by spec §3/§4.5.
  /// Re-entry into the same state is always accepted (idempotence).
  pub fn validate_transition(&self, to: PipelineState) -> Result<(), PipelineError> {
    if *self == to {
      return Ok(());
    }
    // cancel is reachable from any non-terminal state.
    if to == PipelineState::Cancelled {
      return if self.is_terminal() {
        Err(PipelineError::new(
          PipelineErrorKind::InvalidState,
          format!("cannot cancel from terminal state {self:?}"),
        ))
      } else {
        Ok(())
      };
    }
    let allowed = matches!(
      (self, to),
      (PipelineState::Idle, PipelineState::Initializing)
        | (PipelineState::Initializing, PipelineState::Ready)
        | (PipelineState::Ready, PipelineState::Running)
        | (PipelineState::Running, PipelineState::Finalizing)
        | (PipelineState::Finalizing, PipelineState::Terminated)
    );
    if allowed {
      Ok(())
    } else {
      Err(PipelineError::new(
        PipelineErrorKind::InvalidState,
        format!("invalid transition {self:?} -> {to:?}"),
      ))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cancel_reachable_from_running() {
    assert!(PipelineState::Running
      .validate_transition(PipelineState::Cancelled)
      .is_ok());
  }

  #[test]
  fn cancel_not_reachable_from_terminated() {
    assert!(PipelineState::Terminated
      .validate_transition(PipelineState::Cancelled)
      .is_err());
  }

  #[test]
  fn re_entry_is_idempotent() {
    assert!(PipelineState::Running
      .validate_transition(PipelineState::Running)
      .is_ok());
  }

  #[test]
  fn skipping_a_state_is_rejected() {
    assert!(PipelineState::Idle
      .validate_transition(PipelineState::Running)
      .is_err());
  }

  #[test]
  fn forward_chain_is_accepted() {
    let chain = [
      PipelineState::Idle,
      PipelineState::Initializing,
      PipelineState::Ready,
      PipelineState::Running,
      PipelineState::Finalizing,
      PipelineState::Terminated,
    ];
    for pair in chain.windows(2) {
      assert!(pair[0].validate_transition(pair[1]).is_ok());
    }
  }
}
