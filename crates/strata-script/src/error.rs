//! Error types for the strata-script sandbox.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("syntax error at offset {pos}: {message}")]
  Syntax { pos: usize, message: String },

  #[error("script source exceeds {0} bytes")]
  SourceTooLarge(usize),

  #[error("unknown identifier {0:?}")]
  UnknownIdentifier(String),

  #[error("unknown function {0:?}")]
  UnknownFunction(String),

  #[error("{name} expects {expected} argument(s), got {got}")]
  Arity {
    name:     &'static str,
    expected: &'static str,
    got:      usize,
  },

  /// The script tried something the sandbox does not permit.
  #[error("sandbox violation: {0}")]
  Violation(String),

  #[error("sandbox violation: step limit of {0} exceeded")]
  StepLimit(u64),

  #[error("sandbox violation: nesting depth limit of {0} exceeded")]
  DepthLimit(usize),

  #[error("sandbox violation: output exceeds {0} bytes")]
  OutputLimit(usize),

  #[error("sandbox violation: evaluation built more than {0} bytes of values")]
  MemoryLimit(usize),

  #[error("type error: {0}")]
  Type(String),

  /// Raised by the script itself through `fail(...)`.
  #[error("script failed: {0}")]
  Failed(String),

  #[error("script evaluation panicked: {0}")]
  Panicked(String),
}

impl Error {
  /// True for errors caused by the sandbox boundary rather than by the
  /// script's own logic.
  pub fn is_violation(&self) -> bool {
    matches!(
      self,
      Self::Violation(_)
        | Self::StepLimit(_)
        | Self::DepthLimit(_)
        | Self::OutputLimit(_)
        | Self::MemoryLimit(_)
        | Self::SourceTooLarge(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
