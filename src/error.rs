//! Typed error hierarchy for the configuration DSL and the matching engine.
//!
//! I/O and protocol-framing failures are handled with `anyhow`, the way the
//! teacher crate does at its service boundaries; these types exist because
//! callers (in particular strict-mode configuration loading) need to tell a
//! parse error from a semantic one from a processor-module failure.

use std::fmt;

/// Where in the configuration source an error occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LineNumber(pub usize);

impl fmt::Display for LineNumber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "line {}", self.0)
  }
}

/// DSL syntax violation; carries the offending line and a human-readable reason.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("parse error at {line}: {reason}")]
pub struct ParseError {
  pub reason: String,
  pub line: LineNumber,
}

impl ParseError {
  pub fn new(reason: impl Into<String>, line: usize) -> Self {
    Self { reason: reason.into(), line: LineNumber(line) }
  }
}

/// DSL structurally valid but violates an invariant from the data model
/// (adjacency rules, calc argument bounds, uniqueness requirements, ...).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("semantic error at {line}: {reason}")]
pub struct SemanticError {
  pub reason: String,
  pub line: LineNumber,
}

impl SemanticError {
  pub fn new(reason: impl Into<String>, line: usize) -> Self {
    Self { reason: reason.into(), line: LineNumber(line) }
  }
}

/// The configured pre/post processor module name isn't in the static registry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("processor error: {0}")]
pub struct ProcessorError(pub String);

/// The external verifier produced an unexpected status; fatal to the milter connection.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("verifier error: unexpected status {0}")]
pub struct VerifierError(pub String);

/// Framing/capability violation on a wire protocol; closes the connection.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("protocol error: {0}")]
pub struct ProtocolError(pub String);

/// Union of the errors a configuration load can produce.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  #[error(transparent)]
  Parse(#[from] ParseError),
  #[error(transparent)]
  Semantic(#[from] SemanticError),
  #[error(transparent)]
  Processor(#[from] ProcessorError),
}

impl ConfigError {
  pub fn line(&self) -> LineNumber {
    match self {
      ConfigError::Parse(e) => e.line,
      ConfigError::Semantic(e) => e.line,
      ConfigError::Processor(_) => LineNumber::default(),
    }
  }
}
