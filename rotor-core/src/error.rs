//! Typed errors for the orchestration engine.
//!
//! The error-handling design (spec §7) requires the engine to branch on
//! *kind* of failure — transient, build, container-health, invariant,
//! configuration — rather than inspect message strings. A closed enum gets
//! us that for free; `anyhow::Error` (used everywhere else in this crate for
//! adapter-internal failures) does not carry a kind discriminant.

use std::fmt;

/// A single failure surfaced by the orchestration engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// VCS or runtime subprocess failed, timed out, or the daemon blipped.
    /// Logged; the enclosing pipeline stage is treated as failed for this
    /// cycle. Retried only via the next trigger (webhook or admin refresh).
    #[error("transient infrastructure failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// Image build failed (bad recipe, non-zero build exit).
    #[error("image build failed for project {project}: {source}")]
    BuildFailed {
        project: usize,
        #[source]
        source: anyhow::Error,
    },

    /// A container failed its readiness hook or exited during startup.
    #[error("container health failure for project {project}: {reason}")]
    ContainerHealth { project: usize, reason: String },

    /// An invariant the engine relies on was violated. Fatal: the caller
    /// must stop processing events and exit with this diagnostic.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Static configuration was malformed. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether this error kind is fatal — the engine must stop accepting
    /// new events and exit (spec §7.4/§7.5).
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Invariant(_) | EngineError::Config(_))
    }
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// A lightweight, cloneable summary of an [`EngineError`] suitable for
/// embedding in completion events, which must be `Send` and are often
/// logged without the full source chain.
#[derive(Debug, Clone)]
pub struct ErrorSummary {
    pub message: String,
    pub fatal: bool,
}

impl From<&EngineError> for ErrorSummary {
    fn from(e: &EngineError) -> Self {
        ErrorSummary {
            message: e.to_string(),
            fatal: e.is_fatal(),
        }
    }
}

impl fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
