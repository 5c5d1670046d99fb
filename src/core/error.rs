//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Enqueue attempted for a capability name with no lane. Always rejected
    /// loudly; silently dropping would hide pipeline bugs.
    #[error("unknown capability `{0}`")]
    UnknownCapability(String),
    /// A capability's `load` failed; the worker never calls `process` on it.
    #[error("capability `{capability}` failed to load: {reason}")]
    CapabilityLoadFault {
        /// Capability type name.
        capability: String,
        /// Load failure description.
        reason: String,
    },
    /// Configuration rejected by validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Log sink or other I/O failure during setup.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
///
/// Collaborator contracts ([`crate::core::Task::run`],
/// [`crate::core::Capability::process`]) return this so payload
/// implementations can surface arbitrary failures; the worker boundary logs
/// them as task execution faults.
pub type AppResult<T> = Result<T, anyhow::Error>;
