//! Error types for deferred dispatch.
//!
//! Every error carries the [`CorrelationKey`] of the pending operation it
//! belongs to, so callers juggling many keys can tell failures apart.
//!
//! ## Error Cases
//! - `NotFound`: An action was pushed for a key with no pending operation.
//! - `Upstream`: The completion source failed instead of resolving.
//! - `MissingIdentifier`: The completion source resolved to an entity with no
//!   `id`.
//! - `Cancelled`: The pending operation was cancelled before it resolved.
//! - `TaskAborted`: The resolution task panicked or the runtime dropped it.
//!
//! A duplicate `put` is not an error: it is absorbed and reported as `None`.

use crate::CorrelationKey;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for deferred dispatch.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The key does not correspond to any active pending operation.
    #[error("No pending operation for key {key}")]
    NotFound { key: CorrelationKey },

    /// The completion source yielded an error instead of an entity.
    #[error("Completion source for key {key} failed: {reason}")]
    Upstream { key: CorrelationKey, reason: String },

    /// The completion source resolved without a durable identifier.
    #[error("Resolved entity for key {key} has no `id` field")]
    MissingIdentifier { key: CorrelationKey },

    /// The pending operation was cancelled before resolving.
    #[error("Pending operation for key {key} was cancelled")]
    Cancelled { key: CorrelationKey },

    /// The task awaiting the completion source did not run to completion.
    #[error("Resolution task for key {key} aborted: {context}")]
    TaskAborted {
        key: CorrelationKey,
        context: String,
    },
}

impl Error {
    /// The correlation key the error was raised for.
    pub const fn key(&self) -> &CorrelationKey {
        match self {
            Self::NotFound { key }
            | Self::Upstream { key, .. }
            | Self::MissingIdentifier { key }
            | Self::Cancelled { key }
            | Self::TaskAborted { key, .. } => key,
        }
    }
}
