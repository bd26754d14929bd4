//! Errors surfaced to callers of commit and sync

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CommitError {
    /// Placement rules rejected the entity; it stays a draft
    #[error("placement rejected: {reason}")]
    Placement { reason: String },

    /// The remote store raised; the message is also kept on the entity
    #[error("remote store error: {message}")]
    Remote { message: String },

    /// No scope is connected, so there is nowhere to write
    #[error("not connected to a scope")]
    Disconnected,
}

impl CommitError {
    pub fn placement(reason: impl Into<String>) -> Self {
        CommitError::Placement {
            reason: reason.into(),
        }
    }
}
