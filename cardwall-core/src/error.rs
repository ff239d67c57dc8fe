//! Error types for cardwall operations

use crate::{EntityKind, EntityRef};
use thiserror::Error;

/// Key composition errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Cannot key an unsaved {kind}: id and version must both be assigned")]
    NotPersisted { kind: EntityKind },

    #[error("Key namespace must not be empty")]
    EmptyNamespace,

    #[error("Params are not serializable: {reason}")]
    ParamsNotSerializable { reason: String },
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store I/O failed: {reason}")]
    Io { reason: String },

    #[error("Corrupt entry under {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("Backend error: {reason}")]
    Backend { reason: String },
}

/// Scope statistics and staleness journal errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Statistics source unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Row not found: {entity}")]
    MissingRow { entity: EntityRef },
}

/// Master error type for all cardwall errors.
#[derive(Debug, Clone, Error)]
pub enum CardwallError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

/// Result type alias for cardwall operations.
pub type CardwallResult<T> = Result<T, CardwallError>;

// =============================================================================
// TESTS
// =============================================================================
