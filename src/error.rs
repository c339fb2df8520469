//! Domain errors surfaced to callers of the simulator.

use thiserror::Error;

use crate::models::CopyStatus;

/// Caller-facing failures of the simulation core.
///
/// These are programmer or caller errors; runtime degeneracy (NaN, stale
/// prices, feed drops) is handled in place and never shows up here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    #[error("invalid bot configuration: {0}")]
    InvalidConfig(String),

    #[error("id '{0}' is reserved for user copies")]
    ReservedCopyId(String),

    #[error("bot '{0}' already exists")]
    DuplicateBot(String),

    #[error("bot '{0}' not found")]
    BotNotFound(String),

    #[error("copy '{0}' not found")]
    CopyNotFound(String),

    #[error("copy '{id}' is {status} and can only be deleted once closed")]
    CopyNotClosed { id: String, status: CopyStatus },

    #[error("copy '{id}' cannot move from {from} to {to}")]
    InvalidCopyTransition {
        id: String,
        from: CopyStatus,
        to: CopyStatus,
    },

    #[error("invested amount must be positive, got {0}")]
    InvalidAmount(String),
}
