//! Error taxonomy for the Platform.
//!
//! Only tiers 1 ("programmer contract violations") and 4 ("resource exhaustion") of
//! the spec's four-tier error taxonomy are represented here. Tier 2 (transient
//! drops under asynchronous delivery) and tier 3 (meta-agent verification failure)
//! are not errors — they are ordinary, expected outcomes recorded via statistics and
//! the `evaluate`/`explain` hooks, never surfaced through a `Result`.

use thiserror::Error;

use crate::identifier::Identifier;

/// Every fallible operation in this crate returns `Result<T, PlatformError>`.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// A programmer contract violation: an empty `VALID` payload, a message
    /// emitted with no sender, or a meta-agent constructed without its mandatory
    /// `partner_search`/`predict` closures. Fatal — the run terminates.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// The runtime ran out of a bounded resource (inbox capacity, wall-clock
    /// budget). The current turn is allowed to finish; the run then stops.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Lookup against the Server's registries failed.
    #[error("agent not found: {0}")]
    AgentNotFound(Identifier),

    /// A `ServerConfig` value failed cross-field validation.
    #[error("invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Propagated I/O failure loading/saving a `ServerConfig`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Propagated (de)serialization failure for a `ServerConfig`.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PlatformResult<T> = Result<T, PlatformError>;
