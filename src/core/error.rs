// src/core/error.rs

//! Defines the primary error type for the entire application.
//!
//! Every public operation in this crate returns `Result<T, EngineError>`.
//! The variants realize the error taxonomy of the system: configuration,
//! transient infrastructure, script/transformer, connector send,
//! validation, protocol auth, resource contention, and shutdown.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the engine.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Class 1: a channel or environment is misconfigured. Fatal at deploy time;
    /// the channel is left STOPPED.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Class 2: database connectivity, peer 5xx, or a network blip. Retried at
    /// the queue layer or surfaced as ERROR-with-retry.
    #[error("transient infrastructure error: {0}")]
    Transient(String),

    /// Class 3: a preprocessor, filter, or transformer script raised.
    #[error("script error during {stage}: {detail}")]
    Script { stage: String, detail: String },

    /// Class 4: a destination connector send failed (timeout, refused, protocol).
    #[error("connector '{connector}' send failed: {detail}")]
    ConnectorSend { connector: String, detail: String },

    /// Class 5: the configured response validator demoted a response to ERROR.
    #[error("response validation failed: {0}")]
    Validation(String),

    /// Class 6: inter-instance dispatch authentication failed (`X-Cluster-Secret`
    /// mismatch). Never retried with different credentials.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Class 7: a polling lease was lost mid-poll.
    #[error("polling lease lost for {channel}/{connector}")]
    LeaseLost { channel: String, connector: String },

    /// Class 7: cluster quorum was lost while quorum enforcement is enabled.
    #[error("cluster quorum lost: {alive}/{min_required} alive servers required")]
    QuorumLost { alive: usize, min_required: usize },

    /// Class 8: the engine is draining; the caller should not start new work.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// A message, connector-message, or channel identifier does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The mode controller rejected a mutating request (shadow mode, channel
    /// not promoted; or takeover mode, polling not allowed).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Infrastructure faults below the engine's own taxonomy. These are the only
    /// variants allowed to propagate out of a background task's `JoinSet` future
    /// and trigger graceful shutdown.
    #[error("database error: {0}")]
    Database(Arc<sqlx::Error>),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Database(Arc::new(e))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(Arc::new(e))
    }
}

impl EngineError {
    /// Whether a destination worker should retry this failure per the
    /// destination's retry policy (classes 2, 4, 5).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Transient(_)
                | EngineError::ConnectorSend { .. }
                | EngineError::Validation(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
