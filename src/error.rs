// =============================================================================
// Error taxonomy for the arbitration pipeline
// =============================================================================
//
// Every variant here is locally recoverable: producers are skipped for a
// cycle, scoring failures become abstain votes, persistence failures are
// retried from memory. The one fatal combination — a corrupt weight file with
// no configured default weights — is surfaced by `WeightStore::bootstrap` as
// an `anyhow` error at startup.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A single producer failed this cycle. Other producers are unaffected.
    #[error("producer {strategy} failed: {reason}")]
    Producer { strategy: String, reason: String },

    /// A scoring source did not answer within its timeout.
    #[error("scoring source {src} timed out after {timeout_ms}ms")]
    ScoringTimeout { src: String, timeout_ms: u64 },

    /// A scoring source answered with something that could not be parsed
    /// into a vote.
    #[error("scoring source {src} returned a malformed response: {reason}")]
    ScoringMalformed { src: String, reason: String },

    /// A weight-file or journal write failed. The data stays in memory and
    /// is retried on the next write opportunity.
    #[error("persistence write failed: {0}")]
    PersistenceWrite(String),

    /// The persisted weight file could not be parsed or violates the
    /// sum-to-one invariant.
    #[error("weight vector corrupt: {0}")]
    WeightVectorCorrupt(String),

    /// The execution collaborator reported a failure. The decision closes
    /// unresolved and is excluded from source scoring.
    #[error("execution failed for decision {decision_id}: {reason}")]
    Execution {
        decision_id: String,
        reason: String,
    },
}
