// =============================================================================
// Scoring Module
// =============================================================================
//
// Confidence-scoring pipeline for the arbitration engine:
// - Vote model shared by all sources (including the abstain convention)
// - The async source seam, one implementation per configured source
// - Built-in technical source and the reasoning-oracle adapter

pub mod oracle;
pub mod technical;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::market_data::SymbolContext;
use crate::types::Action;

pub use oracle::{HttpOracleClient, OracleClient, OracleSource};
pub use technical::TechnicalSource;

/// One scoring source's opinion on a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVote {
    pub source_id: String,
    pub action: Action,
    /// Conviction in [0, 1].
    pub confidence: f64,
    pub produced_at: DateTime<Utc>,
}

impl ModelVote {
    pub fn new(
        source_id: impl Into<String>,
        action: Action,
        confidence: f64,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            action,
            confidence: confidence.clamp(0.0, 1.0),
            produced_at,
        }
    }

    /// The non-answer a source contributes on timeout or malformed response:
    /// HOLD with zero confidence, so it cannot bias the aggregate.
    pub fn abstain(source_id: impl Into<String>, produced_at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            action: Action::Hold,
            confidence: 0.0,
            produced_at,
        }
    }

    /// Abstains are HOLD at zero confidence. A deliberate HOLD with nonzero
    /// confidence is a scored disagreement, not an abstain.
    pub fn is_abstain(&self) -> bool {
        self.action == Action::Hold && self.confidence == 0.0
    }
}

/// A confidence-scoring source. Each evaluation calls every configured
/// source once; a source that errors or outruns its timeout abstains.
#[async_trait]
pub trait ScoringSource: Send + Sync {
    /// Stable identifier, matching the weight-vector key for this source.
    fn source_id(&self) -> &str;

    /// Per-source timeout override in milliseconds, if this source needs a
    /// different budget than the configured default (the reasoning oracle
    /// typically does).
    fn timeout_ms(&self) -> Option<u64> {
        None
    }

    async fn score(&self, ctx: &SymbolContext) -> Result<ModelVote, EngineError>;
}
