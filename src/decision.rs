// =============================================================================
// Ensemble Decision — auditable record of every arbitration verdict
// =============================================================================
//
// Life-cycle:
//   PENDING  ->  ADMITTED  -> closed by a TradeOutcome
//   PENDING  ->  DISCARDED (terminal)
//
// A decision pins the weight-vector version it was scored under, so a later
// recalibration never retroactively alters it.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scoring::ModelVote;
use crate::signal::Signal;
use crate::types::Action;

/// Where a decision sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionStatus {
    Pending,
    Admitted,
    Discarded,
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Admitted => write!(f, "ADMITTED"),
            Self::Discarded => write!(f, "DISCARDED"),
        }
    }
}

/// Why a decision was discarded. Recorded for observability only — a
/// discarded decision never touches weights or performance windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiscardReason {
    /// Every scoring source abstained; there is nothing to act on.
    AllSourcesAbstained,
    /// The candidate action resolved to HOLD.
    HoldCandidate,
    /// Aggregate confidence fell short of the admission threshold.
    BelowThreshold { aggregate: f64, threshold: f64 },
    /// The symbol already has a pending or admitted decision.
    SymbolInFlight,
    /// The global concurrent-position cap is reached.
    PositionLimit { open: usize, limit: usize },
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllSourcesAbstained => write!(f, "all sources abstained"),
            Self::HoldCandidate => write!(f, "candidate action is HOLD"),
            Self::BelowThreshold { aggregate, threshold } => {
                write!(f, "aggregate {aggregate:.3} below threshold {threshold:.3}")
            }
            Self::SymbolInFlight => write!(f, "symbol already has a decision in flight"),
            Self::PositionLimit { open, limit } => {
                write!(f, "open positions {open} at limit {limit}")
            }
        }
    }
}

/// The arbitration verdict for one candidate signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleDecision {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub symbol: String,
    pub candidate_action: Action,
    /// Weighted agreement with the candidate action, in [0, 1].
    pub aggregate_confidence: f64,
    /// Every source's vote, in the order the sources are configured.
    pub contributing_votes: Vec<ModelVote>,
    /// Weight-vector version the aggregation used.
    pub weight_version: u64,
    pub status: DecisionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discard_reason: Option<DiscardReason>,
    /// Recommended allocation percent, attached on admission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_percent: Option<f64>,
    /// The candidate signal that was arbitrated, carried for the execution
    /// collaborator (stop/target/hold parameters).
    pub signal: Signal,
    pub created_at: DateTime<Utc>,
}

impl EnsembleDecision {
    /// Create a fresh PENDING decision.
    pub fn pending(
        signal: Signal,
        candidate_action: Action,
        aggregate_confidence: f64,
        contributing_votes: Vec<ModelVote>,
        weight_version: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: signal.symbol.clone(),
            candidate_action,
            aggregate_confidence,
            contributing_votes,
            weight_version,
            status: DecisionStatus::Pending,
            discard_reason: None,
            size_percent: None,
            signal,
            created_at,
        }
    }

    /// Transition to DISCARDED with a reason. Terminal.
    pub fn discard(mut self, reason: DiscardReason) -> Self {
        self.status = DecisionStatus::Discarded;
        self.discard_reason = Some(reason);
        self
    }

    /// Transition to ADMITTED with the recommended allocation.
    pub fn admit(mut self, size_percent: f64) -> Self {
        self.status = DecisionStatus::Admitted;
        self.size_percent = Some(size_percent);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::RiskParams;
    use crate::types::Timeframe;

    fn sample_signal() -> Signal {
        Signal::new(
            "momentum",
            "BTCUSDT",
            Timeframe::H1,
            Action::Buy,
            0.8,
            RiskParams {
                stop_percent: 2.0,
                target_percent: 3.5,
                size_percent: 10.0,
                min_hold_minutes: 60,
                max_hold_minutes: Some(720),
                trailing_stop: false,
                trailing_activation_pct: None,
                trailing_distance_pct: None,
            },
            4.0,
            Utc::now(),
        )
    }

    #[test]
    fn pending_to_admitted_sets_size() {
        let d = EnsembleDecision::pending(sample_signal(), Action::Buy, 0.6, vec![], 1, Utc::now());
        assert_eq!(d.status, DecisionStatus::Pending);
        let d = d.admit(10.0);
        assert_eq!(d.status, DecisionStatus::Admitted);
        assert_eq!(d.size_percent, Some(10.0));
    }

    #[test]
    fn discard_records_reason() {
        let d = EnsembleDecision::pending(sample_signal(), Action::Buy, 0.4, vec![], 1, Utc::now());
        let d = d.discard(DiscardReason::BelowThreshold {
            aggregate: 0.4,
            threshold: 0.5,
        });
        assert_eq!(d.status, DecisionStatus::Discarded);
        assert!(d.discard_reason.unwrap().to_string().contains("0.400"));
    }
}
