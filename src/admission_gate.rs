// =============================================================================
// Confidence Admission Gate — threshold and concurrency checks
// =============================================================================
//
// Converts a scored PENDING decision into ADMITTED or DISCARDED:
//   (a) candidate action must be directional,
//   (b) aggregate confidence must clear the configured minimum,
//   (c) the symbol's in-flight slot must be free (reserved atomically here),
//   (d) open positions must be under the global cap.
// An admitted decision carries a recommended allocation from the sizing
// curve; the gate never places orders. Rejections record a reason and touch
// nothing else.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::decision::{DecisionStatus, DiscardReason, EnsembleDecision};
use crate::inflight::InFlightRegistry;

// ---------------------------------------------------------------------------
// Sizing curve
// ---------------------------------------------------------------------------

/// One step of the confidence → allocation mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingBand {
    /// Inclusive lower confidence bound for this band.
    pub min_confidence: f64,
    /// Recommended allocation as a percent of available capital.
    pub allocation_pct: f64,
}

/// Monotonically increasing step function from aggregate confidence to a
/// recommended allocation percent. The mapping is configuration, not code:
/// bands come from the config file and are validated at load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingCurve {
    bands: Vec<SizingBand>,
}

impl SizingCurve {
    /// Build a curve, sorting bands by confidence and rejecting curves whose
    /// allocation does not increase with confidence.
    pub fn new(mut bands: Vec<SizingBand>) -> anyhow::Result<Self> {
        if bands.is_empty() {
            anyhow::bail!("sizing curve needs at least one band");
        }
        bands.sort_by(|a, b| a.min_confidence.total_cmp(&b.min_confidence));
        for pair in bands.windows(2) {
            if pair[1].allocation_pct < pair[0].allocation_pct {
                anyhow::bail!(
                    "sizing curve must be monotonically increasing: {}% at {} but {}% at {}",
                    pair[0].allocation_pct,
                    pair[0].min_confidence,
                    pair[1].allocation_pct,
                    pair[1].min_confidence
                );
            }
        }
        Ok(Self { bands })
    }

    /// Allocation for the highest band at or below `confidence`; confidence
    /// below every band gets the lowest band's allocation.
    pub fn allocation_pct(&self, confidence: f64) -> f64 {
        self.bands
            .iter()
            .rev()
            .find(|b| confidence >= b.min_confidence)
            .unwrap_or(&self.bands[0])
            .allocation_pct
    }
}

impl Default for SizingCurve {
    fn default() -> Self {
        Self::new(vec![
            SizingBand { min_confidence: 0.50, allocation_pct: 5.0 },
            SizingBand { min_confidence: 0.65, allocation_pct: 8.0 },
            SizingBand { min_confidence: 0.80, allocation_pct: 10.0 },
            SizingBand { min_confidence: 0.90, allocation_pct: 15.0 },
        ])
        .expect("default sizing bands are monotonic")
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct AdmissionGate {
    registry: Arc<InFlightRegistry>,
    sizing: SizingCurve,
}

impl AdmissionGate {
    pub fn new(registry: Arc<InFlightRegistry>, sizing: SizingCurve) -> Self {
        Self { registry, sizing }
    }

    /// Apply the admission checks to a PENDING decision.
    ///
    /// On admission the symbol's in-flight slot is reserved for the decision;
    /// the slot is released when the outcome recorder closes it (or the
    /// execution collaborator fails it). An already-discarded decision passes
    /// through untouched.
    pub fn admit(
        &self,
        decision: EnsembleDecision,
        open_positions: usize,
        min_confidence: f64,
        max_concurrent_positions: usize,
    ) -> EnsembleDecision {
        if decision.status == DecisionStatus::Discarded {
            return decision;
        }

        if !decision.candidate_action.is_directional() {
            return self.reject(decision, DiscardReason::HoldCandidate);
        }

        if decision.aggregate_confidence < min_confidence {
            let reason = DiscardReason::BelowThreshold {
                aggregate: decision.aggregate_confidence,
                threshold: min_confidence,
            };
            return self.reject(decision, reason);
        }

        if open_positions >= max_concurrent_positions {
            let reason = DiscardReason::PositionLimit {
                open: open_positions,
                limit: max_concurrent_positions,
            };
            return self.reject(decision, reason);
        }

        // Check-and-reserve is atomic inside the registry; a concurrent
        // evaluation for the same symbol loses here.
        if !self.registry.try_reserve(&decision.symbol, &decision.id) {
            return self.reject(decision, DiscardReason::SymbolInFlight);
        }

        let size_pct = self.sizing.allocation_pct(decision.aggregate_confidence);
        let decision = decision.admit(size_pct);
        info!(
            symbol = %decision.symbol,
            decision_id = %decision.id,
            action = %decision.candidate_action,
            confidence = decision.aggregate_confidence,
            size_pct,
            "decision admitted"
        );
        decision
    }

    fn reject(&self, decision: EnsembleDecision, reason: DiscardReason) -> EnsembleDecision {
        debug!(
            symbol = %decision.symbol,
            decision_id = %decision.id,
            reason = %reason,
            "decision discarded"
        );
        decision.discard(reason)
    }
}
