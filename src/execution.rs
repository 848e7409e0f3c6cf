// =============================================================================
// Execution seam — admitted decisions leave the engine here
// =============================================================================
//
// The arbitration core never places orders. An admitted decision is handed
// to the `ExecutionHandle` collaborator as an `AdmittedOrder`; the
// collaborator reports acceptance or failure, and eventually feeds the
// realized PnL back through the outcome recorder's `close`.
// =============================================================================

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::decision::EnsembleDecision;
use crate::error::EngineError;
use crate::types::Action;

/// Everything the execution collaborator needs from an admitted decision.
#[derive(Debug, Clone, Serialize)]
pub struct AdmittedOrder {
    pub decision_id: String,
    pub symbol: String,
    pub action: Action,
    /// Recommended allocation as a percent of available capital.
    pub size_percent: f64,
    pub stop_percent: f64,
    pub target_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_hold_minutes: Option<u64>,
}

impl AdmittedOrder {
    /// Build the order payload from an admitted decision.
    pub fn from_decision(decision: &EnsembleDecision) -> Self {
        Self {
            decision_id: decision.id.clone(),
            symbol: decision.symbol.clone(),
            action: decision.candidate_action,
            size_percent: decision.size_percent.unwrap_or(0.0),
            stop_percent: decision.signal.risk_params.stop_percent,
            target_percent: decision.signal.risk_params.target_percent,
            max_hold_minutes: decision.signal.risk_params.max_hold_minutes,
        }
    }
}

/// Acknowledgement from the execution collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionAck {
    /// Collaborator-side reference for the placed (or simulated) order.
    pub order_ref: String,
}

#[async_trait]
pub trait ExecutionHandle: Send + Sync {
    async fn submit(&self, order: &AdmittedOrder) -> Result<ExecutionAck, EngineError>;
}

// ---------------------------------------------------------------------------
// Simulated executor
// ---------------------------------------------------------------------------

/// Accepts every order locally without touching an exchange. Used in demo
/// mode and tests.
pub struct SimulatedExecutor;

#[async_trait]
impl ExecutionHandle for SimulatedExecutor {
    async fn submit(&self, order: &AdmittedOrder) -> Result<ExecutionAck, EngineError> {
        let order_ref = Uuid::new_v4().to_string();
        info!(
            decision_id = %order.decision_id,
            symbol = %order.symbol,
            action = %order.action,
            size_percent = order.size_percent,
            order_ref = %order_ref,
            "simulated fill"
        );
        Ok(ExecutionAck { order_ref })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{RiskParams, Signal};
    use crate::types::Timeframe;
    use chrono::Utc;

    #[test]
    fn order_carries_risk_params_from_the_signal() {
        let signal = Signal::new(
            "swing",
            "BTCUSDT",
            Timeframe::H4,
            Action::Sell,
            0.9,
            RiskParams {
                stop_percent: 3.0,
                target_percent: 8.0,
                size_percent: 15.0,
                min_hold_minutes: 240,
                max_hold_minutes: Some(10_080),
                trailing_stop: true,
                trailing_activation_pct: Some(5.0),
                trailing_distance_pct: Some(3.0),
            },
            2.5,
            Utc::now(),
        );
        let decision =
            EnsembleDecision::pending(signal, Action::Sell, 0.7, vec![], 3, Utc::now()).admit(10.0);
        let order = AdmittedOrder::from_decision(&decision);

        assert_eq!(order.symbol, "BTCUSDT");
        assert_eq!(order.action, Action::Sell);
        assert_eq!(order.size_percent, 10.0);
        assert_eq!(order.stop_percent, 3.0);
        assert_eq!(order.target_percent, 8.0);
        assert_eq!(order.max_hold_minutes, Some(10_080));
    }
}
