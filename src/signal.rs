// =============================================================================
// Candidate trade signal emitted by a strategy producer
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Action, Timeframe};

/// Risk parameters a strategy attaches to its signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    /// Stop distance as a percent of entry price.
    pub stop_percent: f64,
    /// Target distance as a percent of entry price.
    pub target_percent: f64,
    /// Base allocation as a percent of available capital.
    pub size_percent: f64,

    /// Minimum holding time before strategy-driven exits apply.
    #[serde(default)]
    pub min_hold_minutes: u64,
    /// Hard exit after this many minutes, if set.
    #[serde(default)]
    pub max_hold_minutes: Option<u64>,

    /// Trailing stop settings, used by swing-style strategies.
    #[serde(default)]
    pub trailing_stop: bool,
    #[serde(default)]
    pub trailing_activation_pct: Option<f64>,
    #[serde(default)]
    pub trailing_distance_pct: Option<f64>,
}

/// A candidate trade detected by one producer on its own timeframe.
///
/// Signals are immutable once created and live only for the evaluation cycle
/// that consumes them; losing signals are discarded, never queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub action: Action,
    /// Producer's own conviction in [0, 1].
    pub raw_confidence: f64,
    pub risk_params: RiskParams,
    /// Context volatility (percent) at generation time, used for conflict
    /// tie-breaking.
    pub context_volatility_pct: f64,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy_id: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        action: Action,
        raw_confidence: f64,
        risk_params: RiskParams,
        context_volatility_pct: f64,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            timeframe,
            action,
            raw_confidence: raw_confidence.clamp(0.0, 1.0),
            risk_params,
            context_volatility_pct,
            generated_at,
        }
    }
}
