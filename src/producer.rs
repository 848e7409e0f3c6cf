// =============================================================================
// Strategy producer seam — timeframe-specific signal generation
// =============================================================================
//
// Each producer watches one trading style on one timeframe and is polled at
// its own cadence by the aggregator. Producers evaluate against the supplied
// context only; they never fetch data or compute indicators themselves.
// =============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::market_data::SymbolContext;
use crate::signal::{RiskParams, Signal};
use crate::types::Timeframe;

/// Static description of a producer: identity, cadence, and the risk
/// parameters it stamps onto its signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerSpec {
    pub strategy_id: String,
    pub display_name: String,
    pub timeframe: Timeframe,
    /// How often this producer is due for evaluation.
    pub poll_interval_secs: u64,
    pub risk_params: RiskParams,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProducerSpec {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// A strategy producer. `produce` returns at most one signal per poll; a
/// producer whose criteria are not met returns `Ok(None)`.
pub trait Producer: Send + Sync {
    fn spec(&self) -> &ProducerSpec;

    fn produce(
        &self,
        ctx: &SymbolContext,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Signal>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_deserialises_with_enabled_default() {
        let json = r#"{
            "strategy_id": "momentum",
            "display_name": "Momentum Day Trading",
            "timeframe": "1h",
            "poll_interval_secs": 300,
            "risk_params": {
                "stop_percent": 2.0,
                "target_percent": 3.5,
                "size_percent": 10.0,
                "min_hold_minutes": 60
            }
        }"#;
        let spec: ProducerSpec = serde_json::from_str(json).unwrap();
        assert!(spec.enabled);
        assert_eq!(spec.timeframe, Timeframe::H1);
        assert_eq!(spec.poll_interval(), Duration::from_secs(300));
        assert_eq!(spec.risk_params.max_hold_minutes, None);
    }
}
