// =============================================================================
// Market data seam — indicator context supplied by an external collaborator
// =============================================================================
//
// The engine never computes indicators. A `MarketDataFeed` implementation
// (exchange adapter, replay file, synthetic feed) hands over a ready-made
// `SymbolContext` per symbol and timeframe; producers and scoring sources
// consume it as-is.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Timeframe;

/// Pre-computed market context for one symbol on one timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolContext {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub last_price: f64,

    /// Simple moving averages over the last 20 / 50 closes.
    pub sma_20: f64,
    pub sma_50: f64,

    /// 14-period RSI, when the feed has enough history to compute it.
    #[serde(default)]
    pub rsi_14: Option<f64>,

    /// Percent change over the last 5 and 20 candles.
    pub price_change_5: f64,
    pub price_change_20: f64,

    /// Range-based volatility over the recent window, as a percent.
    pub volatility_pct: f64,

    /// Most recent closes, oldest first. Capped by the feed.
    #[serde(default)]
    pub recent_closes: Vec<f64>,

    pub captured_at: DateTime<Utc>,
}

impl SymbolContext {
    /// Percent distance of the last price from the 20-period average.
    pub fn price_vs_sma20_pct(&self) -> f64 {
        if self.sma_20 > 0.0 {
            (self.last_price - self.sma_20) / self.sma_20 * 100.0
        } else {
            0.0
        }
    }
}

/// Supplies indicator context for a symbol. Implementations live outside the
/// arbitration core.
pub trait MarketDataFeed: Send + Sync {
    /// Current context for `symbol` on `timeframe`, or `None` when the feed
    /// has insufficient data (the cycle skips the symbol).
    fn context(&self, symbol: &str, timeframe: Timeframe) -> Option<SymbolContext>;
}
