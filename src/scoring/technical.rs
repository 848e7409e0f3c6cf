// =============================================================================
// Technical scoring source — maps supplied indicators to a directional vote
// =============================================================================
//
// Reads the pre-computed context only (RSI, moving averages, momentum). The
// mapping mirrors a plain oscillator-plus-trend read: RSI extremes vote
// against the stretch, trend alignment votes with it.
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::EngineError;
use crate::market_data::SymbolContext;
use crate::scoring::{ModelVote, ScoringSource};
use crate::types::Action;

pub struct TechnicalSource {
    source_id: String,
}

impl TechnicalSource {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
        }
    }
}

impl Default for TechnicalSource {
    fn default() -> Self {
        Self::new("technical")
    }
}

#[async_trait]
impl ScoringSource for TechnicalSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn score(&self, ctx: &SymbolContext) -> Result<ModelVote, EngineError> {
        // RSI component: oversold leans BUY, overbought leans SELL.
        let (rsi_dir, rsi_conf) = match ctx.rsi_14 {
            Some(rsi) if rsi < 30.0 => (1.0, ((30.0 - rsi) / 30.0).min(1.0)),
            Some(rsi) if rsi > 70.0 => (-1.0, ((rsi - 70.0) / 30.0).min(1.0)),
            _ => (0.0, 0.0),
        };

        // Trend component: price above both averages with the averages
        // stacked is bullish alignment, the mirror is bearish.
        let bullish = ctx.sma_20 > ctx.sma_50 && ctx.last_price > ctx.sma_20;
        let bearish = ctx.sma_20 < ctx.sma_50 && ctx.last_price < ctx.sma_20;
        let (trend_dir, trend_conf) = if bullish {
            (1.0, 0.7)
        } else if bearish {
            (-1.0, 0.7)
        } else {
            (0.0, 0.0)
        };

        // Momentum component from the 20-candle change.
        let mom_dir = ctx.price_change_20.signum();
        let mom_conf = (ctx.price_change_20.abs() / 5.0).min(1.0) * 0.5;

        let score = rsi_dir * rsi_conf + trend_dir * trend_conf + mom_dir * mom_conf;

        let (action, confidence) = if score > 0.15 {
            (Action::Buy, score.min(1.0))
        } else if score < -0.15 {
            (Action::Sell, (-score).min(1.0))
        } else {
            (Action::Hold, score.abs().min(1.0))
        };

        debug!(
            symbol = %ctx.symbol,
            score,
            action = %action,
            confidence,
            "technical source scored"
        );

        Ok(ModelVote::new(&self.source_id, action, confidence, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;

    fn ctx(last_price: f64, sma_20: f64, sma_50: f64, rsi: Option<f64>, chg20: f64) -> SymbolContext {
        SymbolContext {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::H1,
            last_price,
            sma_20,
            sma_50,
            rsi_14: rsi,
            price_change_5: 0.0,
            price_change_20: chg20,
            volatility_pct: 3.0,
            recent_closes: vec![],
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn aligned_uptrend_votes_buy() {
        let source = TechnicalSource::default();
        let vote = source.score(&ctx(105.0, 102.0, 100.0, Some(55.0), 4.0)).await.unwrap();
        assert_eq!(vote.action, Action::Buy);
        assert!(vote.confidence > 0.5);
    }

    #[tokio::test]
    async fn overbought_against_flat_trend_votes_sell() {
        let source = TechnicalSource::default();
        let vote = source.score(&ctx(100.0, 100.0, 100.0, Some(85.0), 0.0)).await.unwrap();
        assert_eq!(vote.action, Action::Sell);
    }

    #[tokio::test]
    async fn neutral_context_holds() {
        let source = TechnicalSource::default();
        let vote = source.score(&ctx(100.0, 100.0, 100.0, Some(50.0), 0.0)).await.unwrap();
        assert_eq!(vote.action, Action::Hold);
    }
}
