// =============================================================================
// Demo wiring — synthetic collaborators so the engine runs without live feeds
// =============================================================================
//
// Everything in this module stands in for an external collaborator: a
// random-walk market feed, rule-of-thumb producers built from the configured
// specs, stub sentiment/macro sources, a canned oracle, and an executor that
// settles each simulated trade after a short hold. None of it is part of the
// arbitration core.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::execution::{AdmittedOrder, ExecutionAck, ExecutionHandle, SimulatedExecutor};
use crate::market_data::{MarketDataFeed, SymbolContext};
use crate::outcome_recorder::OutcomeRecorder;
use crate::producer::{Producer, ProducerSpec};
use crate::scoring::{ModelVote, OracleClient, ScoringSource};
use crate::signal::Signal;
use crate::types::{Action, Timeframe};

// ---------------------------------------------------------------------------
// Synthetic market feed
// ---------------------------------------------------------------------------

/// Random-walk price history per symbol. Each `context` call advances the
/// walk one step and recomputes the derived indicators.
pub struct SyntheticFeed {
    walks: Mutex<HashMap<String, Vec<f64>>>,
    rng: Mutex<StdRng>,
}

impl SyntheticFeed {
    pub fn new(seed: u64) -> Self {
        Self {
            walks: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn advance(&self, symbol: &str) -> Vec<f64> {
        let mut walks = self.walks.lock();
        let closes = walks
            .entry(symbol.to_string())
            .or_insert_with(|| vec![100.0; 60]);

        let step = {
            let mut rng = self.rng.lock();
            rng.gen_range(-0.8..0.85)
        };
        let last = *closes.last().expect("walk is never empty");
        closes.push((last * (1.0 + step / 100.0)).max(0.01));
        if closes.len() > 200 {
            closes.remove(0);
        }
        closes.clone()
    }
}

fn sma(closes: &[f64], period: usize) -> f64 {
    let n = period.min(closes.len());
    closes[closes.len() - n..].iter().sum::<f64>() / n as f64
}

fn rsi_14(closes: &[f64]) -> Option<f64> {
    if closes.len() < 15 {
        return None;
    }
    let window = &closes[closes.len() - 15..];
    let (mut gains, mut losses) = (0.0, 0.0);
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    if losses == 0.0 {
        return Some(100.0);
    }
    let rs = gains / losses;
    Some(100.0 - 100.0 / (1.0 + rs))
}

impl MarketDataFeed for SyntheticFeed {
    fn context(&self, symbol: &str, timeframe: Timeframe) -> Option<SymbolContext> {
        let closes = self.advance(symbol);
        let last_price = *closes.last()?;
        let n = closes.len();

        let change = |back: usize| -> f64 {
            if n > back && closes[n - 1 - back] > 0.0 {
                (last_price - closes[n - 1 - back]) / closes[n - 1 - back] * 100.0
            } else {
                0.0
            }
        };

        let window = &closes[n.saturating_sub(20)..];
        let high = window.iter().cloned().fold(f64::MIN, f64::max);
        let low = window.iter().cloned().fold(f64::MAX, f64::min);
        let volatility_pct = if low > 0.0 { (high - low) / low * 100.0 } else { 0.0 };

        Some(SymbolContext {
            symbol: symbol.to_string(),
            timeframe,
            last_price,
            sma_20: sma(&closes, 20),
            sma_50: sma(&closes, 50),
            rsi_14: rsi_14(&closes),
            price_change_5: change(5),
            price_change_20: change(20),
            volatility_pct,
            recent_closes: closes[n.saturating_sub(10)..].to_vec(),
            captured_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Rule-of-thumb producers
// ---------------------------------------------------------------------------

/// Simple per-style entry rules over the supplied context, one producer per
/// configured spec.
pub struct RuleProducer {
    spec: ProducerSpec,
}

impl RuleProducer {
    pub fn from_spec(spec: ProducerSpec) -> Self {
        Self { spec }
    }

    fn decide(&self, ctx: &SymbolContext) -> Option<(Action, f64)> {
        match self.spec.strategy_id.as_str() {
            "scalping" => match ctx.price_change_5 {
                c if c > 0.6 => Some((Action::Buy, (c / 2.0).min(1.0))),
                c if c < -0.6 => Some((Action::Sell, (-c / 2.0).min(1.0))),
                _ => None,
            },
            "mean_reversion" => {
                let stretch = ctx.price_vs_sma20_pct();
                match stretch {
                    s if s < -2.0 => Some((Action::Buy, (-s / 5.0).min(1.0))),
                    s if s > 2.0 => Some((Action::Sell, (s / 5.0).min(1.0))),
                    _ => None,
                }
            }
            "trend_swing" => {
                if ctx.sma_20 > ctx.sma_50 * 1.01 && ctx.last_price > ctx.sma_20 {
                    Some((Action::Buy, 0.75))
                } else if ctx.sma_20 < ctx.sma_50 * 0.99 && ctx.last_price < ctx.sma_20 {
                    Some((Action::Sell, 0.75))
                } else {
                    None
                }
            }
            // Momentum is also the fallback rule for unrecognized styles.
            _ => match ctx.price_change_20 {
                c if c > 1.5 => Some((Action::Buy, (c / 6.0).min(1.0))),
                c if c < -1.5 => Some((Action::Sell, (-c / 6.0).min(1.0))),
                _ => None,
            },
        }
    }
}

impl Producer for RuleProducer {
    fn spec(&self) -> &ProducerSpec {
        &self.spec
    }

    fn produce(
        &self,
        ctx: &SymbolContext,
        now: DateTime<Utc>,
    ) -> Result<Option<Signal>, EngineError> {
        Ok(self.decide(ctx).map(|(action, confidence)| {
            Signal::new(
                &self.spec.strategy_id,
                &ctx.symbol,
                self.spec.timeframe,
                action,
                confidence,
                self.spec.risk_params.clone(),
                ctx.volatility_pct,
                now,
            )
        }))
    }
}

// ---------------------------------------------------------------------------
// Stub scoring sources
// ---------------------------------------------------------------------------

/// Sentiment stand-in: follows short-term momentum with modest conviction.
pub struct SentimentStub;

#[async_trait]
impl ScoringSource for SentimentStub {
    fn source_id(&self) -> &str {
        "sentiment"
    }

    async fn score(&self, ctx: &SymbolContext) -> Result<ModelVote, EngineError> {
        let (action, confidence) = match ctx.price_change_5 {
            c if c > 0.3 => (Action::Buy, (c / 3.0).clamp(0.2, 0.8)),
            c if c < -0.3 => (Action::Sell, (-c / 3.0).clamp(0.2, 0.8)),
            _ => (Action::Hold, 0.3),
        };
        Ok(ModelVote::new("sentiment", action, confidence, Utc::now()))
    }
}

/// Macro stand-in: slow-moving view from the long average.
pub struct MacroStub;

#[async_trait]
impl ScoringSource for MacroStub {
    fn source_id(&self) -> &str {
        "macro"
    }

    async fn score(&self, ctx: &SymbolContext) -> Result<ModelVote, EngineError> {
        let drift = if ctx.sma_50 > 0.0 {
            (ctx.last_price - ctx.sma_50) / ctx.sma_50 * 100.0
        } else {
            0.0
        };
        let (action, confidence) = match drift {
            d if d > 1.0 => (Action::Buy, (d / 10.0).clamp(0.2, 0.6)),
            d if d < -1.0 => (Action::Sell, (-d / 10.0).clamp(0.2, 0.6)),
            _ => (Action::Hold, 0.4),
        };
        Ok(ModelVote::new("macro", action, confidence, Utc::now()))
    }
}

/// Canned oracle used when no API endpoint is configured: answers in the
/// wire format the real oracle would, after a deliberate delay.
pub struct CannedOracleClient;

#[async_trait]
impl OracleClient for CannedOracleClient {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError> {
        // The oracle is the slow voter; model that here.
        tokio::time::sleep(Duration::from_secs(2)).await;

        let bullish = prompt.contains('+');
        let (action, confidence) = if bullish { ("BUY", 62) } else { ("SELL", 58) };
        Ok(format!(
            "{{\"action\": \"{action}\", \"confidence\": {confidence}, \"reasoning\": \"canned demo reply\"}}"
        ))
    }
}

// ---------------------------------------------------------------------------
// Settling executor
// ---------------------------------------------------------------------------

/// Simulated execution that closes each accepted trade after a short hold
/// with a randomized PnL, driving the full open → close → recalibrate loop.
pub struct SettlingExecutor {
    inner: SimulatedExecutor,
    recorder: Arc<OutcomeRecorder>,
    hold: Duration,
    rng: Mutex<StdRng>,
}

impl SettlingExecutor {
    pub fn new(recorder: Arc<OutcomeRecorder>, hold: Duration, seed: u64) -> Self {
        Self {
            inner: SimulatedExecutor,
            recorder,
            hold,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl ExecutionHandle for SettlingExecutor {
    async fn submit(&self, order: &AdmittedOrder) -> Result<ExecutionAck, EngineError> {
        let ack = self.inner.submit(order).await?;

        let recorder = self.recorder.clone();
        let decision_id = order.decision_id.clone();
        let hold = self.hold;
        let pnl = {
            let mut rng = self.rng.lock();
            rng.gen_range(-order.stop_percent..order.target_percent)
        };

        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            match recorder.close(&decision_id, pnl) {
                Ok(outcome) => info!(
                    decision_id = %decision_id,
                    realized_pnl = outcome.realized_pnl,
                    outcome = %outcome.outcome,
                    "simulated trade settled"
                ),
                Err(e) => warn!(decision_id = %decision_id, error = %e, "settlement failed"),
            }
        });

        Ok(ack)
    }
}
