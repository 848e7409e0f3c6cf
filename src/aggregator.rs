// =============================================================================
// Signal Aggregator — collects producer signals and resolves conflicts
// =============================================================================
//
// Each producer is polled on its own interval; a producer not due this cycle
// contributes nothing. One cycle forwards at most one directional candidate
// per symbol:
//   - BUY and SELL in the same cycle cancel each other (a directionally
//     incoherent cycle emits no candidate).
//   - Among same-direction signals the priority policy picks the winner:
//     configured strategy rank when present, otherwise longer timeframe,
//     then lower context volatility, then strategy id.
// Losing signals are discarded, never queued.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::market_data::MarketDataFeed;
use crate::producer::Producer;
use crate::signal::Signal;
use crate::types::Action;

// ---------------------------------------------------------------------------
// Conflict policy
// ---------------------------------------------------------------------------

/// Priority policy for simultaneously firing strategies.
#[derive(Debug, Clone, Default)]
pub struct ConflictPolicy {
    /// Explicit strategy ranking, highest priority first. Strategies absent
    /// from the list rank below every listed one.
    pub strategy_rank: Option<Vec<String>>,
}

impl ConflictPolicy {
    fn rank_of(&self, strategy_id: &str) -> usize {
        match &self.strategy_rank {
            Some(rank) => rank
                .iter()
                .position(|s| s == strategy_id)
                .unwrap_or(rank.len()),
            None => 0,
        }
    }

    /// Pick the higher-priority of two same-direction signals.
    fn wins<'a>(&self, a: &'a Signal, b: &'a Signal) -> &'a Signal {
        let (ra, rb) = (self.rank_of(&a.strategy_id), self.rank_of(&b.strategy_id));
        if ra != rb {
            return if ra < rb { a } else { b };
        }
        if a.timeframe != b.timeframe {
            return if a.timeframe > b.timeframe { a } else { b };
        }
        if a.context_volatility_pct != b.context_volatility_pct {
            return if a.context_volatility_pct < b.context_volatility_pct {
                a
            } else {
                b
            };
        }
        // Deterministic final tie-break.
        if a.strategy_id <= b.strategy_id {
            a
        } else {
            b
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

pub struct SignalAggregator {
    producers: Vec<Arc<dyn Producer>>,
    policy: ConflictPolicy,
    /// (symbol, strategy_id) → last successful poll time.
    last_polled: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl SignalAggregator {
    pub fn new(producers: Vec<Arc<dyn Producer>>, policy: ConflictPolicy) -> Self {
        Self {
            producers,
            policy,
            last_polled: Mutex::new(HashMap::new()),
        }
    }

    /// Collect this cycle's signals for `symbol` and reduce them to at most
    /// one directional candidate.
    pub fn collect(
        &self,
        symbol: &str,
        feed: &dyn MarketDataFeed,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        let mut signals: Vec<Signal> = Vec::new();

        for producer in &self.producers {
            let spec = producer.spec();
            if !spec.enabled {
                continue;
            }
            if !self.is_due(symbol, &spec.strategy_id, spec.poll_interval_secs, now) {
                continue;
            }

            let Some(ctx) = feed.context(symbol, spec.timeframe) else {
                debug!(
                    symbol,
                    strategy = %spec.strategy_id,
                    timeframe = %spec.timeframe,
                    "no market context, skipping producer"
                );
                continue;
            };

            match producer.produce(&ctx, now) {
                Ok(Some(signal)) => {
                    info!(
                        symbol,
                        strategy = %signal.strategy_id,
                        timeframe = %signal.timeframe,
                        action = %signal.action,
                        confidence = signal.raw_confidence,
                        "producer signal"
                    );
                    signals.push(signal);
                    self.mark_polled(symbol, &spec.strategy_id, now);
                }
                Ok(None) => {
                    self.mark_polled(symbol, &spec.strategy_id, now);
                }
                Err(e) => {
                    // One failing producer never takes down the cycle; it is
                    // retried on the next pass.
                    warn!(symbol, strategy = %spec.strategy_id, error = %e, "producer failed");
                }
            }
        }

        self.resolve(symbol, signals)
    }

    fn resolve(&self, symbol: &str, signals: Vec<Signal>) -> Option<Signal> {
        let directional: Vec<Signal> = signals
            .into_iter()
            .filter(|s| s.action.is_directional())
            .collect();

        if directional.is_empty() {
            return None;
        }

        let has_buy = directional.iter().any(|s| s.action == Action::Buy);
        let has_sell = directional.iter().any(|s| s.action == Action::Sell);
        if has_buy && has_sell {
            info!(
                symbol,
                count = directional.len(),
                "opposing directional signals cancel, no candidate this cycle"
            );
            return None;
        }

        let winner = directional
            .into_iter()
            .reduce(|best, next| self.policy.wins(&best, &next).clone())?;

        debug!(
            symbol,
            strategy = %winner.strategy_id,
            action = %winner.action,
            "candidate selected"
        );
        Some(winner)
    }

    fn is_due(
        &self,
        symbol: &str,
        strategy_id: &str,
        interval_secs: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let key = (symbol.to_string(), strategy_id.to_string());
        match self.last_polled.lock().get(&key) {
            Some(last) => (now - *last).num_seconds() >= interval_secs as i64,
            None => true,
        }
    }

    fn mark_polled(&self, symbol: &str, strategy_id: &str, now: DateTime<Utc>) {
        self.last_polled
            .lock()
            .insert((symbol.to_string(), strategy_id.to_string()), now);
    }
}
