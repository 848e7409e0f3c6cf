// =============================================================================
// Engine Core — per-symbol evaluation cycles
// =============================================================================
//
// One cycle: collect a candidate from the producers, gather votes under
// per-source timeouts, aggregate against the current weight snapshot, run the
// admission gate, and hand admitted decisions to the execution collaborator.
//
// Distinct symbols evaluate concurrently; within a symbol the slow phase
// (vote gathering, dominated by the reasoning oracle) runs as an abortable
// task. A newer candidate for the same symbol supersedes a still-gathering
// evaluation: the stale task is aborted and its eventual result is never
// applied. A generation counter closes the remaining race between abort and
// commit.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::admission_gate::AdmissionGate;
use crate::aggregator::SignalAggregator;
use crate::app_state::AppState;
use crate::decision::DecisionStatus;
use crate::execution::{AdmittedOrder, ExecutionHandle};
use crate::market_data::MarketDataFeed;
use crate::signal::Signal;
use crate::voting_engine::VotingEngine;

struct EvalSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

pub struct EngineCore {
    state: Arc<AppState>,
    aggregator: SignalAggregator,
    voting: VotingEngine,
    gate: AdmissionGate,
    feed: Arc<dyn MarketDataFeed>,
    executor: Arc<dyn ExecutionHandle>,
    /// symbol → in-progress evaluation, for supersession.
    evals: Mutex<HashMap<String, EvalSlot>>,
}

impl EngineCore {
    pub fn new(
        state: Arc<AppState>,
        aggregator: SignalAggregator,
        voting: VotingEngine,
        gate: AdmissionGate,
        feed: Arc<dyn MarketDataFeed>,
        executor: Arc<dyn ExecutionHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            aggregator,
            voting,
            gate,
            feed,
            executor,
            evals: Mutex::new(HashMap::new()),
        })
    }

    /// Run one evaluation pass for `symbol`. Cheap when no producer is due;
    /// when a candidate emerges the slow scoring phase is spawned off so
    /// other symbols never wait on it.
    pub fn evaluate_symbol(self: &Arc<Self>, symbol: &str) {
        let now = Utc::now();
        let Some(candidate) = self.aggregator.collect(symbol, self.feed.as_ref(), now) else {
            return;
        };

        // Supersede any evaluation still gathering votes for this symbol.
        let my_generation = {
            let mut evals = self.evals.lock();
            let slot = evals.entry(symbol.to_string()).or_insert(EvalSlot {
                generation: 0,
                handle: None,
            });
            if let Some(handle) = slot.handle.take() {
                if !handle.is_finished() {
                    info!(
                        symbol,
                        generation = slot.generation,
                        "newer candidate supersedes in-flight evaluation"
                    );
                    handle.abort();
                }
            }
            slot.generation += 1;
            slot.generation
        };

        let engine = self.clone();
        let symbol_owned = symbol.to_string();
        let handle = tokio::spawn(async move {
            engine
                .score_and_admit(&symbol_owned, candidate, my_generation)
                .await;
        });

        let mut evals = self.evals.lock();
        if let Some(slot) = evals.get_mut(symbol) {
            if slot.generation == my_generation {
                slot.handle = Some(handle);
            } else {
                // A newer candidate arrived while we were spawning.
                handle.abort();
            }
        }
    }

    async fn score_and_admit(self: &Arc<Self>, symbol: &str, candidate: Signal, generation: u64) {
        let Some(ctx) = self.feed.context(symbol, candidate.timeframe) else {
            debug!(symbol, "context disappeared before scoring, dropping candidate");
            return;
        };

        // The slow phase: every source votes concurrently, the oracle under
        // its own generous timeout. Abort lands here when superseded.
        let votes = self.voting.gather_votes(&ctx).await;

        // The weight snapshot is pinned for the life of this decision.
        let weights = self.state.weights.snapshot();
        let decision = self.voting.evaluate(candidate, votes, &weights);

        // Commit only if no newer candidate took over while we gathered.
        {
            let evals = self.evals.lock();
            if evals.get(symbol).map(|s| s.generation) != Some(generation) {
                debug!(symbol, generation, "stale evaluation result discarded");
                return;
            }
        }

        let (min_confidence, max_positions) = {
            let cfg = self.state.config.read();
            (cfg.min_confidence, cfg.max_concurrent_positions)
        };

        let decision = self.gate.admit(
            decision,
            self.state.recorder.open_count(),
            min_confidence,
            max_positions,
        );
        self.state.push_decision(decision.clone());

        if decision.status != DecisionStatus::Admitted {
            return;
        }

        if let Err(e) = self.state.recorder.open(&decision) {
            warn!(symbol, error = %e, "failed to open admitted decision");
            self.state.push_error(e.to_string());
            self.state.inflight.release(&decision.symbol, &decision.id);
            return;
        }

        let order = AdmittedOrder::from_decision(&decision);
        match self.executor.submit(&order).await {
            Ok(ack) => {
                info!(
                    symbol,
                    decision_id = %decision.id,
                    order_ref = %ack.order_ref,
                    "order handed to execution"
                );
            }
            Err(e) => {
                // Execution failure is not a signal-quality failure: the
                // decision terminates unresolved and is never scored.
                self.state.push_error(e.to_string());
                if let Err(close_err) = self
                    .state
                    .recorder
                    .close_unresolved(&decision.id, &e.to_string())
                {
                    warn!(symbol, error = %close_err, "failed to mark decision unresolved");
                }
            }
        }
    }

    /// The main arbitration loop: tick every configured interval, evaluate
    /// all symbols. Producer cadence is enforced inside the aggregator, so a
    /// fast tick stays cheap.
    pub async fn run(self: Arc<Self>) {
        let interval_secs = self.state.config.read().evaluation_interval_secs;
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        info!(interval_secs, "evaluation loop starting");

        loop {
            interval.tick().await;
            let symbols = self.state.config.read().symbols.clone();
            for symbol in &symbols {
                self.evaluate_symbol(symbol);
            }
        }
    }
}

impl std::fmt::Debug for EngineCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCore")
            .field("in_progress", &self.evals.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission_gate::SizingCurve;
    use crate::aggregator::ConflictPolicy;
    use crate::engine_config::EngineConfig;
    use crate::error::EngineError;
    use crate::execution::{ExecutionAck, SimulatedExecutor};
    use crate::market_data::SymbolContext;
    use crate::producer::{Producer, ProducerSpec};
    use crate::scoring::{ModelVote, ScoringSource};
    use crate::signal::RiskParams;
    use crate::types::{Action, Timeframe};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::time::Duration;

    struct AlwaysBuyProducer {
        spec: ProducerSpec,
    }

    impl AlwaysBuyProducer {
        fn new() -> Self {
            Self {
                spec: ProducerSpec {
                    strategy_id: "momentum".to_string(),
                    display_name: "Momentum".to_string(),
                    timeframe: Timeframe::H1,
                    // Always due, so every evaluation pass yields a candidate.
                    poll_interval_secs: 0,
                    risk_params: RiskParams {
                        stop_percent: 2.0,
                        target_percent: 3.5,
                        size_percent: 10.0,
                        min_hold_minutes: 60,
                        max_hold_minutes: None,
                        trailing_stop: false,
                        trailing_activation_pct: None,
                        trailing_distance_pct: None,
                    },
                    enabled: true,
                },
            }
        }
    }

    impl Producer for AlwaysBuyProducer {
        fn spec(&self) -> &ProducerSpec {
            &self.spec
        }

        fn produce(
            &self,
            ctx: &SymbolContext,
            now: DateTime<Utc>,
        ) -> Result<Option<Signal>, EngineError> {
            Ok(Some(Signal::new(
                &self.spec.strategy_id,
                &ctx.symbol,
                self.spec.timeframe,
                Action::Buy,
                0.8,
                self.spec.risk_params.clone(),
                ctx.volatility_pct,
                now,
            )))
        }
    }

    struct StubFeed;

    impl MarketDataFeed for StubFeed {
        fn context(&self, symbol: &str, timeframe: Timeframe) -> Option<SymbolContext> {
            Some(SymbolContext {
                symbol: symbol.to_string(),
                timeframe,
                last_price: 100.0,
                sma_20: 99.0,
                sma_50: 98.0,
                rsi_14: Some(50.0),
                price_change_5: 0.5,
                price_change_20: 2.0,
                volatility_pct: 4.0,
                recent_closes: vec![98.0, 99.0, 100.0],
                captured_at: Utc::now(),
            })
        }
    }

    struct FixedVoteSource {
        id: String,
        delay: Duration,
    }

    #[async_trait]
    impl ScoringSource for FixedVoteSource {
        fn source_id(&self) -> &str {
            &self.id
        }

        async fn score(&self, _ctx: &SymbolContext) -> Result<ModelVote, EngineError> {
            tokio::time::sleep(self.delay).await;
            Ok(ModelVote::new(&self.id, Action::Buy, 0.9, Utc::now()))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ExecutionHandle for FailingExecutor {
        async fn submit(&self, order: &AdmittedOrder) -> Result<ExecutionAck, EngineError> {
            Err(EngineError::Execution {
                decision_id: order.decision_id.clone(),
                reason: "exchange rejected order".into(),
            })
        }
    }

    fn build_engine(
        dir: &std::path::Path,
        source_delay: Duration,
        executor: Arc<dyn ExecutionHandle>,
    ) -> (Arc<EngineCore>, Arc<AppState>) {
        let mut cfg = EngineConfig::with_min_confidence(0.5);
        cfg.weights_path = dir.join("weights.json").to_string_lossy().into_owned();
        cfg.journal_path = dir.join("journal.jsonl").to_string_lossy().into_owned();
        cfg.symbols = vec!["BTCUSDT".to_string()];
        // The test ensemble has a single source; give it the whole vector.
        cfg.initial_weights =
            std::collections::BTreeMap::from([("technical".to_string(), 1.0)]);

        let (state, _optimize_rx) = AppState::new(cfg).unwrap();

        let aggregator = SignalAggregator::new(
            vec![Arc::new(AlwaysBuyProducer::new())],
            ConflictPolicy::default(),
        );
        let voting = VotingEngine::new(
            vec![Arc::new(FixedVoteSource {
                id: "technical".to_string(),
                delay: source_delay,
            })],
            5_000,
        );
        let gate = AdmissionGate::new(state.inflight.clone(), SizingCurve::default());

        let engine = EngineCore::new(
            state.clone(),
            aggregator,
            voting,
            gate,
            Arc::new(StubFeed),
            executor,
        );
        (engine, state)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_live_decision_per_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, state) =
            build_engine(dir.path(), Duration::ZERO, Arc::new(SimulatedExecutor));

        engine.evaluate_symbol("BTCUSDT");
        wait_until(|| state.recorder.open_count() == 1).await;

        // A second candidate while the trade is live must be discarded.
        engine.evaluate_symbol("BTCUSDT");
        wait_until(|| state.recent_decisions.read().len() == 2).await;

        assert_eq!(state.recorder.open_count(), 1);
        let decisions = state.recent_decisions.read();
        assert_eq!(decisions[0].status, DecisionStatus::Admitted);
        assert_eq!(decisions[1].status, DecisionStatus::Discarded);

        // Closing the trade frees the symbol for the next candidate.
        let open_id = decisions[0].id.clone();
        drop(decisions);
        state.recorder.close(&open_id, 10.0).unwrap();

        engine.evaluate_symbol("BTCUSDT");
        wait_until(|| state.recorder.open_count() == 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn newer_candidate_supersedes_slow_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        // Source slow enough that the second candidate lands mid-gather.
        let (engine, state) = build_engine(
            dir.path(),
            Duration::from_secs(2),
            Arc::new(SimulatedExecutor),
        );

        engine.evaluate_symbol("BTCUSDT");
        // Let the first evaluation reach its (virtual) sleep.
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.evaluate_symbol("BTCUSDT");

        wait_until(|| state.recorder.open_count() == 1).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        // The superseded evaluation never produced a decision: exactly one
        // was recorded, and exactly one trade is live.
        assert_eq!(state.recent_decisions.read().len(), 1);
        assert_eq!(state.recorder.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn execution_failure_closes_decision_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, state) = build_engine(dir.path(), Duration::ZERO, Arc::new(FailingExecutor));

        engine.evaluate_symbol("BTCUSDT");
        wait_until(|| !state.recent_errors.read().is_empty()).await;

        // The failed trade freed its slot and was never scored.
        assert_eq!(state.recorder.open_count(), 0);
        assert!(state.performance.snapshot().is_empty());
        assert!(state.inflight.holder("BTCUSDT").is_none());
    }
}
