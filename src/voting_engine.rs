// =============================================================================
// Ensemble Voting Engine — weighted confidence aggregation across sources
// =============================================================================
//
// Every configured source votes once per evaluation. Sources run
// concurrently, each under its own timeout; a timeout, error, or malformed
// response becomes an abstain vote (HOLD, 0.0) so the slowest source bounds
// the cycle but can never stall it.
//
// Aggregate confidence for the candidate action:
//   Σ over sources voting the candidate action of weight[source] × confidence
// Disagreement contributes zero, never a negative term. If every source
// abstains the candidate is forced to HOLD and the decision is discarded
// outright.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::decision::{DiscardReason, EnsembleDecision};
use crate::error::EngineError;
use crate::market_data::SymbolContext;
use crate::scoring::{ModelVote, ScoringSource};
use crate::signal::Signal;
use crate::types::Action;
use crate::weights::WeightVector;

pub struct VotingEngine {
    sources: Vec<Arc<dyn ScoringSource>>,
    default_timeout_ms: u64,
}

impl VotingEngine {
    pub fn new(sources: Vec<Arc<dyn ScoringSource>>, default_timeout_ms: u64) -> Self {
        Self {
            sources,
            default_timeout_ms,
        }
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.source_id().to_string())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Vote gathering
    // -------------------------------------------------------------------------

    /// Collect one vote per configured source, concurrently. Never fails:
    /// a source that errors or outruns its timeout abstains.
    pub async fn gather_votes(&self, ctx: &SymbolContext) -> Vec<ModelVote> {
        let futures = self.sources.iter().map(|source| {
            let source = source.clone();
            let timeout_ms = source.timeout_ms().unwrap_or(self.default_timeout_ms);
            async move {
                let id = source.source_id().to_string();
                match tokio::time::timeout(Duration::from_millis(timeout_ms), source.score(ctx))
                    .await
                {
                    Ok(Ok(vote)) => vote,
                    Ok(Err(e)) => {
                        warn!(source = %id, error = %e, "scoring source failed, abstaining");
                        ModelVote::abstain(id, Utc::now())
                    }
                    Err(_) => {
                        let e = EngineError::ScoringTimeout {
                            src: id.clone(),
                            timeout_ms,
                        };
                        warn!(source = %id, error = %e, "scoring source timed out, abstaining");
                        ModelVote::abstain(id, Utc::now())
                    }
                }
            }
        });

        join_all(futures).await
    }

    // -------------------------------------------------------------------------
    // Aggregation
    // -------------------------------------------------------------------------

    /// Score a candidate against the gathered votes under an immutable
    /// weight snapshot. Output is PENDING unless every source abstained.
    pub fn evaluate(
        &self,
        candidate: Signal,
        votes: Vec<ModelVote>,
        weights: &Arc<WeightVector>,
    ) -> EnsembleDecision {
        let all_hold = votes.iter().all(|v| v.action == Action::Hold);

        if all_hold {
            let decision = EnsembleDecision::pending(
                candidate,
                Action::Hold,
                0.0,
                votes,
                weights.version,
                Utc::now(),
            );
            debug!(
                symbol = %decision.symbol,
                "every source held, discarding decision"
            );
            return decision.discard(DiscardReason::AllSourcesAbstained);
        }

        let aggregate: f64 = votes
            .iter()
            .filter(|v| v.action == candidate.action && !v.is_abstain())
            .map(|v| weights.get(&v.source_id) * v.confidence)
            .sum();
        let aggregate = aggregate.clamp(0.0, 1.0);

        debug!(
            symbol = %candidate.symbol,
            action = %candidate.action,
            aggregate,
            weight_version = weights.version,
            "ensemble evaluated"
        );

        let action = candidate.action;
        EnsembleDecision::pending(candidate, action, aggregate, votes, weights.version, Utc::now())
    }
}

impl std::fmt::Debug for VotingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VotingEngine")
            .field("sources", &self.source_ids())
            .field("default_timeout_ms", &self.default_timeout_ms)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionStatus;
    use crate::error::EngineError;
    use crate::signal::RiskParams;
    use crate::types::Timeframe;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    fn candidate(action: Action) -> Signal {
        Signal::new(
            "momentum",
            "BTCUSDT",
            Timeframe::H1,
            action,
            0.8,
            RiskParams {
                stop_percent: 2.0,
                target_percent: 3.5,
                size_percent: 10.0,
                min_hold_minutes: 60,
                max_hold_minutes: None,
                trailing_stop: false,
                trailing_activation_pct: None,
                trailing_distance_pct: None,
            },
            4.0,
            Utc::now(),
        )
    }

    fn weights(entries: &[(&str, f64)]) -> Arc<WeightVector> {
        let map: BTreeMap<String, f64> =
            entries.iter().map(|(k, w)| (k.to_string(), *w)).collect();
        Arc::new(WeightVector::initial(&map, Utc::now()).unwrap())
    }

    fn vote(source: &str, action: Action, confidence: f64) -> ModelVote {
        ModelVote::new(source, action, confidence, Utc::now())
    }

    fn engine() -> VotingEngine {
        VotingEngine::new(vec![], 1_000)
    }

    #[test]
    fn majority_agreement_admits_weighted_sum() {
        // oracle BUY 0.60 w=0.50, technical BUY 0.65 w=0.25,
        // sentiment BUY 0.55 w=0.15, macro HOLD w=0.10
        // aggregate = 0.30 + 0.1625 + 0.0825 + 0 = 0.575
        let w = weights(&[
            ("oracle", 0.50),
            ("technical", 0.25),
            ("sentiment", 0.15),
            ("macro", 0.10),
        ]);
        let votes = vec![
            vote("oracle", Action::Buy, 0.60),
            vote("technical", Action::Buy, 0.65),
            vote("sentiment", Action::Buy, 0.55),
            vote("macro", Action::Hold, 0.50),
        ];
        let d = engine().evaluate(candidate(Action::Buy), votes, &w);
        assert_eq!(d.status, DecisionStatus::Pending);
        assert!((d.aggregate_confidence - 0.575).abs() < 1e-9);
        assert_eq!(d.weight_version, 1);
    }

    #[test]
    fn reweighting_the_dissenter_starves_the_aggregate() {
        // Same votes, macro raised to 0.40 at oracle's cost (0.20):
        // aggregate = 0.12 + 0.1625 + 0.0825 + 0 = 0.365
        let w = weights(&[
            ("oracle", 0.20),
            ("technical", 0.25),
            ("sentiment", 0.15),
            ("macro", 0.40),
        ]);
        let votes = vec![
            vote("oracle", Action::Buy, 0.60),
            vote("technical", Action::Buy, 0.65),
            vote("sentiment", Action::Buy, 0.55),
            vote("macro", Action::Hold, 0.50),
        ];
        let d = engine().evaluate(candidate(Action::Buy), votes, &w);
        assert!((d.aggregate_confidence - 0.365).abs() < 1e-9);
    }

    #[test]
    fn disagreement_contributes_zero_not_negative() {
        let w = weights(&[("oracle", 0.5), ("technical", 0.5)]);
        let votes = vec![
            vote("oracle", Action::Buy, 0.6),
            vote("technical", Action::Sell, 0.9),
        ];
        let d = engine().evaluate(candidate(Action::Buy), votes, &w);
        assert!((d.aggregate_confidence - 0.30).abs() < 1e-9);
        assert!(d.aggregate_confidence >= 0.0);
    }

    #[test]
    fn all_hold_discards_regardless_of_threshold() {
        let w = weights(&[("oracle", 0.5), ("technical", 0.5)]);
        let votes = vec![
            ModelVote::abstain("oracle", Utc::now()),
            vote("technical", Action::Hold, 0.9),
        ];
        let d = engine().evaluate(candidate(Action::Buy), votes, &w);
        assert_eq!(d.status, DecisionStatus::Discarded);
        assert_eq!(d.candidate_action, Action::Hold);
        assert_eq!(d.aggregate_confidence, 0.0);
        assert_eq!(d.discard_reason, Some(DiscardReason::AllSourcesAbstained));
    }

    #[test]
    fn aggregate_stays_in_unit_interval() {
        let w = weights(&[("a", 0.5), ("b", 0.5)]);
        let votes = vec![vote("a", Action::Buy, 1.0), vote("b", Action::Buy, 1.0)];
        let d = engine().evaluate(candidate(Action::Buy), votes, &w);
        assert!(d.aggregate_confidence <= 1.0);
        assert!(d.aggregate_confidence >= 0.0);
    }

    // -------------------------------------------------------------------------
    // Gathering under timeouts
    // -------------------------------------------------------------------------

    struct SlowSource {
        id: String,
        delay: Duration,
        vote_action: Action,
    }

    #[async_trait]
    impl ScoringSource for SlowSource {
        fn source_id(&self) -> &str {
            &self.id
        }

        async fn score(&self, _ctx: &SymbolContext) -> Result<ModelVote, EngineError> {
            tokio::time::sleep(self.delay).await;
            Ok(ModelVote::new(&self.id, self.vote_action, 0.7, Utc::now()))
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl ScoringSource for BrokenSource {
        fn source_id(&self) -> &str {
            "broken"
        }

        async fn score(&self, _ctx: &SymbolContext) -> Result<ModelVote, EngineError> {
            Err(EngineError::ScoringMalformed {
                src: "broken".into(),
                reason: "garbage reply".into(),
            })
        }
    }

    fn ctx() -> SymbolContext {
        SymbolContext {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::H1,
            last_price: 100.0,
            sma_20: 99.0,
            sma_50: 98.0,
            rsi_14: Some(50.0),
            price_change_5: 0.0,
            price_change_20: 0.0,
            volatility_pct: 3.0,
            recent_closes: vec![],
            captured_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_source_abstains_without_stalling_the_rest() {
        let engine = VotingEngine::new(
            vec![
                Arc::new(SlowSource {
                    id: "fast".into(),
                    delay: Duration::from_millis(10),
                    vote_action: Action::Buy,
                }),
                Arc::new(SlowSource {
                    id: "stuck".into(),
                    delay: Duration::from_secs(120),
                    vote_action: Action::Buy,
                }),
            ],
            1_000,
        );

        let start = tokio::time::Instant::now();
        let votes = engine.gather_votes(&ctx()).await;
        let elapsed = start.elapsed();

        assert_eq!(votes.len(), 2);
        let fast = votes.iter().find(|v| v.source_id == "fast").unwrap();
        assert_eq!(fast.action, Action::Buy);
        let stuck = votes.iter().find(|v| v.source_id == "stuck").unwrap();
        assert!(stuck.is_abstain());
        // The cycle is bounded by the timeout, not the stuck source's delay.
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn erroring_source_abstains() {
        let engine = VotingEngine::new(vec![Arc::new(BrokenSource)], 1_000);
        let votes = engine.gather_votes(&ctx()).await;
        assert_eq!(votes.len(), 1);
        assert!(votes[0].is_abstain());
        assert_eq!(votes[0].source_id, "broken");
    }
}
