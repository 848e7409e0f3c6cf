// =============================================================================
// Weight Optimizer — recalibrates source weights from realized accuracy
// =============================================================================
//
// Runs out-of-band from decision evaluation: the recorder pings a channel
// when an optimization batch completes, and this task drains the performance
// windows, computes the new vector, and publishes it as a fresh version.
//
// Per source with votes in the window:
//   accuracy   = agreeing / total
//   raw target = accuracy / Σ accuracies (over voted sources)
//   blended    = α × raw + (1 − α) × prior
// Sources with no votes keep their prior weight. Everything is renormalized
// to sum to 1 before publishing.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::performance::{PerformanceTracker, SourceWindow};
use crate::weights::{WeightStore, WeightVector};

/// Audit entry for one recalibration.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationRecord {
    pub at: DateTime<Utc>,
    pub trades_analyzed: u64,
    pub old_version: u64,
    pub new_version: u64,
    pub accuracies: BTreeMap<String, f64>,
}

pub struct WeightOptimizer {
    /// Smoothing factor in (0, 1]: how far one batch can move a weight.
    alpha: f64,
    history: Mutex<Vec<OptimizationRecord>>,
}

impl WeightOptimizer {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Compute the next weight vector, or `None` when the window carries no
    /// usable accuracy data (the prior stays in force).
    pub fn optimize(
        &self,
        prior: &WeightVector,
        windows: &HashMap<String, SourceWindow>,
    ) -> Option<WeightVector> {
        let mut accuracies: BTreeMap<String, f64> = BTreeMap::new();
        let mut trades_analyzed = 0u64;

        for (source, window) in windows {
            if !prior.weights.contains_key(source) {
                warn!(source = %source, "votes from unconfigured source ignored");
                continue;
            }
            if let Some(acc) = window.accuracy() {
                trades_analyzed = trades_analyzed.max(window.total_votes);
                accuracies.insert(source.clone(), acc);
            }
        }

        let total_accuracy: f64 = accuracies.values().sum();
        if accuracies.is_empty() || total_accuracy <= 0.0 {
            warn!("no usable accuracy data in this batch, keeping current weights");
            return None;
        }

        // Blend: voted sources move toward their accuracy share, silent
        // sources keep their prior weight.
        let mut blended: BTreeMap<String, f64> = BTreeMap::new();
        for (source, prior_weight) in &prior.weights {
            let weight = match accuracies.get(source) {
                Some(acc) => {
                    let raw = acc / total_accuracy;
                    self.alpha * raw + (1.0 - self.alpha) * prior_weight
                }
                None => *prior_weight,
            };
            blended.insert(source.clone(), weight);
        }

        let total: f64 = blended.values().sum();
        let normalized: BTreeMap<String, f64> = blended
            .into_iter()
            .map(|(k, w)| (k, w / total))
            .collect();

        let next = WeightVector {
            version: prior.version + 1,
            weights: normalized,
            updated_at: Utc::now(),
        };

        for (source, acc) in &accuracies {
            info!(
                source = %source,
                accuracy = acc,
                old_weight = prior.get(source),
                new_weight = next.get(source),
                "source weight recalibrated"
            );
        }

        self.history.lock().push(OptimizationRecord {
            at: next.updated_at,
            trades_analyzed,
            old_version: prior.version,
            new_version: next.version,
            accuracies,
        });

        Some(next)
    }

    pub fn history(&self) -> Vec<OptimizationRecord> {
        self.history.lock().clone()
    }
}

/// Background recalibration task. Never blocks evaluation: it only ever
/// consumes drained windows and publishes whole new vectors.
pub async fn run_optimizer_loop(
    mut trigger_rx: UnboundedReceiver<()>,
    store: Arc<WeightStore>,
    performance: Arc<PerformanceTracker>,
    optimizer: Arc<WeightOptimizer>,
) {
    while trigger_rx.recv().await.is_some() {
        let windows = performance.take_windows();
        let prior = store.snapshot();
        match optimizer.optimize(&prior, &windows) {
            Some(next) => store.publish(next),
            None => store.retry_save(),
        }
    }
    info!("optimizer channel closed, recalibration task exiting");
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::WEIGHT_SUM_EPSILON;

    fn prior(entries: &[(&str, f64)]) -> WeightVector {
        let map: BTreeMap<String, f64> =
            entries.iter().map(|(k, w)| (k.to_string(), *w)).collect();
        WeightVector::initial(&map, Utc::now()).unwrap()
    }

    fn window(agreeing: u64, total: u64) -> SourceWindow {
        SourceWindow {
            agreeing_votes: agreeing,
            total_votes: total,
        }
    }

    #[test]
    fn accuracy_shift_is_blended_then_renormalized() {
        // oracle 75% accurate, technical 60% over a 100-trade batch,
        // α = 0.30, prior {oracle 0.30, technical 0.35, sentiment 0.20,
        // macro 0.15}. Raw targets among the two voted sources are
        // 0.5556 / 0.4444; blended oracle = 0.3×0.5556 + 0.7×0.30 ≈ 0.3767
        // before the final renormalization across all four.
        let optimizer = WeightOptimizer::new(0.30);
        let p = prior(&[
            ("oracle", 0.30),
            ("technical", 0.35),
            ("sentiment", 0.20),
            ("macro", 0.15),
        ]);
        let windows = HashMap::from([
            ("oracle".to_string(), window(75, 100)),
            ("technical".to_string(), window(60, 100)),
        ]);

        let next = optimizer.optimize(&p, &windows).unwrap();
        assert_eq!(next.version, 2);
        next.validate().unwrap();

        // Hand-computed: blended = {0.376667, 0.378333, 0.20, 0.15},
        // total 1.105.
        assert!((next.get("oracle") - 0.376667 / 1.105).abs() < 1e-4);
        assert!((next.get("technical") - 0.378333 / 1.105).abs() < 1e-4);
        assert!((next.get("sentiment") - 0.20 / 1.105).abs() < 1e-4);
        assert!((next.get("macro") - 0.15 / 1.105).abs() < 1e-4);
    }

    #[test]
    fn weights_sum_to_one_after_every_optimization() {
        let optimizer = WeightOptimizer::new(0.5);
        let mut current = prior(&[("a", 0.25), ("b", 0.25), ("c", 0.5)]);

        for round in 0..10u64 {
            let windows = HashMap::from([
                ("a".to_string(), window(round + 1, 10)),
                ("b".to_string(), window(10 - round.min(9), 10)),
                ("c".to_string(), window(5, 10)),
            ]);
            current = optimizer.optimize(&current, &windows).unwrap();
            let total: f64 = current.weights.values().sum();
            assert!((total - 1.0).abs() <= WEIGHT_SUM_EPSILON);
        }
        assert_eq!(current.version, 11);
    }

    #[test]
    fn silent_sources_keep_prior_weight_before_renormalization() {
        let optimizer = WeightOptimizer::new(1.0);
        let p = prior(&[("a", 0.5), ("b", 0.3), ("c", 0.2)]);
        let windows = HashMap::from([("a".to_string(), window(8, 10))]);

        let next = optimizer.optimize(&p, &windows).unwrap();
        // With α = 1 the only voted source jumps to raw target 1.0; b and c
        // hold 0.3 / 0.2 pre-normalization, so the ratio b:c survives.
        let ratio = next.get("b") / next.get("c");
        assert!((ratio - 1.5).abs() < 1e-9);
        next.validate().unwrap();
    }

    #[test]
    fn empty_window_keeps_the_prior_vector() {
        let optimizer = WeightOptimizer::new(0.3);
        let p = prior(&[("a", 0.6), ("b", 0.4)]);
        assert!(optimizer.optimize(&p, &HashMap::new()).is_none());
    }

    #[test]
    fn unconfigured_sources_are_ignored() {
        let optimizer = WeightOptimizer::new(0.3);
        let p = prior(&[("a", 0.6), ("b", 0.4)]);
        let windows = HashMap::from([
            ("a".to_string(), window(5, 10)),
            ("rogue".to_string(), window(10, 10)),
        ]);
        let next = optimizer.optimize(&p, &windows).unwrap();
        assert_eq!(next.get("rogue"), 0.0);
        next.validate().unwrap();
    }

    #[test]
    fn history_records_each_recalibration() {
        let optimizer = WeightOptimizer::new(0.3);
        let p = prior(&[("a", 0.5), ("b", 0.5)]);
        let windows = HashMap::from([("a".to_string(), window(7, 10))]);
        let next = optimizer.optimize(&p, &windows).unwrap();
        let _ = next;

        let history = optimizer.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_version, 1);
        assert_eq!(history[0].new_version, 2);
        assert!((history[0].accuracies["a"] - 0.7).abs() < 1e-9);
    }
}
