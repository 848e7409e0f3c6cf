// =============================================================================
// Outcome Recorder — lifecycle of admitted decisions, open through close
// =============================================================================
//
// `open` is called exactly once per admitted decision and holds the symbol's
// in-flight slot; `close` computes WIN/LOSS from realized PnL, journals the
// outcome, scores every contributing vote, and frees the slot. A trade the
// execution collaborator failed closes as unresolved instead: terminal,
// journaled, but never scored — an execution failure says nothing about
// signal quality.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::decision::{DecisionStatus, EnsembleDecision};
use crate::inflight::InFlightRegistry;
use crate::outcome_store::{ClosedRecord, JournalEntry, OpenedRecord, OutcomeStore, TradeOutcome};
use crate::performance::PerformanceTracker;
use crate::types::OutcomeKind;

pub struct OutcomeRecorder {
    open: Mutex<HashMap<String, EnsembleDecision>>,
    registry: Arc<InFlightRegistry>,
    store: Arc<OutcomeStore>,
    performance: Arc<PerformanceTracker>,
    /// Pinged when a close completes the optimization batch.
    optimize_tx: UnboundedSender<()>,
}

impl OutcomeRecorder {
    pub fn new(
        registry: Arc<InFlightRegistry>,
        store: Arc<OutcomeStore>,
        performance: Arc<PerformanceTracker>,
        optimize_tx: UnboundedSender<()>,
    ) -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
            registry,
            store,
            performance,
            optimize_tx,
        }
    }

    /// Number of decisions currently open (admitted, not yet closed).
    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }

    // -------------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------------

    /// Register an admitted decision as a live trade. The admission gate has
    /// already reserved the symbol's slot for it.
    pub fn open(&self, decision: &EnsembleDecision) -> Result<String> {
        if decision.status != DecisionStatus::Admitted {
            bail!(
                "cannot open decision {} in status {}",
                decision.id,
                decision.status
            );
        }

        let mut open = self.open.lock();
        if open.contains_key(&decision.id) {
            bail!("decision {} is already open", decision.id);
        }

        // The slot must belong to this decision; anything else means the
        // admission path was bypassed.
        if self.registry.holder(&decision.symbol).as_deref() != Some(decision.id.as_str()) {
            bail!(
                "decision {} does not hold the in-flight slot for {}",
                decision.id,
                decision.symbol
            );
        }

        self.store.append(&JournalEntry::Opened(OpenedRecord {
            decision_id: decision.id.clone(),
            symbol: decision.symbol.clone(),
            action: decision.candidate_action,
            aggregate_confidence: decision.aggregate_confidence,
            weight_version: decision.weight_version,
            size_percent: decision.size_percent.unwrap_or(0.0),
            opened_at: Utc::now(),
        }));

        open.insert(decision.id.clone(), decision.clone());
        info!(
            decision_id = %decision.id,
            symbol = %decision.symbol,
            action = %decision.candidate_action,
            "decision opened"
        );
        Ok(decision.id.clone())
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Close a live trade with its realized PnL. Scores every contributing
    /// vote and signals the optimizer when the batch is full.
    pub fn close(&self, decision_id: &str, realized_pnl: f64) -> Result<TradeOutcome> {
        let decision = match self.open.lock().remove(decision_id) {
            Some(d) => d,
            None => bail!("no open decision with id {decision_id}"),
        };

        let outcome_kind = if realized_pnl > 0.0 {
            OutcomeKind::Win
        } else {
            OutcomeKind::Loss
        };

        let outcome = TradeOutcome {
            decision_id: decision.id.clone(),
            symbol: decision.symbol.clone(),
            realized_pnl,
            outcome: outcome_kind,
            closed_at: Utc::now(),
        };

        let sources: Vec<String> = decision
            .contributing_votes
            .iter()
            .filter(|v| !v.is_abstain())
            .map(|v| v.source_id.clone())
            .collect();

        self.store.append(&JournalEntry::Closed(ClosedRecord {
            outcome: outcome.clone(),
            sources,
        }));

        // Free the symbol only once the trade is done; the next candidate
        // for it can now be admitted.
        self.registry.release(&decision.symbol, &decision.id);

        let batch_full = self.performance.record(&decision, outcome_kind);
        if batch_full {
            if self.optimize_tx.send(()).is_err() {
                warn!("optimizer channel closed, recalibration skipped");
            }
        }

        info!(
            decision_id,
            symbol = %outcome.symbol,
            realized_pnl,
            outcome = %outcome.outcome,
            "decision closed"
        );
        Ok(outcome)
    }

    /// Terminate a live trade whose execution failed. Journaled but never
    /// scored.
    pub fn close_unresolved(&self, decision_id: &str, reason: &str) -> Result<()> {
        let decision = match self.open.lock().remove(decision_id) {
            Some(d) => d,
            None => bail!("no open decision with id {decision_id}"),
        };

        self.store.append(&JournalEntry::Unresolved {
            decision_id: decision.id.clone(),
            symbol: decision.symbol.clone(),
            reason: reason.to_string(),
            at: Utc::now(),
        });

        self.registry.release(&decision.symbol, &decision.id);

        warn!(
            decision_id,
            symbol = %decision.symbol,
            reason,
            "decision closed unresolved, excluded from scoring"
        );
        Ok(())
    }
}

impl std::fmt::Debug for OutcomeRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeRecorder")
            .field("open", &self.open_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ModelVote;
    use crate::signal::{RiskParams, Signal};
    use crate::types::{Action, Timeframe};
    use tokio::sync::mpsc;

    fn admitted_decision(symbol: &str, votes: Vec<ModelVote>) -> EnsembleDecision {
        let signal = Signal::new(
            "momentum",
            symbol,
            Timeframe::H1,
            Action::Buy,
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
        );
        EnsembleDecision::pending(signal, Action::Buy, 0.6, votes, 1, Utc::now()).admit(8.0)
    }

    struct Fixture {
        recorder: OutcomeRecorder,
        registry: Arc<InFlightRegistry>,
        performance: Arc<PerformanceTracker>,
        rx: mpsc::UnboundedReceiver<()>,
        _dir: tempfile::TempDir,
    }

    fn fixture(batch_size: u64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = OutcomeStore::open(dir.path().join("journal.jsonl"));
        let registry = Arc::new(InFlightRegistry::new());
        let performance = Arc::new(PerformanceTracker::new(batch_size));
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = OutcomeRecorder::new(
            registry.clone(),
            Arc::new(store),
            performance.clone(),
            tx,
        );
        Fixture {
            recorder,
            registry,
            performance,
            rx,
            _dir: dir,
        }
    }

    #[test]
    fn open_then_close_scores_votes_and_frees_slot() {
        let mut f = fixture(100);
        let d = admitted_decision(
            "BTCUSDT",
            vec![ModelVote::new("oracle", Action::Buy, 0.7, Utc::now())],
        );
        f.registry.try_reserve(&d.symbol, &d.id);

        let id = f.recorder.open(&d).unwrap();
        assert_eq!(f.recorder.open_count(), 1);
        // The slot is held for the whole trade lifetime.
        assert!(!f.registry.try_reserve("BTCUSDT", "other"));

        let outcome = f.recorder.close(&id, 25.0).unwrap();
        assert_eq!(outcome.outcome, OutcomeKind::Win);
        assert_eq!(f.recorder.open_count(), 0);
        assert!(f.registry.try_reserve("BTCUSDT", "next"));

        let windows = f.performance.snapshot();
        assert_eq!(windows["oracle"].agreeing_votes, 1);
        assert!(f.rx.try_recv().is_err());
    }

    #[test]
    fn zero_pnl_counts_as_loss() {
        let f = fixture(100);
        let d = admitted_decision("BTCUSDT", vec![]);
        f.registry.try_reserve(&d.symbol, &d.id);
        f.recorder.open(&d).unwrap();
        let outcome = f.recorder.close(&d.id, 0.0).unwrap();
        assert_eq!(outcome.outcome, OutcomeKind::Loss);
    }

    #[test]
    fn open_rejects_non_admitted_and_duplicates() {
        let f = fixture(100);
        let pending = {
            let mut d = admitted_decision("BTCUSDT", vec![]);
            d.status = DecisionStatus::Pending;
            d
        };
        assert!(f.recorder.open(&pending).is_err());

        let d = admitted_decision("ETHUSDT", vec![]);
        f.registry.try_reserve(&d.symbol, &d.id);
        f.recorder.open(&d).unwrap();
        assert!(f.recorder.open(&d).is_err());
    }

    #[test]
    fn open_requires_the_inflight_slot() {
        let f = fixture(100);
        let d = admitted_decision("BTCUSDT", vec![]);
        // Slot never reserved: the admission path was bypassed.
        assert!(f.recorder.open(&d).is_err());
    }

    #[test]
    fn unresolved_close_skips_scoring() {
        let mut f = fixture(1);
        let d = admitted_decision(
            "BTCUSDT",
            vec![ModelVote::new("oracle", Action::Buy, 0.7, Utc::now())],
        );
        f.registry.try_reserve(&d.symbol, &d.id);
        f.recorder.open(&d).unwrap();

        f.recorder.close_unresolved(&d.id, "order rejected").unwrap();
        assert!(f.performance.snapshot().is_empty());
        // Even with batch_size 1, no optimization is triggered.
        assert!(f.rx.try_recv().is_err());
        assert!(f.registry.try_reserve("BTCUSDT", "next"));
    }

    #[test]
    fn batch_completion_signals_the_optimizer() {
        let mut f = fixture(2);
        for i in 0..2 {
            let d = admitted_decision(
                "BTCUSDT",
                vec![ModelVote::new("oracle", Action::Buy, 0.7, Utc::now())],
            );
            f.registry.try_reserve(&d.symbol, &d.id);
            f.recorder.open(&d).unwrap();
            f.recorder.close(&d.id, if i == 0 { 5.0 } else { -3.0 }).unwrap();
        }
        assert!(f.rx.try_recv().is_ok());
        assert!(f.rx.try_recv().is_err());
    }
}
