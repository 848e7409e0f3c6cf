// =============================================================================
// Performance windows — rolling per-source accuracy since last optimization
// =============================================================================
//
// A single writer (the outcome recorder, on close) and a single consumer
// (the optimizer, which reads destructively). The counter update and the
// batch-trigger check share one mutex, so the trigger can neither fire twice
// for one batch nor miss a close.
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::decision::EnsembleDecision;
use crate::types::OutcomeKind;

/// Rolling counters for one source.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SourceWindow {
    pub agreeing_votes: u64,
    pub total_votes: u64,
}

impl SourceWindow {
    pub fn accuracy(&self) -> Option<f64> {
        if self.total_votes == 0 {
            None
        } else {
            Some(self.agreeing_votes as f64 / self.total_votes as f64)
        }
    }
}

struct Inner {
    windows: HashMap<String, SourceWindow>,
    /// Closed trades recorded since the last optimization.
    closed_in_batch: u64,
    /// Latched once the batch size is reached, cleared on reset, so the
    /// optimizer is signalled exactly once per batch.
    trigger_sent: bool,
}

pub struct PerformanceTracker {
    inner: Mutex<Inner>,
    batch_size: u64,
}

impl PerformanceTracker {
    pub fn new(batch_size: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                windows: HashMap::new(),
                closed_in_batch: 0,
                trigger_sent: false,
            }),
            batch_size,
        }
    }

    /// Score every contributing vote of a closed decision against the
    /// realized outcome. A source is correct when its directional stance
    /// matched the result: voted with the candidate and the trade won, or
    /// voted against it and the trade lost. Abstains never count.
    ///
    /// Returns `true` when this close completes the optimization batch.
    pub fn record(&self, decision: &EnsembleDecision, outcome: OutcomeKind) -> bool {
        let mut inner = self.inner.lock();

        for vote in &decision.contributing_votes {
            if vote.is_abstain() {
                continue;
            }
            let window = inner.windows.entry(vote.source_id.clone()).or_default();
            window.total_votes += 1;

            let agreed_with_candidate = vote.action == decision.candidate_action;
            let correct = match outcome {
                OutcomeKind::Win => agreed_with_candidate,
                OutcomeKind::Loss => !agreed_with_candidate,
            };
            if correct {
                window.agreeing_votes += 1;
            }
        }

        inner.closed_in_batch += 1;
        if inner.closed_in_batch >= self.batch_size && !inner.trigger_sent {
            inner.trigger_sent = true;
            return true;
        }
        false
    }

    /// Hand the accumulated windows to the optimizer and start a fresh
    /// batch. Closes that land after this call count toward the next batch.
    pub fn take_windows(&self) -> HashMap<String, SourceWindow> {
        let mut inner = self.inner.lock();
        inner.closed_in_batch = 0;
        inner.trigger_sent = false;
        std::mem::take(&mut inner.windows)
    }

    /// Non-destructive view for observability.
    pub fn snapshot(&self) -> HashMap<String, SourceWindow> {
        self.inner.lock().windows.clone()
    }

    pub fn closed_in_batch(&self) -> u64 {
        self.inner.lock().closed_in_batch
    }
}

impl std::fmt::Debug for PerformanceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PerformanceTracker")
            .field("sources", &inner.windows.len())
            .field("closed_in_batch", &inner.closed_in_batch)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
