// =============================================================================
// Central Application State — Quorum Trade Arbiter
// =============================================================================
//
// The single source of truth for the engine. Subsystems hold Arc references
// to their own state; AppState ties them together and provides a unified
// snapshot for logging and inspection.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for the mutable ring buffers.
//   - Arc wrappers for subsystems that manage their own interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::warn;

use crate::decision::EnsembleDecision;
use crate::engine_config::EngineConfig;
use crate::inflight::InFlightRegistry;
use crate::outcome_recorder::OutcomeRecorder;
use crate::outcome_store::{JournalStats, OutcomeStore};
use crate::performance::{PerformanceTracker, SourceWindow};
use crate::weights::WeightStore;

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent decisions to retain.
const MAX_RECENT_DECISIONS: usize = 100;

/// A recorded error event for the inspection log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Central state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, incremented on every
    /// meaningful state mutation.
    pub state_version: AtomicU64,

    pub config: Arc<RwLock<EngineConfig>>,

    // ── Arbitration subsystems ──────────────────────────────────────────
    pub weights: Arc<WeightStore>,
    pub performance: Arc<PerformanceTracker>,
    pub inflight: Arc<InFlightRegistry>,
    pub store: Arc<OutcomeStore>,
    pub recorder: Arc<OutcomeRecorder>,

    // ── Audit trail ─────────────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<EnsembleDecision>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct the full state graph from a validated configuration.
    ///
    /// Returns the state plus the receiver side of the optimizer trigger
    /// channel (the caller spawns the recalibration task with it). Journal
    /// replay happens here: decisions left open by a previous run are
    /// surfaced as unresolved so none is ever silently treated as live.
    pub fn new(config: EngineConfig) -> Result<(Arc<Self>, UnboundedReceiver<()>)> {
        config.validate()?;

        let weights = Arc::new(
            WeightStore::bootstrap(&config.weights_path, &config.initial_weights, Utc::now())
                .context("weight store bootstrap failed")?,
        );

        let (store, dangling) = OutcomeStore::open(&config.journal_path);
        let store = Arc::new(store);

        // Any decision the journal shows as opened-but-never-closed belongs
        // to a previous process. Terminal, never scored.
        for record in dangling {
            warn!(
                decision_id = %record.decision_id,
                symbol = %record.symbol,
                "recovering decision left open by previous run as unresolved"
            );
            store.append(&crate::outcome_store::JournalEntry::Unresolved {
                decision_id: record.decision_id,
                symbol: record.symbol,
                reason: "process restarted mid-trade".to_string(),
                at: Utc::now(),
            });
        }

        let performance = Arc::new(PerformanceTracker::new(config.optimization_batch_size));
        let inflight = Arc::new(InFlightRegistry::new());

        let (optimize_tx, optimize_rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(OutcomeRecorder::new(
            inflight.clone(),
            store.clone(),
            performance.clone(),
            optimize_tx,
        ));

        let state = Arc::new(Self {
            state_version: AtomicU64::new(1),
            config: Arc::new(RwLock::new(config)),
            weights,
            performance,
            inflight,
            store,
            recorder,
            recent_decisions: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        });

        Ok((state, optimize_rx))
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message. The ring buffer is capped; oldest entries
    /// are evicted when the limit is reached.
    pub fn push_error(&self, msg: String) {
        let record = ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Decision Audit ──────────────────────────────────────────────────

    /// Record a finished decision (admitted or discarded) in the audit ring.
    pub fn push_decision(&self, decision: EnsembleDecision) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(decision);
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }

        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a serialisable snapshot of the engine state for inspection.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let weights = self.weights.snapshot();
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            weight_version: weights.version,
            weights: weights.weights.clone().into_iter().collect(),
            open_positions: self.recorder.open_count(),
            closed_in_batch: self.performance.closed_in_batch(),
            performance: self.performance.snapshot().into_iter().collect(),
            recent_decisions: self.recent_decisions.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
            journal_stats: self.store.recent_stats(500),
        }
    }
}

/// Full engine snapshot for logging and inspection.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub weight_version: u64,
    pub weights: Vec<(String, f64)>,
    pub open_positions: usize,
    pub closed_in_batch: u64,
    pub performance: Vec<(String, SourceWindow)>,
    pub recent_decisions: Vec<EnsembleDecision>,
    pub recent_errors: Vec<ErrorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_stats: Option<JournalStats>,
}
