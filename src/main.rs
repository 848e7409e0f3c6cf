// =============================================================================
// Quorum Trade Arbiter — Main Entry Point
// =============================================================================
//
// Wires the arbitration core to its collaborators and runs the evaluation
// and recalibration loops. Without a configured oracle endpoint the engine
// runs fully simulated: synthetic feed, canned oracle, settling executor.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod admission_gate;
mod aggregator;
mod app_state;
mod decision;
mod demo;
mod engine;
mod engine_config;
mod error;
mod execution;
mod inflight;
mod market_data;
mod outcome_recorder;
mod outcome_store;
mod performance;
mod producer;
mod scoring;
mod signal;
mod types;
mod voting_engine;
mod weight_optimizer;
mod weights;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::admission_gate::AdmissionGate;
use crate::aggregator::{ConflictPolicy, SignalAggregator};
use crate::app_state::AppState;
use crate::demo::{MacroStub, SentimentStub};
use crate::engine::EngineCore;
use crate::engine_config::EngineConfig;
use crate::producer::Producer;
use crate::scoring::{
    HttpOracleClient, OracleClient, OracleSource, ScoringSource, TechnicalSource,
};
use crate::voting_engine::VotingEngine;
use crate::weight_optimizer::{run_optimizer_loop, WeightOptimizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Quorum Trade Arbiter — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("QUORUM_CONFIG").unwrap_or_else(|_| "engine_config.json".to_string());
    // The admission threshold has no default; a missing or incomplete
    // config is a startup failure, not a silent fallback.
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("engine config required at {config_path}"))?;

    info!(
        symbols = ?config.symbols,
        min_confidence = config.min_confidence,
        batch_size = config.optimization_batch_size,
        alpha = config.smoothing_alpha,
        "arbitration parameters"
    );

    let per_source_timeout_ms = config.per_source_timeout_ms;
    let oracle_timeout_ms = config.oracle_timeout_ms;
    let producer_specs = config.producers.clone();
    let strategy_priority = config.strategy_priority.clone();
    let sizing_curve = config.sizing_curve()?;

    // ── 2. Build shared state (replays the journal, loads weights) ──────
    let (state, optimize_rx) = AppState::new(config)?;

    // ── 3. Collaborators: market feed, producers, scoring sources ───────
    let feed = Arc::new(demo::SyntheticFeed::new(7));

    let producers: Vec<Arc<dyn Producer>> = producer_specs
        .into_iter()
        .map(|spec| Arc::new(demo::RuleProducer::from_spec(spec)) as Arc<dyn Producer>)
        .collect();

    let oracle_client: Arc<dyn OracleClient> = match (
        std::env::var("ORACLE_API_URL"),
        std::env::var("ORACLE_API_KEY"),
    ) {
        (Ok(url), Ok(key)) => {
            let model = std::env::var("ORACLE_MODEL").unwrap_or_else(|_| "deepseek-chat".into());
            info!(endpoint = %url, model = %model, "using HTTP reasoning oracle");
            Arc::new(HttpOracleClient::new(url, key, model))
        }
        _ => {
            warn!("no oracle endpoint configured, using canned oracle replies");
            Arc::new(demo::CannedOracleClient)
        }
    };

    let sources: Vec<Arc<dyn ScoringSource>> = vec![
        Arc::new(TechnicalSource::default()),
        Arc::new(SentimentStub),
        Arc::new(MacroStub),
        Arc::new(OracleSource::new("oracle", oracle_client, oracle_timeout_ms)),
    ];

    // ── 4. Arbitration pipeline ──────────────────────────────────────────
    let aggregator = SignalAggregator::new(
        producers,
        ConflictPolicy {
            strategy_rank: strategy_priority,
        },
    );
    let voting = VotingEngine::new(sources, per_source_timeout_ms);
    let gate = AdmissionGate::new(state.inflight.clone(), sizing_curve);

    let executor = Arc::new(demo::SettlingExecutor::new(
        state.recorder.clone(),
        Duration::from_secs(90),
        11,
    ));

    let engine = EngineCore::new(state.clone(), aggregator, voting, gate, feed, executor);

    // ── 5. Recalibration task (out-of-band from evaluation) ──────────────
    let optimizer = Arc::new(WeightOptimizer::new(
        state.config.read().smoothing_alpha,
    ));
    tokio::spawn(run_optimizer_loop(
        optimize_rx,
        state.weights.clone(),
        state.performance.clone(),
        optimizer,
    ));

    // ── 6. Evaluation loop ───────────────────────────────────────────────
    tokio::spawn(engine.run());

    // ── 7. Periodic state log ────────────────────────────────────────────
    let log_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let snapshot = log_state.build_snapshot();
            info!(
                weight_version = snapshot.weight_version,
                open_positions = snapshot.open_positions,
                closed_in_batch = snapshot.closed_in_batch,
                decisions_recorded = snapshot.recent_decisions.len(),
                "engine heartbeat"
            );
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    // Flush anything persistence kept in memory; live trades stay in the
    // journal as opened and are recovered as unresolved on the next boot.
    state.weights.retry_save();
    let open = state.recorder.open_count();
    if open > 0 {
        warn!(open, "decisions still open at shutdown, journal will recover them");
    }

    info!("Quorum Trade Arbiter shut down complete.");
    Ok(())
}
