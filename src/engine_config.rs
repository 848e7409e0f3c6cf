// =============================================================================
// Engine Configuration — arbitration settings with atomic save
// =============================================================================
//
// Every tunable of the arbitration pipeline lives here. All fields carry a
// serde default EXCEPT `min_confidence`: there is no defensible default for
// the admission threshold, so a config file that omits it fails to load and
// the operator must choose one.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::admission_gate::{SizingBand, SizingCurve};
use crate::producer::ProducerSpec;
use crate::signal::RiskParams;
use crate::types::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_optimization_batch_size() -> u64 {
    100
}

fn default_smoothing_alpha() -> f64 {
    0.3
}

fn default_max_concurrent_positions() -> usize {
    3
}

fn default_per_source_timeout_ms() -> u64 {
    20_000
}

fn default_oracle_timeout_ms() -> u64 {
    45_000
}

fn default_evaluation_interval_secs() -> u64 {
    60
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_initial_weights() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("sentiment".to_string(), 0.20),
        ("technical".to_string(), 0.35),
        ("macro".to_string(), 0.15),
        ("oracle".to_string(), 0.30),
    ])
}

fn default_weights_path() -> String {
    "ensemble_weights.json".to_string()
}

fn default_journal_path() -> String {
    "trade_journal.jsonl".to_string()
}

fn default_producers() -> Vec<ProducerSpec> {
    vec![
        ProducerSpec {
            strategy_id: "scalping".to_string(),
            display_name: "Scalping (Fast Day Trades)".to_string(),
            timeframe: Timeframe::M5,
            poll_interval_secs: 60,
            risk_params: RiskParams {
                stop_percent: 0.8,
                target_percent: 1.2,
                size_percent: 5.0,
                min_hold_minutes: 3,
                max_hold_minutes: Some(120),
                trailing_stop: false,
                trailing_activation_pct: None,
                trailing_distance_pct: None,
            },
            enabled: true,
        },
        ProducerSpec {
            strategy_id: "momentum".to_string(),
            display_name: "Momentum Day Trading".to_string(),
            timeframe: Timeframe::H1,
            poll_interval_secs: 300,
            risk_params: RiskParams {
                stop_percent: 2.0,
                target_percent: 3.5,
                size_percent: 10.0,
                min_hold_minutes: 60,
                max_hold_minutes: Some(720),
                trailing_stop: false,
                trailing_activation_pct: None,
                trailing_distance_pct: None,
            },
            enabled: true,
        },
        ProducerSpec {
            strategy_id: "mean_reversion".to_string(),
            display_name: "Mean Reversion Intraday".to_string(),
            timeframe: Timeframe::H1,
            poll_interval_secs: 300,
            risk_params: RiskParams {
                stop_percent: 2.0,
                target_percent: 3.0,
                size_percent: 8.0,
                min_hold_minutes: 30,
                max_hold_minutes: Some(480),
                trailing_stop: false,
                trailing_activation_pct: None,
                trailing_distance_pct: None,
            },
            enabled: true,
        },
        ProducerSpec {
            strategy_id: "trend_swing".to_string(),
            display_name: "Trend Swing Trading".to_string(),
            timeframe: Timeframe::H4,
            poll_interval_secs: 900,
            risk_params: RiskParams {
                stop_percent: 3.0,
                target_percent: 8.0,
                size_percent: 15.0,
                min_hold_minutes: 240,
                max_hold_minutes: Some(10_080),
                trailing_stop: true,
                trailing_activation_pct: Some(5.0),
                trailing_distance_pct: Some(3.0),
            },
            enabled: true,
        },
    ]
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the arbitration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Admission threshold in [0, 1]. Required: no default.
    pub min_confidence: f64,

    /// Closed trades per recalibration batch.
    #[serde(default = "default_optimization_batch_size")]
    pub optimization_batch_size: u64,

    /// Blend factor α in (0, 1] for weight recalibration.
    #[serde(default = "default_smoothing_alpha")]
    pub smoothing_alpha: f64,

    /// Global cap on concurrently open positions.
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    /// Default per-source scoring timeout in milliseconds.
    #[serde(default = "default_per_source_timeout_ms")]
    pub per_source_timeout_ms: u64,

    /// Timeout for the reasoning oracle, which runs far slower than the
    /// local sources.
    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,

    /// Base cadence of the per-symbol evaluation loop.
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,

    /// Symbols under arbitration.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Starting weights per scoring source, normalized at bootstrap.
    #[serde(default = "default_initial_weights")]
    pub initial_weights: BTreeMap<String, f64>,

    /// Strategy producers and their cadences.
    #[serde(default = "default_producers")]
    pub producers: Vec<ProducerSpec>,

    /// Optional explicit strategy ranking for conflict resolution, highest
    /// priority first. Absent, longer timeframe wins and volatility breaks
    /// ties.
    #[serde(default)]
    pub strategy_priority: Option<Vec<String>>,

    /// Confidence → allocation bands. Absent, the built-in curve applies.
    #[serde(default)]
    pub sizing_bands: Option<Vec<SizingBand>>,

    /// Weight-vector file.
    #[serde(default = "default_weights_path")]
    pub weights_path: String,

    /// Append-only outcome journal.
    #[serde(default = "default_journal_path")]
    pub journal_path: String,
}

impl EngineConfig {
    /// Programmatic construction: the threshold is the one field with no
    /// default, everything else starts from the standard values.
    pub fn with_min_confidence(min_confidence: f64) -> Self {
        Self {
            min_confidence,
            optimization_batch_size: default_optimization_batch_size(),
            smoothing_alpha: default_smoothing_alpha(),
            max_concurrent_positions: default_max_concurrent_positions(),
            per_source_timeout_ms: default_per_source_timeout_ms(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
            evaluation_interval_secs: default_evaluation_interval_secs(),
            symbols: default_symbols(),
            initial_weights: default_initial_weights(),
            producers: default_producers(),
            strategy_priority: None,
            sizing_bands: None,
            weights_path: default_weights_path(),
            journal_path: default_journal_path(),
        }
    }

    /// Load configuration from a JSON file at `path` and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        config.validate()?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            min_confidence = config.min_confidence,
            producers = config.producers.len(),
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration using an atomic write (write to
    /// `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!("min_confidence must be in [0, 1], got {}", self.min_confidence);
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            bail!("smoothing_alpha must be in (0, 1], got {}", self.smoothing_alpha);
        }
        if self.optimization_batch_size == 0 {
            bail!("optimization_batch_size must be at least 1");
        }
        if self.max_concurrent_positions == 0 {
            bail!("max_concurrent_positions must be at least 1");
        }
        if self.symbols.is_empty() {
            bail!("at least one symbol is required");
        }
        if self.producers.is_empty() {
            bail!("at least one producer is required");
        }
        if self.initial_weights.is_empty() {
            bail!("initial_weights must name at least one scoring source");
        }
        // The sizing bands must form a valid monotonic curve.
        self.sizing_curve()?;
        Ok(())
    }

    /// Build the sizing curve from configured bands, or the built-in one.
    pub fn sizing_curve(&self) -> Result<SizingCurve> {
        match &self.sizing_bands {
            Some(bands) => SizingCurve::new(bands.clone()),
            None => Ok(SizingCurve::default()),
        }
    }
}
