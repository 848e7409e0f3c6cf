// =============================================================================
// Weight Vector — versioned, immutable arbitration weights with atomic swap
// =============================================================================
//
// The weight mapping is the one piece of long-lived shared state read by
// every evaluation and written only by the optimizer. Readers clone an `Arc`
// snapshot under a short lock; the optimizer publishes a whole new vector and
// swaps the `Arc`, so a half-updated mapping is never observable and a
// decision in flight keeps the exact vector it started with.
//
// Persistence uses the atomic tmp + rename pattern. A corrupt file on load
// falls back to the configured defaults with a warning; failing that there is
// no safe set of weights and startup must abort.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::EngineError;

/// Tolerance on the sum-to-one invariant.
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// WeightVector
// ---------------------------------------------------------------------------

/// One immutable version of the source weights. Σ weights = 1 ± 1e-6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightVector {
    pub version: u64,
    /// source_id → weight in [0, 1]. BTreeMap keeps the serialized form
    /// stable across save/load.
    pub weights: BTreeMap<String, f64>,
    pub updated_at: DateTime<Utc>,
}

impl WeightVector {
    /// Build version 1 from configured initial weights, normalizing so the
    /// invariant holds even when the configured values do not quite sum to 1.
    pub fn initial(weights: &BTreeMap<String, f64>, now: DateTime<Utc>) -> Result<Self> {
        if weights.is_empty() {
            bail!("initial weight mapping is empty");
        }
        if weights.values().any(|w| *w < 0.0 || !w.is_finite()) {
            bail!("initial weights must be finite and non-negative");
        }
        let total: f64 = weights.values().sum();
        if total <= 0.0 {
            bail!("initial weights sum to zero");
        }

        let normalized = weights
            .iter()
            .map(|(k, w)| (k.clone(), w / total))
            .collect();

        Ok(Self {
            version: 1,
            weights: normalized,
            updated_at: now,
        })
    }

    /// Weight for a source; unknown sources carry no weight.
    pub fn get(&self, source_id: &str) -> f64 {
        self.weights.get(source_id).copied().unwrap_or(0.0)
    }

    /// Check the sum-to-one invariant and per-entry bounds.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.weights.is_empty() {
            return Err(EngineError::WeightVectorCorrupt("empty mapping".into()));
        }
        for (source, w) in &self.weights {
            if !w.is_finite() || *w < 0.0 || *w > 1.0 {
                return Err(EngineError::WeightVectorCorrupt(format!(
                    "weight for {source} out of range: {w}"
                )));
            }
        }
        let total: f64 = self.weights.values().sum();
        if (total - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(EngineError::WeightVectorCorrupt(format!(
                "weights sum to {total}, expected 1"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WeightStore
// ---------------------------------------------------------------------------

/// Owns the current snapshot and its on-disk copy.
pub struct WeightStore {
    current: RwLock<Arc<WeightVector>>,
    path: PathBuf,
    /// Set when the last save failed; the snapshot is retried on the next
    /// write opportunity so live decisioning is never blocked on disk.
    save_pending: Mutex<bool>,
}

impl WeightStore {
    /// Load the persisted vector, or fall back to the configured defaults.
    ///
    /// A corrupt file is a warning, not a crash — unless `defaults` is empty
    /// too, in which case there is no safe choice of arbitration weights and
    /// this returns an error.
    pub fn bootstrap(
        path: impl AsRef<Path>,
        defaults: &BTreeMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let vector = match Self::load(&path) {
            Ok(Some(v)) => {
                info!(
                    path = %path.display(),
                    version = v.version,
                    sources = v.weights.len(),
                    "weight vector loaded"
                );
                v
            }
            Ok(None) => {
                info!(path = %path.display(), "no weight file, starting from configured defaults");
                WeightVector::initial(defaults, now)
                    .context("cannot build initial weight vector from configuration")?
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "weight file corrupt, resetting to configured defaults");
                WeightVector::initial(defaults, now).context(
                    "weight file corrupt and no usable default weights configured",
                )?
            }
        };

        let store = Self {
            current: RwLock::new(Arc::new(vector)),
            path,
            save_pending: Mutex::new(false),
        };
        // Make sure the file exists and matches what we are running with.
        store.save_current();
        Ok(store)
    }

    fn load(path: &Path) -> Result<Option<WeightVector>, EngineError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::WeightVectorCorrupt(e.to_string())),
        };
        let vector: WeightVector = serde_json::from_str(&content)
            .map_err(|e| EngineError::WeightVectorCorrupt(e.to_string()))?;
        vector.validate()?;
        Ok(Some(vector))
    }

    /// Current snapshot. Callers hold the `Arc` for as long as a decision
    /// needs it; a later publish never mutates it.
    pub fn snapshot(&self) -> Arc<WeightVector> {
        self.current.read().clone()
    }

    /// Publish a new version: swap the snapshot, then persist. Readers see
    /// either the fully-old or fully-new vector, never a mix.
    pub fn publish(&self, next: WeightVector) {
        let version = next.version;
        *self.current.write() = Arc::new(next);
        info!(version, "weight vector published");
        self.save_current();
    }

    /// Retry a previously failed save, if any.
    pub fn retry_save(&self) {
        let pending = *self.save_pending.lock();
        if pending {
            self.save_current();
        }
    }

    fn save_current(&self) {
        let snapshot = self.snapshot();
        match self.write_atomic(&snapshot) {
            Ok(()) => {
                *self.save_pending.lock() = false;
            }
            Err(e) => {
                *self.save_pending.lock() = true;
                warn!(
                    path = %self.path.display(),
                    error = %EngineError::PersistenceWrite(e.to_string()),
                    "weight save failed, keeping snapshot in memory for retry"
                );
            }
        }
    }

    fn write_atomic(&self, vector: &WeightVector) -> Result<()> {
        let content =
            serde_json::to_string_pretty(vector).context("failed to serialise weight vector")?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp weights to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename tmp weights to {}", self.path.display()))?;
        Ok(())
    }
}

impl std::fmt::Debug for WeightStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.snapshot();
        f.debug_struct("WeightStore")
            .field("version", &current.version)
            .field("sources", &current.weights.len())
            .finish()
    }
}
