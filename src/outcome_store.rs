// =============================================================================
// Outcome Store — append-only decision/outcome journal
// =============================================================================
//
// One JSON record per line: opened, closed, or unresolved. The journal is the
// durable history behind the recorder; a failed append is queued in memory
// and retried on the next write, so a slow or broken disk never blocks live
// decisioning. On startup the journal is replayed to surface decisions that
// were opened but never closed.
// =============================================================================

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::types::{Action, OutcomeKind};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Realized result of one admitted decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub decision_id: String,
    pub symbol: String,
    pub realized_pnl: f64,
    pub outcome: OutcomeKind,
    pub closed_at: DateTime<Utc>,
}

/// Journal row for an admitted decision entering the market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenedRecord {
    pub decision_id: String,
    pub symbol: String,
    pub action: Action,
    pub aggregate_confidence: f64,
    pub weight_version: u64,
    pub size_percent: f64,
    pub opened_at: DateTime<Utc>,
}

/// Journal row for a completed trade, carrying the query keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedRecord {
    #[serde(flatten)]
    pub outcome: TradeOutcome,
    /// Non-abstaining sources that voted on this decision.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Opened(OpenedRecord),
    Closed(ClosedRecord),
    /// Execution failed or the process restarted mid-trade; terminal but
    /// never scored.
    Unresolved {
        decision_id: String,
        symbol: String,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl JournalEntry {
    fn decision_id(&self) -> &str {
        match self {
            Self::Opened(r) => &r.decision_id,
            Self::Closed(r) => &r.outcome.decision_id,
            Self::Unresolved { decision_id, .. } => decision_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct OutcomeStore {
    path: PathBuf,
    /// Serialized lines whose write failed, flushed ahead of the next append.
    retry_queue: Mutex<Vec<String>>,
    /// In-memory index of closed trades for queries.
    closed: RwLock<Vec<ClosedRecord>>,
}

impl OutcomeStore {
    /// Open the journal at `path`, replaying any existing records into the
    /// query index. Returns the store and the opened records that never
    /// reached a terminal row (crash recovery input).
    pub fn open(path: impl AsRef<Path>) -> (Self, Vec<OpenedRecord>) {
        let path = path.as_ref().to_path_buf();
        let mut closed = Vec::new();
        let mut opened: Vec<OpenedRecord> = Vec::new();
        let mut terminal: HashSet<String> = HashSet::new();

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                for (lineno, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JournalEntry>(line) {
                        Ok(JournalEntry::Opened(r)) => opened.push(r),
                        Ok(entry @ JournalEntry::Closed(_)) => {
                            terminal.insert(entry.decision_id().to_string());
                            if let JournalEntry::Closed(r) = entry {
                                closed.push(r);
                            }
                        }
                        Ok(entry @ JournalEntry::Unresolved { .. }) => {
                            terminal.insert(entry.decision_id().to_string());
                        }
                        Err(e) => {
                            warn!(path = %path.display(), lineno, error = %e, "skipping corrupt journal line");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "journal unreadable, starting empty");
            }
        }

        let dangling: Vec<OpenedRecord> = opened
            .into_iter()
            .filter(|r| !terminal.contains(&r.decision_id))
            .collect();

        if !dangling.is_empty() {
            info!(
                count = dangling.len(),
                "journal replay found decisions opened but never closed"
            );
        }

        (
            Self {
                path,
                retry_queue: Mutex::new(Vec::new()),
                closed: RwLock::new(closed),
            },
            dangling,
        )
    }

    /// Append one entry. Write failures are queued and retried with the next
    /// append; the in-memory index is updated either way.
    pub fn append(&self, entry: &JournalEntry) {
        if let JournalEntry::Closed(record) = entry {
            self.closed.write().push(record.clone());
        }

        let line = match serde_json::to_string(entry) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "journal entry not serialisable, dropping");
                return;
            }
        };

        let mut queue = self.retry_queue.lock();
        queue.push(line);
        match self.flush_lines(&queue) {
            Ok(()) => queue.clear(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    queued = queue.len(),
                    error = %EngineError::PersistenceWrite(e.to_string()),
                    "journal append failed, will retry on next write"
                );
            }
        }
    }

    fn flush_lines(&self, lines: &[String]) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.flush()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn outcomes_for_symbol(&self, symbol: &str) -> Vec<TradeOutcome> {
        self.closed
            .read()
            .iter()
            .filter(|r| r.outcome.symbol == symbol)
            .map(|r| r.outcome.clone())
            .collect()
    }

    pub fn outcomes_for_source(&self, source_id: &str) -> Vec<TradeOutcome> {
        self.closed
            .read()
            .iter()
            .filter(|r| r.sources.iter().any(|s| s == source_id))
            .map(|r| r.outcome.clone())
            .collect()
    }

    pub fn outcomes_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<TradeOutcome> {
        self.closed
            .read()
            .iter()
            .filter(|r| r.outcome.closed_at >= from && r.outcome.closed_at <= to)
            .map(|r| r.outcome.clone())
            .collect()
    }

    /// Aggregate win rate and profit factor over the most recent `limit`
    /// closed trades.
    pub fn recent_stats(&self, limit: usize) -> Option<JournalStats> {
        let closed = self.closed.read();
        if closed.is_empty() {
            return None;
        }
        let recent: Vec<&ClosedRecord> = closed.iter().rev().take(limit).collect();

        let total_trades = recent.len();
        let wins = recent
            .iter()
            .filter(|r| r.outcome.outcome == OutcomeKind::Win)
            .count();
        let total_net_pnl: f64 = recent.iter().map(|r| r.outcome.realized_pnl).sum();
        let gross_profit: f64 = recent
            .iter()
            .map(|r| r.outcome.realized_pnl)
            .filter(|&p| p > 0.0)
            .sum();
        let gross_loss: f64 = recent
            .iter()
            .map(|r| r.outcome.realized_pnl)
            .filter(|&p| p < 0.0)
            .map(f64::abs)
            .sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Some(JournalStats {
            total_trades,
            win_rate: wins as f64 / total_trades as f64,
            total_net_pnl,
            profit_factor,
        })
    }
}

/// Aggregate statistics over recent closed trades.
#[derive(Debug, Clone, Serialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_net_pnl: f64,
    pub profit_factor: f64,
}

impl std::fmt::Debug for OutcomeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeStore")
            .field("path", &self.path)
            .field("closed", &self.closed.read().len())
            .field("retry_queue", &self.retry_queue.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn opened(id: &str, symbol: &str) -> JournalEntry {
        JournalEntry::Opened(OpenedRecord {
            decision_id: id.to_string(),
            symbol: symbol.to_string(),
            action: Action::Buy,
            aggregate_confidence: 0.6,
            weight_version: 1,
            size_percent: 8.0,
            opened_at: Utc::now(),
        })
    }

    fn closed(id: &str, symbol: &str, pnl: f64, sources: &[&str]) -> JournalEntry {
        JournalEntry::Closed(ClosedRecord {
            outcome: TradeOutcome {
                decision_id: id.to_string(),
                symbol: symbol.to_string(),
                realized_pnl: pnl,
                outcome: if pnl > 0.0 {
                    OutcomeKind::Win
                } else {
                    OutcomeKind::Loss
                },
                closed_at: Utc::now(),
            },
            sources: sources.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn replay_surfaces_dangling_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        {
            let (store, dangling) = OutcomeStore::open(&path);
            assert!(dangling.is_empty());
            store.append(&opened("d1", "BTCUSDT"));
            store.append(&closed("d1", "BTCUSDT", 12.0, &["oracle"]));
            store.append(&opened("d2", "ETHUSDT"));
        }

        let (_store, dangling) = OutcomeStore::open(&path);
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].decision_id, "d2");
        assert_eq!(dangling[0].symbol, "ETHUSDT");
    }

    #[test]
    fn unresolved_rows_are_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        {
            let (store, _) = OutcomeStore::open(&path);
            store.append(&opened("d1", "BTCUSDT"));
            store.append(&JournalEntry::Unresolved {
                decision_id: "d1".to_string(),
                symbol: "BTCUSDT".to_string(),
                reason: "order rejected".to_string(),
                at: Utc::now(),
            });
        }

        let (store, dangling) = OutcomeStore::open(&path);
        assert!(dangling.is_empty());
        // Unresolved never enters the closed index.
        assert!(store.outcomes_for_symbol("BTCUSDT").is_empty());
    }

    #[test]
    fn queries_by_symbol_source_and_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let (store, _) = OutcomeStore::open(&path);

        store.append(&closed("d1", "BTCUSDT", 10.0, &["oracle", "technical"]));
        store.append(&closed("d2", "ETHUSDT", -5.0, &["technical"]));

        assert_eq!(store.outcomes_for_symbol("BTCUSDT").len(), 1);
        assert_eq!(store.outcomes_for_source("technical").len(), 2);
        assert_eq!(store.outcomes_for_source("oracle").len(), 1);

        let all = store.outcomes_between(
            Utc::now() - chrono::Duration::minutes(5),
            Utc::now() + chrono::Duration::minutes(5),
        );
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn recent_stats_aggregate_wins_and_losses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let (store, _) = OutcomeStore::open(&path);

        store.append(&closed("d1", "BTCUSDT", 10.0, &["oracle"]));
        store.append(&closed("d2", "BTCUSDT", -4.0, &["oracle"]));
        store.append(&closed("d3", "ETHUSDT", 6.0, &["oracle"]));

        let stats = store.recent_stats(50).unwrap();
        assert_eq!(stats.total_trades, 3);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.total_net_pnl - 12.0).abs() < 1e-9);
        assert!((stats.profit_factor - 4.0).abs() < 1e-9);
    }

    #[test]
    fn corrupt_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        std::fs::write(&path, "not json\n").unwrap();

        let (store, dangling) = OutcomeStore::open(&path);
        assert!(dangling.is_empty());
        store.append(&closed("d1", "BTCUSDT", 1.0, &[]));
        assert_eq!(store.outcomes_for_symbol("BTCUSDT").len(), 1);
    }
}
