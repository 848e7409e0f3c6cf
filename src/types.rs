// =============================================================================
// Shared types used across the Quorum arbitration engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Directional stance of a signal or vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    /// BUY and SELL are directional; HOLD is not.
    pub fn is_directional(&self) -> bool {
        !matches!(self, Self::Hold)
    }

    /// Whether the two stances point in opposite directions. HOLD opposes
    /// nothing.
    pub fn opposes(&self, other: Action) -> bool {
        matches!(
            (self, other),
            (Self::Buy, Action::Sell) | (Self::Sell, Action::Buy)
        )
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Candle timeframe a producer evaluates on. Ordering follows candle
/// duration, so `H4 > M5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// Candle duration in seconds.
    pub fn duration_secs(&self) -> u64 {
        match self {
            Self::M5 => 300,
            Self::M15 => 900,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
        }
    }
}

impl PartialOrd for Timeframe {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timeframe {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.duration_secs().cmp(&other.duration_secs())
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::M5 => write!(f, "5m"),
            Self::M15 => write!(f, "15m"),
            Self::H1 => write!(f, "1h"),
            Self::H4 => write!(f, "4h"),
            Self::D1 => write!(f, "1d"),
        }
    }
}

/// Realized result of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeKind {
    Win,
    Loss,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Win => write!(f, "WIN"),
            Self::Loss => write!(f, "LOSS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_ordering_follows_duration() {
        assert!(Timeframe::H4 > Timeframe::M5);
        assert!(Timeframe::D1 > Timeframe::H4);
        assert!(Timeframe::M5 < Timeframe::M15);
    }

    #[test]
    fn action_opposition() {
        assert!(Action::Buy.opposes(Action::Sell));
        assert!(Action::Sell.opposes(Action::Buy));
        assert!(!Action::Buy.opposes(Action::Buy));
        assert!(!Action::Hold.opposes(Action::Buy));
        assert!(!Action::Buy.opposes(Action::Hold));
    }

    #[test]
    fn wire_names_roundtrip() {
        assert_eq!(serde_json::to_string(&Action::Buy).unwrap(), "\"BUY\"");
        let tf: Timeframe = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(tf, Timeframe::H4);
        assert_eq!(serde_json::to_string(&Timeframe::M5).unwrap(), "\"5m\"");
    }
}
