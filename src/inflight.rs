// =============================================================================
// In-flight registry — one live decision per symbol
// =============================================================================
//
// The single mutex makes "check for an existing decision, then reserve the
// slot" one atomic step, which is what the one-live-decision-per-symbol rule
// requires under concurrent evaluation.
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;

pub struct InFlightRegistry {
    /// symbol → decision id currently occupying the slot.
    slots: Mutex<HashMap<String, String>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the symbol's slot for `decision_id`. Fails if another
    /// decision already holds it.
    pub fn try_reserve(&self, symbol: &str, decision_id: &str) -> bool {
        let mut slots = self.slots.lock();
        if slots.contains_key(symbol) {
            return false;
        }
        slots.insert(symbol.to_string(), decision_id.to_string());
        true
    }

    /// Release the slot held by `decision_id`. A mismatched or missing
    /// reservation is a no-op (the slot may already belong to a newer
    /// decision).
    pub fn release(&self, symbol: &str, decision_id: &str) {
        let mut slots = self.slots.lock();
        if slots.get(symbol).map(|id| id.as_str()) == Some(decision_id) {
            slots.remove(symbol);
        }
    }

    pub fn holder(&self, symbol: &str) -> Option<String> {
        self.slots.lock().get(symbol).cloned()
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_reservation_for_same_symbol_fails() {
        let reg = InFlightRegistry::new();
        assert!(reg.try_reserve("BTCUSDT", "d1"));
        assert!(!reg.try_reserve("BTCUSDT", "d2"));
        assert!(reg.try_reserve("ETHUSDT", "d3"));
        assert_eq!(reg.occupied_count(), 2);
    }

    #[test]
    fn release_frees_the_slot_only_for_the_holder() {
        let reg = InFlightRegistry::new();
        assert!(reg.try_reserve("BTCUSDT", "d1"));

        // A stale release from a superseded decision must not evict d1.
        reg.release("BTCUSDT", "d0");
        assert_eq!(reg.holder("BTCUSDT").as_deref(), Some("d1"));

        reg.release("BTCUSDT", "d1");
        assert!(reg.try_reserve("BTCUSDT", "d2"));
    }
}
