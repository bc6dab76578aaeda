// src/core/book.rs
use crate::types::{LifecycleState, Position};
use std::collections::HashMap;

/// In-memory positions and cooldowns shared by the per-pair tasks of a tick.
/// All mutation funnels through these accessors while the engine holds its
/// mutex; the lock is never held across an await, so a slot is reserved with
/// a synchronous PendingEntry insert before the order call suspends.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
    /// symbol -> unix expiry. Entries are dropped lazily once observed expired.
    cooldowns: HashMap<String, i64>,
}

impl PositionBook {
    pub fn with_positions(positions: HashMap<String, Position>) -> Self {
        Self {
            positions,
            cooldowns: HashMap::new(),
        }
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.positions.get(symbol).cloned()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    /// PendingEntry and Open both occupy a slot.
    pub fn slots_used(&self) -> usize {
        self.positions.values().filter(|p| p.holds_slot()).count()
    }

    pub fn is_saturated(&self, max_open: usize) -> bool {
        self.slots_used() >= max_open
    }

    /// Reserves a slot by inserting a PendingEntry placeholder. Fails when the
    /// symbol is already held or every slot is taken. Must run under the lock
    /// so two pairs evaluated in the same tick cannot both take the last slot.
    pub fn try_reserve(&mut self, symbol: &str, max_open: usize) -> bool {
        if self.has_position(symbol) || self.is_saturated(max_open) {
            return false;
        }
        self.positions
            .insert(symbol.to_string(), Position::pending(symbol));
        true
    }

    /// Replaces the PendingEntry placeholder with the filled position.
    pub fn confirm_entry(&mut self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }

    /// Frees a reserved slot after a failed buy. Only removes the placeholder;
    /// a confirmed position is left alone.
    pub fn rollback_entry(&mut self, symbol: &str) {
        if let Some(p) = self.positions.get(symbol) {
            if p.state == LifecycleState::PendingEntry {
                self.positions.remove(symbol);
            }
        }
    }

    pub fn secure(&mut self, symbol: &str) -> bool {
        match self.positions.get_mut(symbol) {
            Some(p) => {
                p.secured = true;
                true
            }
            None => false,
        }
    }

    /// Raises the trailing watermark. The watermark is monotonic once armed:
    /// a lower value is ignored.
    pub fn raise_watermark(&mut self, symbol: &str, value: f64) -> bool {
        match self.positions.get_mut(symbol) {
            Some(p) if value > p.high_watermark => {
                p.high_watermark = value;
                true
            }
            _ => false,
        }
    }

    pub fn mark_pending_exit(&mut self, symbol: &str) {
        if let Some(p) = self.positions.get_mut(symbol) {
            p.state = LifecycleState::PendingExit;
        }
    }

    /// Puts a position whose exit order failed back into Open for a retry on
    /// the next cycle.
    pub fn reopen(&mut self, symbol: &str) {
        if let Some(p) = self.positions.get_mut(symbol) {
            p.state = LifecycleState::Open;
        }
    }

    pub fn remove(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    pub fn clear_positions(&mut self) {
        self.positions.clear();
    }

    pub fn held_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .values()
            .filter(|p| p.state == LifecycleState::Open)
            .cloned()
            .collect()
    }

    /// Copy of the whole map, taken under the lock and handed to the store.
    pub fn snapshot(&self) -> HashMap<String, Position> {
        self.positions.clone()
    }

    pub fn schedule_cooldown(&mut self, symbol: &str, until: i64) {
        self.cooldowns.insert(symbol.to_string(), until);
    }

    /// Seconds left on the cooldown, or None when free. An expired entry is
    /// removed on observation.
    pub fn cooldown_remaining(&mut self, symbol: &str, now: i64) -> Option<i64> {
        match self.cooldowns.get(symbol) {
            Some(expiry) if *expiry > now => Some(expiry - now),
            Some(_) => {
                self.cooldowns.remove(symbol);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn open(symbol: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            entry_price: 100.0,
            quantity: Decimal::ONE,
            opened_at: 1_700_000_000,
            high_watermark: 0.0,
            secured: false,
            state: LifecycleState::Open,
        }
    }

    #[test]
    fn slot_count_never_exceeds_limit() {
        let mut book = PositionBook::default();
        assert!(book.try_reserve("SOLUSDT", 2));
        assert!(book.try_reserve("AVAXUSDT", 2));
        assert!(!book.try_reserve("NEARUSDT", 2), "third slot must fail");
        assert_eq!(book.slots_used(), 2);
    }

    #[test]
    fn reserve_rejects_a_symbol_already_held() {
        let mut book = PositionBook::default();
        book.confirm_entry(open("SOLUSDT"));
        assert!(!book.try_reserve("SOLUSDT", 5));
    }

    #[test]
    fn rollback_frees_the_slot() {
        let mut book = PositionBook::default();
        assert!(book.try_reserve("SOLUSDT", 1));
        book.rollback_entry("SOLUSDT");
        assert_eq!(book.slots_used(), 0);
        assert!(book.try_reserve("AVAXUSDT", 1));
    }

    #[test]
    fn rollback_leaves_a_confirmed_position_alone() {
        let mut book = PositionBook::default();
        book.confirm_entry(open("SOLUSDT"));
        book.rollback_entry("SOLUSDT");
        assert!(book.has_position("SOLUSDT"));
    }

    #[test]
    fn pending_exit_still_occupies_no_entry_slot() {
        let mut book = PositionBook::default();
        book.confirm_entry(open("SOLUSDT"));
        book.mark_pending_exit("SOLUSDT");
        // PendingExit is past the entry gate; only PendingEntry/Open count.
        assert_eq!(book.slots_used(), 0);
        assert!(book.has_position("SOLUSDT"));
    }

    #[test]
    fn watermark_is_monotonic() {
        let mut book = PositionBook::default();
        book.confirm_entry(open("SOLUSDT"));
        assert!(book.raise_watermark("SOLUSDT", 110.0));
        assert!(!book.raise_watermark("SOLUSDT", 105.0));
        assert_eq!(book.position("SOLUSDT").unwrap().high_watermark, 110.0);
    }

    #[test]
    fn cooldown_expires_lazily() {
        let mut book = PositionBook::default();
        book.schedule_cooldown("SOLUSDT", 1_000);
        assert_eq!(book.cooldown_remaining("SOLUSDT", 900), Some(100));
        assert_eq!(book.cooldown_remaining("SOLUSDT", 1_001), None);
        // observed expired -> entry is gone
        assert_eq!(book.cooldown_remaining("SOLUSDT", 0), None);
    }
}
