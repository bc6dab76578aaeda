// src/storage/ledger.rs
use crate::types::{LedgerRecord, Side};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Append-only record of closed trades. Rows are never updated; recent
/// history is read back in descending insertion order.
pub struct TradeLedger {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    price REAL NOT NULL,
    qty REAL NOT NULL,
    pnl REAL NOT NULL,
    timestamp TEXT NOT NULL
)";

impl TradeLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening ledger {}", path.as_ref().display()))?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn append(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        quantity: f64,
        pnl: f64,
    ) -> Result<()> {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO trades (symbol, side, price, qty, pnl, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![symbol, side.as_str(), price, quantity, pnl, timestamp],
        )?;
        Ok(())
    }

    /// Most recent closed trades, newest first.
    pub fn recent_sells(&self, limit: usize) -> Result<Vec<LedgerRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, symbol, side, price, qty, pnl, timestamp
             FROM trades WHERE side = 'SELL'
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let side: String = row.get(2)?;
            Ok(LedgerRecord {
                id: row.get(0)?,
                symbol: row.get(1)?,
                side: if side == "BUY" { Side::Buy } else { Side::Sell },
                price: row.get(3)?,
                quantity: row.get(4)?,
                pnl: row.get(5)?,
                timestamp: row.get(6)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("ledger mutex poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back_in_descending_order() {
        let ledger = TradeLedger::open_in_memory().unwrap();
        ledger
            .append("SOLUSDT", Side::Sell, 142.0, 0.078, 0.31)
            .unwrap();
        ledger
            .append("AVAXUSDT", Side::Sell, 31.5, 0.35, -0.12)
            .unwrap();
        ledger
            .append("NEARUSDT", Side::Sell, 5.2, 2.1, 0.05)
            .unwrap();

        let recent = ledger.recent_sells(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].symbol, "NEARUSDT");
        assert_eq!(recent[1].symbol, "AVAXUSDT");
        assert!(recent[0].id > recent[1].id);
    }

    #[test]
    fn buys_are_excluded_from_sell_history() {
        let ledger = TradeLedger::open_in_memory().unwrap();
        ledger
            .append("SOLUSDT", Side::Buy, 141.0, 0.078, 0.0)
            .unwrap();
        ledger
            .append("SOLUSDT", Side::Sell, 142.0, 0.078, 0.078)
            .unwrap();

        let recent = ledger.recent_sells(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].side, Side::Sell);
    }

    #[test]
    fn fields_round_trip() {
        let ledger = TradeLedger::open_in_memory().unwrap();
        ledger
            .append("SOLUSDT", Side::Sell, 142.55, 0.078, -0.4)
            .unwrap();
        let rec = &ledger.recent_sells(1).unwrap()[0];
        assert_eq!(rec.symbol, "SOLUSDT");
        assert_eq!(rec.price, 142.55);
        assert_eq!(rec.quantity, 0.078);
        assert_eq!(rec.pnl, -0.4);
        assert!(!rec.timestamp.is_empty());
    }
}
