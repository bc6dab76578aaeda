// src/storage/position_store.rs
use crate::types::Position;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Durable symbol -> Position map. The file is the source of truth on
/// restart: whatever loads is the initial position set, no reconciliation
/// against the exchange.
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the stored map. A missing file is an empty book; a malformed
    /// entry is quarantined with a warning instead of failing the start.
    pub async fn load(&self) -> HashMap<String, Position> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(_) => return HashMap::new(),
        };

        let raw: HashMap<String, serde_json::Value> = match serde_json::from_str(&data) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Position file {} is unreadable: {e}", self.path.display());
                return HashMap::new();
            }
        };

        let mut positions = HashMap::new();
        for (symbol, value) in raw {
            match serde_json::from_value::<Position>(value) {
                Ok(pos) if pos.symbol == symbol => {
                    positions.insert(symbol, pos);
                }
                Ok(pos) => {
                    warn!(
                        "Quarantined position entry: key {symbol} does not match symbol {}",
                        pos.symbol
                    );
                }
                Err(e) => {
                    warn!("Quarantined malformed position entry for {symbol}: {e}");
                }
            }
        }
        if !positions.is_empty() {
            info!("Restored {} position(s) from disk", positions.len());
        }
        positions
    }

    /// Full-map replace after every mutation. Written to a sibling temp file
    /// and renamed into place so a crash mid-write never truncates the state.
    pub async fn save(&self, positions: &HashMap<String, Position>) -> Result<()> {
        let data = serde_json::to_string_pretty(positions)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LifecycleState;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn temp_store() -> PositionStore {
        let path = std::env::temp_dir().join(format!("positions-{}.json", uuid::Uuid::new_v4()));
        PositionStore::new(path)
    }

    fn position(symbol: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            entry_price: 141.27,
            quantity: Decimal::from_str("0.078").unwrap(),
            opened_at: 1_700_000_123,
            high_watermark: 144.9,
            secured: true,
            state: LifecycleState::Open,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let store = temp_store();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn round_trip_preserves_every_field() {
        let store = temp_store();
        let mut map = HashMap::new();
        map.insert("SOLUSDT".to_string(), position("SOLUSDT"));
        map.insert("AVAXUSDT".to_string(), position("AVAXUSDT"));
        store.save(&map).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.len(), 2);
        let p = &loaded["SOLUSDT"];
        assert_eq!(p.entry_price, 141.27);
        assert_eq!(p.quantity, Decimal::from_str("0.078").unwrap());
        assert_eq!(p.opened_at, 1_700_000_123);
        assert_eq!(p.high_watermark, 144.9);
        assert!(p.secured);
        assert_eq!(p.state, LifecycleState::Open);
    }

    #[tokio::test]
    async fn reload_is_idempotent() {
        let store = temp_store();
        let mut map = HashMap::new();
        map.insert("SOLUSDT".to_string(), position("SOLUSDT"));
        store.save(&map).await.unwrap();

        let first = store.load().await;
        store.save(&first).await.unwrap();
        let second = store.load().await;
        assert_eq!(first.len(), second.len());
        assert_eq!(
            first["SOLUSDT"].entry_price,
            second["SOLUSDT"].entry_price
        );
    }

    #[tokio::test]
    async fn malformed_entries_are_quarantined() {
        let store = temp_store();
        let json = r#"{
            "SOLUSDT": {
                "symbol": "SOLUSDT",
                "entry_price": 141.27,
                "quantity": "0.078",
                "opened_at": 1700000123,
                "high_watermark": 0.0,
                "secured": false,
                "state": "Open"
            },
            "AVAXUSDT": { "entry": "not a position" }
        }"#;
        tokio::fs::write(&store.path, json).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("SOLUSDT"));
    }

    #[tokio::test]
    async fn unreadable_file_loads_empty() {
        let store = temp_store();
        tokio::fs::write(&store.path, "{ not json").await.unwrap();
        assert!(store.load().await.is_empty());
    }
}
