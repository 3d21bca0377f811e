// =============================================================================
// Warm / cold tiers -- SQLite-backed on-disk bar storage
// =============================================================================
//
// Warm: `(symbol, timeframe, timestamp)` unique primary key, `INSERT OR
// IGNORE` semantics so a re-fetch of already-stored history is a no-op.
//
// Cold: downsampled rows with extra `source_timeframe` / `aggregation_count`
// provenance columns.
// =============================================================================

use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::market_data::Candle;

use super::Timeframe;

pub struct WarmColdStore {
    pool: SqlitePool,
}

impl WarmColdStore {
    /// Connect (creating the database file if needed) and ensure the schema
    /// exists. `path == ":memory:"` opens a private in-memory database, used
    /// by tests.
    pub async fn connect(path: &str) -> Result<Self> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{path}?mode=rwc")
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .with_context(|| format!("failed to open tiered store database at {path}"))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS warm_bars (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (symbol, timeframe, timestamp)
            )",
        )
        .execute(&self.pool)
        .await
        .context("failed to create warm_bars table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_warm_bars_ts ON warm_bars(symbol, timeframe, timestamp)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create warm_bars timestamp index")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cold_bars (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                source_timeframe TEXT NOT NULL,
                aggregation_count INTEGER NOT NULL,
                PRIMARY KEY (symbol, timeframe, timestamp)
            )",
        )
        .execute(&self.pool)
        .await
        .context("failed to create cold_bars table")?;

        Ok(())
    }

    /// `INSERT OR IGNORE` into the warm table.
    pub async fn insert_bar(&self, symbol: &str, tf: Timeframe, bar: &Candle) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO warm_bars
             (symbol, timeframe, timestamp, open, high, low, close, volume)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(symbol)
        .bind(tf.to_string())
        .bind(bar.open_time)
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.volume)
        .execute(&self.pool)
        .await
        .context("failed to insert warm bar")?;
        Ok(())
    }

    /// `INSERT OR IGNORE` into the cold table, idempotent by construction.
    pub async fn insert_cold(
        &self,
        symbol: &str,
        tf: Timeframe,
        src_tf: Timeframe,
        bar: &Candle,
    ) -> Result<()> {
        let ratio = tf.duration_ms() / src_tf.duration_ms();
        sqlx::query(
            "INSERT OR IGNORE INTO cold_bars
             (symbol, timeframe, timestamp, open, high, low, close, volume,
              source_timeframe, aggregation_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(symbol)
        .bind(tf.to_string())
        .bind(bar.open_time)
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.volume)
        .bind(src_tf.to_string())
        .bind(ratio)
        .execute(&self.pool)
        .await
        .context("failed to insert cold bar")?;
        Ok(())
    }

    pub async fn query_newest(&self, symbol: &str, tf: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT timestamp, open, high, low, close, volume FROM warm_bars
             WHERE symbol = ? AND timeframe = ?
             ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(tf.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("failed to query warm bars")?;

        Ok(rows.into_iter().map(row_to_candle).collect())
    }

    pub async fn query_since(&self, symbol: &str, tf: Timeframe, since: i64) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT timestamp, open, high, low, close, volume FROM warm_bars
             WHERE symbol = ? AND timeframe = ? AND timestamp >= ?
             ORDER BY timestamp ASC",
        )
        .bind(symbol)
        .bind(tf.to_string())
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("failed to query warm bars by period")?;

        Ok(rows.into_iter().map(row_to_candle).collect())
    }
}

fn row_to_candle(row: sqlx::sqlite::SqliteRow) -> Candle {
    let open_time: i64 = row.get("timestamp");
    let open: f64 = row.get("open");
    let high: f64 = row.get("high");
    let low: f64 = row.get("low");
    let close: f64 = row.get("close");
    let volume: f64 = row.get("volume");
    Candle {
        open_time,
        close_time: open_time,
        open,
        high,
        low,
        close,
        volume,
        quote_volume: 0.0,
        trades_count: 0,
        taker_buy_volume: 0.0,
        taker_buy_quote_volume: 0.0,
        is_closed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            quote_volume: 0.0,
            trades_count: 0,
            taker_buy_volume: 0.0,
            taker_buy_quote_volume: 0.0,
            is_closed: true,
        }
    }

    #[tokio::test]
    async fn insert_or_ignore_is_idempotent() {
        let store = WarmColdStore::connect(":memory:").await.unwrap();
        store.insert_bar("BTCUSDT", Timeframe::M5, &bar(0, 100.0)).await.unwrap();
        store.insert_bar("BTCUSDT", Timeframe::M5, &bar(0, 999.0)).await.unwrap();
        let rows = store.query_newest("BTCUSDT", Timeframe::M5, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        // First write wins under INSERT OR IGNORE.
        assert_eq!(rows[0].close, 100.0);
    }

    #[tokio::test]
    async fn query_since_filters_by_timestamp() {
        let store = WarmColdStore::connect(":memory:").await.unwrap();
        for i in 0..5 {
            store
                .insert_bar("ETHUSDT", Timeframe::M1, &bar(i * 60_000, i as f64))
                .await
                .unwrap();
        }
        let rows = store.query_since("ETHUSDT", Timeframe::M1, 2 * 60_000).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].open_time, 2 * 60_000);
    }
}
