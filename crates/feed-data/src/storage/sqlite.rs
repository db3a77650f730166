//! SQLite 저장소 구현.
//!
//! 로컬 개발과 소규모 데이터셋을 위한 단일 파일 저장소입니다.
//! 시간은 밀리초 정수로, 가격/수량은 REAL로 저장합니다
//! (sqlx는 SQLite에 Decimal 코덱을 제공하지 않으므로 경계에서 변환).

use crate::error::{DataError, Result};
use crate::storage::{StorageDriver, StorageInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_core::{
    BookLevel, Candle, DataVersion, DepthSnapshot, FundingRate, Liquidation, LongShortRatio,
    OpenInterest, Side, Symbol, Timeframe,
};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// SQLite 변수 한도 안에서 안전한 청크 크기.
const CHUNK_SIZE: usize = 500;

/// SQLite 설정.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// 데이터베이스 파일 경로. `":memory:"`는 인메모리 DB.
    pub path: String,
    /// 풀 최대 연결 수. 인메모리 DB는 반드시 1이어야 합니다
    /// (연결마다 별도 DB가 생기므로).
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

fn default_pool_size() -> u32 {
    5
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "data/futures_data.db".to_string(),
            max_connections: default_pool_size(),
        }
    }
}

impl SqliteConfig {
    /// 인메모리 DB 설정 (테스트용).
    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            max_connections: 1,
        }
    }
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS ohlcv (
        time INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        open REAL,
        high REAL,
        low REAL,
        close REAL,
        volume REAL,
        close_time INTEGER,
        quote_volume REAL,
        num_trades INTEGER,
        taker_buy_base REAL,
        taker_buy_quote REAL,
        PRIMARY KEY (time, symbol, timeframe)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ohlcv_symbol_time ON ohlcv (symbol, time)",
    r#"
    CREATE TABLE IF NOT EXISTS open_interest (
        time INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        period TEXT NOT NULL,
        open_interest REAL,
        open_interest_value REAL,
        PRIMARY KEY (time, symbol, period)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_oi_symbol_time ON open_interest (symbol, time)",
    r#"
    CREATE TABLE IF NOT EXISTS funding_rate (
        funding_time INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        funding_rate REAL,
        mark_price REAL,
        PRIMARY KEY (funding_time, symbol)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS liquidations (
        time INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        side TEXT,
        price REAL,
        quantity REAL,
        order_id INTEGER UNIQUE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_liq_symbol_time ON liquidations (symbol, time)",
    r#"
    CREATE TABLE IF NOT EXISTS long_short_ratio (
        time INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        period TEXT NOT NULL,
        long_short_ratio REAL,
        long_account REAL,
        short_account REAL,
        PRIMARY KEY (time, symbol, period)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_book (
        time INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        side TEXT NOT NULL,
        level INTEGER NOT NULL,
        price REAL NOT NULL,
        quantity REAL NOT NULL,
        last_update_id INTEGER,
        PRIMARY KEY (time, symbol, side, level)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ob_symbol_time ON order_book (symbol, time)",
    r#"
    CREATE TABLE IF NOT EXISTS data_versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        table_name TEXT NOT NULL,
        symbol TEXT NOT NULL,
        window_start INTEGER NOT NULL,
        window_end INTEGER NOT NULL,
        record_count INTEGER NOT NULL,
        checksum TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
];

fn to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn dec_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn f64_to_dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

fn opt_dec_to_f64(value: Option<Decimal>) -> Option<f64> {
    value.map(dec_to_f64)
}

fn opt_f64_to_dec(value: Option<f64>) -> Option<Decimal> {
    value.map(f64_to_dec)
}

/// `?` 플레이스홀더 다중 행 INSERT 문을 구성합니다.
fn build_multi_row_sql(prefix: &str, suffix: &str, cols: usize, rows: usize) -> String {
    let row_sql = format!("({})", vec!["?"; cols].join(", "));
    let values = vec![row_sql; rows].join(", ");
    format!("{}{}{}", prefix, values, suffix)
}

fn range_ms(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> (i64, i64) {
    (
        start.map(to_ms).unwrap_or(0),
        end.map(to_ms).unwrap_or(i64::MAX),
    )
}

/// SQLite 저장소.
pub struct SqliteStorage {
    pool: SqlitePool,
    path: String,
    initialized: AtomicBool,
}

impl SqliteStorage {
    /// 데이터베이스를 열거나 생성합니다.
    pub async fn connect(config: &SqliteConfig) -> Result<Self> {
        let options = if config.path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DataError::Config(e.to_string()))?
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| DataError::Config(e.to_string()))?;
                }
            }
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        };

        // 인메모리 DB는 연결마다 분리되므로 단일 연결을 고정합니다.
        let pool_options = if config.path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| DataError::Connection(e.to_string()))?;

        info!(path = %config.path, "SQLite database opened");

        Ok(Self {
            pool,
            path: config.path.clone(),
            initialized: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl StorageDriver for SqliteStorage {
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        self.initialized.store(true, Ordering::Relaxed);
        info!(path = %self.path, "SQLite schema ready");
        Ok(())
    }

    async fn save_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let symbol_str = symbol.to_exchange();
        let tf_str = timeframe.to_interval();
        let mut written = 0usize;

        for chunk in candles.chunks(CHUNK_SIZE) {
            let sql = build_multi_row_sql(
                "INSERT INTO ohlcv (time, symbol, timeframe, open, high, low, close, volume, \
                 close_time, quote_volume, num_trades, taker_buy_base, taker_buy_quote) VALUES ",
                " ON CONFLICT(time, symbol, timeframe) DO UPDATE SET \
                 open = excluded.open, high = excluded.high, low = excluded.low, \
                 close = excluded.close, volume = excluded.volume, \
                 close_time = excluded.close_time, quote_volume = excluded.quote_volume, \
                 num_trades = excluded.num_trades, taker_buy_base = excluded.taker_buy_base, \
                 taker_buy_quote = excluded.taker_buy_quote",
                13,
                chunk.len(),
            );

            let mut query = sqlx::query(&sql);
            for candle in chunk {
                query = query
                    .bind(to_ms(candle.open_time))
                    .bind(&symbol_str)
                    .bind(tf_str)
                    .bind(dec_to_f64(candle.open))
                    .bind(dec_to_f64(candle.high))
                    .bind(dec_to_f64(candle.low))
                    .bind(dec_to_f64(candle.close))
                    .bind(dec_to_f64(candle.volume))
                    .bind(to_ms(candle.close_time))
                    .bind(opt_dec_to_f64(candle.quote_volume))
                    .bind(candle.num_trades)
                    .bind(opt_dec_to_f64(candle.taker_buy_base))
                    .bind(opt_dec_to_f64(candle.taker_buy_quote));
            }

            let result = query.execute(&self.pool).await?;
            written += result.rows_affected() as usize;
        }

        debug!(symbol = %symbol, timeframe = %timeframe, rows = written, "candles saved");
        Ok(written)
    }

    async fn save_open_interest(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        rows: &[OpenInterest],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let symbol_str = symbol.to_exchange();
        let period_str = period.to_interval();
        let mut written = 0usize;

        for chunk in rows.chunks(CHUNK_SIZE) {
            let sql = build_multi_row_sql(
                "INSERT INTO open_interest (time, symbol, period, open_interest, open_interest_value) VALUES ",
                " ON CONFLICT(time, symbol, period) DO UPDATE SET \
                 open_interest = excluded.open_interest, \
                 open_interest_value = excluded.open_interest_value",
                5,
                chunk.len(),
            );

            let mut query = sqlx::query(&sql);
            for row in chunk {
                query = query
                    .bind(to_ms(row.time))
                    .bind(&symbol_str)
                    .bind(period_str)
                    .bind(dec_to_f64(row.open_interest))
                    .bind(opt_dec_to_f64(row.open_interest_value));
            }

            let result = query.execute(&self.pool).await?;
            written += result.rows_affected() as usize;
        }

        Ok(written)
    }

    async fn save_funding_rates(&self, symbol: &Symbol, rows: &[FundingRate]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let symbol_str = symbol.to_exchange();
        let mut written = 0usize;

        for chunk in rows.chunks(CHUNK_SIZE) {
            let sql = build_multi_row_sql(
                "INSERT OR IGNORE INTO funding_rate (funding_time, symbol, funding_rate, mark_price) VALUES ",
                "",
                4,
                chunk.len(),
            );

            let mut query = sqlx::query(&sql);
            for row in chunk {
                query = query
                    .bind(to_ms(row.funding_time))
                    .bind(&symbol_str)
                    .bind(dec_to_f64(row.funding_rate))
                    .bind(opt_dec_to_f64(row.mark_price));
            }

            let result = query.execute(&self.pool).await?;
            written += result.rows_affected() as usize;
        }

        Ok(written)
    }

    async fn save_liquidations(&self, symbol: &Symbol, rows: &[Liquidation]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let symbol_str = symbol.to_exchange();
        let mut written = 0usize;

        for chunk in rows.chunks(CHUNK_SIZE) {
            // 중복 order_id는 조용히 무시
            let sql = build_multi_row_sql(
                "INSERT OR IGNORE INTO liquidations (time, symbol, side, price, quantity, order_id) VALUES ",
                "",
                6,
                chunk.len(),
            );

            let mut query = sqlx::query(&sql);
            for row in chunk {
                query = query
                    .bind(to_ms(row.time))
                    .bind(&symbol_str)
                    .bind(row.side.to_string())
                    .bind(dec_to_f64(row.price))
                    .bind(dec_to_f64(row.quantity))
                    .bind(row.order_id);
            }

            let result = query.execute(&self.pool).await?;
            written += result.rows_affected() as usize;
        }

        Ok(written)
    }

    async fn save_long_short_ratios(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        rows: &[LongShortRatio],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let symbol_str = symbol.to_exchange();
        let period_str = period.to_interval();
        let mut written = 0usize;

        for chunk in rows.chunks(CHUNK_SIZE) {
            let sql = build_multi_row_sql(
                "INSERT INTO long_short_ratio (time, symbol, period, long_short_ratio, long_account, short_account) VALUES ",
                " ON CONFLICT(time, symbol, period) DO UPDATE SET \
                 long_short_ratio = excluded.long_short_ratio, \
                 long_account = excluded.long_account, \
                 short_account = excluded.short_account",
                6,
                chunk.len(),
            );

            let mut query = sqlx::query(&sql);
            for row in chunk {
                query = query
                    .bind(to_ms(row.time))
                    .bind(&symbol_str)
                    .bind(period_str)
                    .bind(dec_to_f64(row.long_short_ratio))
                    .bind(dec_to_f64(row.long_account))
                    .bind(dec_to_f64(row.short_account));
            }

            let result = query.execute(&self.pool).await?;
            written += result.rows_affected() as usize;
        }

        Ok(written)
    }

    async fn save_depth_snapshot(
        &self,
        symbol: &Symbol,
        snapshot: &DepthSnapshot,
    ) -> Result<usize> {
        let symbol_str = symbol.to_exchange();
        let time_ms = to_ms(snapshot.time);

        let mut tx = self.pool.begin().await?;

        // 동일 타임스탬프 스냅샷 전체 교체
        sqlx::query("DELETE FROM order_book WHERE time = ? AND symbol = ?")
            .bind(time_ms)
            .bind(&symbol_str)
            .execute(&mut *tx)
            .await?;

        let mut written = 0usize;
        let sides: [(&str, &Vec<BookLevel>); 2] =
            [("BID", &snapshot.bids), ("ASK", &snapshot.asks)];

        for (side, levels) in sides {
            for (level, entry) in levels.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO order_book (time, symbol, side, level, price, quantity, last_update_id) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(time_ms)
                .bind(&symbol_str)
                .bind(side)
                .bind(level as i64)
                .bind(dec_to_f64(entry.price))
                .bind(dec_to_f64(entry.quantity))
                .bind(snapshot.last_update_id)
                .execute(&mut *tx)
                .await?;
                written += 1;
            }
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn save_data_version(&self, version: &DataVersion) -> Result<()> {
        sqlx::query(
            "INSERT INTO data_versions (table_name, symbol, window_start, window_end, record_count, checksum, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&version.table)
        .bind(version.symbol.to_exchange())
        .bind(to_ms(version.window_start))
        .bind(to_ms(version.window_end))
        .bind(version.record_count)
        .bind(&version.checksum)
        .bind(to_ms(version.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>> {
        let (min, max) = range_ms(start, end);

        let rows = sqlx::query(
            "SELECT time, open, high, low, close, volume, close_time, quote_volume, num_trades, \
             taker_buy_base, taker_buy_quote \
             FROM ohlcv \
             WHERE symbol = ? AND timeframe = ? AND time >= ? AND time <= ? \
             ORDER BY time ASC",
        )
        .bind(symbol.to_exchange())
        .bind(timeframe.to_interval())
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Candle {
                open_time: from_ms(row.get("time")),
                open: f64_to_dec(row.get("open")),
                high: f64_to_dec(row.get("high")),
                low: f64_to_dec(row.get("low")),
                close: f64_to_dec(row.get("close")),
                volume: f64_to_dec(row.get("volume")),
                close_time: from_ms(
                    row.get::<Option<i64>, _>("close_time")
                        .unwrap_or_else(|| row.get("time")),
                ),
                quote_volume: opt_f64_to_dec(row.get("quote_volume")),
                num_trades: row.get("num_trades"),
                taker_buy_base: opt_f64_to_dec(row.get("taker_buy_base")),
                taker_buy_quote: opt_f64_to_dec(row.get("taker_buy_quote")),
                is_closed: true,
            })
            .collect())
    }

    async fn latest_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT time, open, high, low, close, volume, close_time, quote_volume, num_trades, \
             taker_buy_base, taker_buy_quote \
             FROM ohlcv \
             WHERE symbol = ? AND timeframe = ? \
             ORDER BY time DESC \
             LIMIT ?",
        )
        .bind(symbol.to_exchange())
        .bind(timeframe.to_interval())
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut candles: Vec<Candle> = rows
            .into_iter()
            .map(|row| Candle {
                open_time: from_ms(row.get("time")),
                open: f64_to_dec(row.get("open")),
                high: f64_to_dec(row.get("high")),
                low: f64_to_dec(row.get("low")),
                close: f64_to_dec(row.get("close")),
                volume: f64_to_dec(row.get("volume")),
                close_time: from_ms(
                    row.get::<Option<i64>, _>("close_time")
                        .unwrap_or_else(|| row.get("time")),
                ),
                quote_volume: opt_f64_to_dec(row.get("quote_volume")),
                num_trades: row.get("num_trades"),
                taker_buy_base: opt_f64_to_dec(row.get("taker_buy_base")),
                taker_buy_quote: opt_f64_to_dec(row.get("taker_buy_quote")),
                is_closed: true,
            })
            .collect();

        candles.reverse();
        Ok(candles)
    }

    async fn get_open_interest(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<OpenInterest>> {
        let (min, max) = range_ms(start, end);

        let rows = sqlx::query(
            "SELECT time, open_interest, open_interest_value \
             FROM open_interest \
             WHERE symbol = ? AND period = ? AND time >= ? AND time <= ? \
             ORDER BY time ASC",
        )
        .bind(symbol.to_exchange())
        .bind(period.to_interval())
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OpenInterest {
                time: from_ms(row.get("time")),
                open_interest: f64_to_dec(row.get("open_interest")),
                open_interest_value: opt_f64_to_dec(row.get("open_interest_value")),
            })
            .collect())
    }

    async fn get_funding_rates(
        &self,
        symbol: &Symbol,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<FundingRate>> {
        let (min, max) = range_ms(start, end);

        let rows = sqlx::query(
            "SELECT funding_time, funding_rate, mark_price \
             FROM funding_rate \
             WHERE symbol = ? AND funding_time >= ? AND funding_time <= ? \
             ORDER BY funding_time ASC",
        )
        .bind(symbol.to_exchange())
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FundingRate {
                funding_time: from_ms(row.get("funding_time")),
                funding_rate: f64_to_dec(row.get("funding_rate")),
                mark_price: opt_f64_to_dec(row.get("mark_price")),
            })
            .collect())
    }

    async fn get_liquidations(
        &self,
        symbol: &Symbol,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Liquidation>> {
        let (min, max) = range_ms(start, end);

        let rows = sqlx::query(
            "SELECT order_id, time, side, price, quantity \
             FROM liquidations \
             WHERE symbol = ? AND time >= ? AND time <= ? \
             ORDER BY time ASC",
        )
        .bind(symbol.to_exchange())
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let side: String = row.get("side");
                Some(Liquidation {
                    order_id: row.get("order_id"),
                    time: from_ms(row.get("time")),
                    side: Side::parse(&side)?,
                    price: f64_to_dec(row.get("price")),
                    quantity: f64_to_dec(row.get("quantity")),
                })
            })
            .collect())
    }

    async fn get_long_short_ratios(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<LongShortRatio>> {
        let (min, max) = range_ms(start, end);

        let rows = sqlx::query(
            "SELECT time, long_short_ratio, long_account, short_account \
             FROM long_short_ratio \
             WHERE symbol = ? AND period = ? AND time >= ? AND time <= ? \
             ORDER BY time ASC",
        )
        .bind(symbol.to_exchange())
        .bind(period.to_interval())
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LongShortRatio {
                time: from_ms(row.get("time")),
                long_short_ratio: f64_to_dec(row.get("long_short_ratio")),
                long_account: f64_to_dec(row.get("long_account")),
                short_account: f64_to_dec(row.get("short_account")),
            })
            .collect())
    }

    async fn latest_depth(&self, symbol: &Symbol) -> Result<Option<DepthSnapshot>> {
        let rows = sqlx::query(
            "SELECT time, side, level, price, quantity, last_update_id \
             FROM order_book \
             WHERE symbol = ?1 \
             AND time = (SELECT MAX(time) FROM order_book WHERE symbol = ?1) \
             ORDER BY side, level",
        )
        .bind(symbol.to_exchange())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut snapshot = DepthSnapshot {
            time: from_ms(rows[0].get("time")),
            last_update_id: rows[0]
                .get::<Option<i64>, _>("last_update_id")
                .unwrap_or(0),
            bids: Vec::new(),
            asks: Vec::new(),
        };

        for row in rows {
            let side: String = row.get("side");
            let level = BookLevel {
                price: f64_to_dec(row.get("price")),
                quantity: f64_to_dec(row.get("quantity")),
            };
            match side.as_str() {
                "BID" => snapshot.bids.push(level),
                "ASK" => snapshot.asks.push(level),
                _ => {}
            }
        }

        Ok(Some(snapshot))
    }

    async fn count_candles(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM ohlcv WHERE symbol = ? AND timeframe = ?",
        )
        .bind(symbol.to_exchange())
        .bind(timeframe.to_interval())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("count"))
    }

    async fn latest_candle_time(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MAX(time) AS latest FROM ohlcv WHERE symbol = ? AND timeframe = ?",
        )
        .bind(symbol.to_exchange())
        .bind(timeframe.to_interval())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Option<i64>, _>("latest").map(from_ms))
    }

    async fn list_symbols(&self) -> Result<Vec<Symbol>> {
        let rows = sqlx::query("SELECT DISTINCT symbol FROM ohlcv ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Symbol::parse(row.get("symbol")))
            .collect())
    }

    async fn delete_symbol(&self, symbol: &Symbol) -> Result<()> {
        let symbol_str = symbol.to_exchange();
        for table in [
            "ohlcv",
            "open_interest",
            "funding_rate",
            "liquidations",
            "long_short_ratio",
            "order_book",
        ] {
            sqlx::query(&format!("DELETE FROM {} WHERE symbol = ?", table))
                .bind(&symbol_str)
                .execute(&self.pool)
                .await?;
        }

        info!(symbol = %symbol, "deleted all data for symbol");
        Ok(())
    }

    async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        info!("SQLite database vacuumed");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }

    async fn info(&self) -> Result<StorageInfo> {
        let size_bytes = if self.path == ":memory:" {
            None
        } else {
            tokio::fs::metadata(&self.path).await.ok().map(|m| m.len())
        };

        Ok(StorageInfo {
            backend: "sqlite",
            initialized: self.initialized.load(Ordering::Relaxed),
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_multi_row_sql() {
        let sql = build_multi_row_sql("INSERT INTO t (a, b) VALUES ", "", 2, 2);
        assert_eq!(sql, "INSERT INTO t (a, b) VALUES (?, ?), (?, ?)");
    }

    #[test]
    fn test_decimal_round_trip() {
        let value: Decimal = "57.12345678".parse().unwrap();
        let round_tripped = f64_to_dec(dec_to_f64(value));
        let diff = (round_tripped - value).abs();
        assert!(diff < "0.0000001".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_range_ms_defaults() {
        let (min, max) = range_ms(None, None);
        assert_eq!(min, 0);
        assert_eq!(max, i64::MAX);
    }
}
