//! 수집기 통합 테스트.
//!
//! 네트워크 없이 스텁 거래소와 인메모리 저장소로 백필 완전성,
//! 스트리밍 배치 플러시, 중지 시 배치 보존을 검증합니다.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use feed_collector::historical::{BackfillWindow, HistoricalCollector, StreamSpec};
use feed_collector::streaming::{StreamingCollector, StreamingConfig};
use feed_core::{
    BookLevel, Candle, DataVersion, DepthSnapshot, ErrorTracker, FundingRate, Liquidation,
    LongShortRatio, OpenInterest, Side, Symbol, Timeframe,
};
use feed_data::{DataError, StorageDriver, StorageInfo};
use feed_exchange::{ExchangeError, ExchangeResult, FuturesApi, StreamEvent};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn ms(t: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(t).unwrap()
}

fn make_candle(open_time: DateTime<Utc>, timeframe: Timeframe) -> Candle {
    Candle {
        open_time,
        open: dec("57.10"),
        high: dec("57.50"),
        low: dec("56.90"),
        close: dec("57.30"),
        volume: dec("1000"),
        close_time: open_time
            + ChronoDuration::milliseconds(timeframe.as_millis() - 1),
        quote_volume: Some(dec("57000")),
        num_trades: Some(100),
        taker_buy_base: Some(dec("500")),
        taker_buy_quote: Some(dec("28500")),
        is_closed: true,
    }
}

// ============================================================================
// 인메모리 저장소
// ============================================================================

#[derive(Default)]
struct MemoryState {
    /// (symbol, timeframe) -> open_time_ms -> candle
    candles: HashMap<(String, String), BTreeMap<i64, Candle>>,
    /// save_candles 호출마다 받은 배치 크기
    candle_batches: Vec<usize>,
    liquidations: HashMap<String, BTreeMap<i64, Liquidation>>,
    versions: Vec<DataVersion>,
}

#[derive(Default, Clone)]
struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    fn candle_batches(&self) -> Vec<usize> {
        self.state.lock().unwrap().candle_batches.clone()
    }

    fn versions(&self) -> Vec<DataVersion> {
        self.state.lock().unwrap().versions.clone()
    }
}

#[async_trait]
impl StorageDriver for MemoryStorage {
    async fn init(&self) -> Result<(), DataError> {
        Ok(())
    }

    async fn save_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize, DataError> {
        let mut state = self.state.lock().unwrap();
        state.candle_batches.push(candles.len());
        let bucket = state
            .candles
            .entry((symbol.to_exchange(), timeframe.to_interval().to_string()))
            .or_default();
        for candle in candles {
            bucket.insert(candle.open_time.timestamp_millis(), candle.clone());
        }
        Ok(candles.len())
    }

    async fn save_open_interest(
        &self,
        _symbol: &Symbol,
        _period: Timeframe,
        rows: &[OpenInterest],
    ) -> Result<usize, DataError> {
        Ok(rows.len())
    }

    async fn save_funding_rates(
        &self,
        _symbol: &Symbol,
        rows: &[FundingRate],
    ) -> Result<usize, DataError> {
        Ok(rows.len())
    }

    async fn save_liquidations(
        &self,
        symbol: &Symbol,
        rows: &[Liquidation],
    ) -> Result<usize, DataError> {
        let mut state = self.state.lock().unwrap();
        let bucket = state
            .liquidations
            .entry(symbol.to_exchange())
            .or_default();
        let mut written = 0;
        for row in rows {
            if bucket.insert(row.order_id, row.clone()).is_none() {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn save_long_short_ratios(
        &self,
        _symbol: &Symbol,
        _period: Timeframe,
        rows: &[LongShortRatio],
    ) -> Result<usize, DataError> {
        Ok(rows.len())
    }

    async fn save_depth_snapshot(
        &self,
        _symbol: &Symbol,
        snapshot: &DepthSnapshot,
    ) -> Result<usize, DataError> {
        Ok(snapshot.bids.len() + snapshot.asks.len())
    }

    async fn save_data_version(&self, version: &DataVersion) -> Result<(), DataError> {
        self.state.lock().unwrap().versions.push(version.clone());
        Ok(())
    }

    async fn get_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, DataError> {
        let state = self.state.lock().unwrap();
        let rows = state
            .candles
            .get(&(symbol.to_exchange(), timeframe.to_interval().to_string()))
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|c| {
                        start.map_or(true, |s| c.open_time >= s)
                            && end.map_or(true, |e| c.open_time <= e)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn latest_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, DataError> {
        let all = self.get_candles(symbol, timeframe, None, None).await?;
        let skip = all.len().saturating_sub(count);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn get_open_interest(
        &self,
        _symbol: &Symbol,
        _period: Timeframe,
        _start: Option<DateTime<Utc>>,
        _end: Option<DateTime<Utc>>,
    ) -> Result<Vec<OpenInterest>, DataError> {
        Ok(Vec::new())
    }

    async fn get_funding_rates(
        &self,
        _symbol: &Symbol,
        _start: Option<DateTime<Utc>>,
        _end: Option<DateTime<Utc>>,
    ) -> Result<Vec<FundingRate>, DataError> {
        Ok(Vec::new())
    }

    async fn get_liquidations(
        &self,
        symbol: &Symbol,
        _start: Option<DateTime<Utc>>,
        _end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Liquidation>, DataError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .liquidations
            .get(&symbol.to_exchange())
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_long_short_ratios(
        &self,
        _symbol: &Symbol,
        _period: Timeframe,
        _start: Option<DateTime<Utc>>,
        _end: Option<DateTime<Utc>>,
    ) -> Result<Vec<LongShortRatio>, DataError> {
        Ok(Vec::new())
    }

    async fn latest_depth(&self, _symbol: &Symbol) -> Result<Option<DepthSnapshot>, DataError> {
        Ok(None)
    }

    async fn count_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<i64, DataError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .candles
            .get(&(symbol.to_exchange(), timeframe.to_interval().to_string()))
            .map(|bucket| bucket.len() as i64)
            .unwrap_or(0))
    }

    async fn latest_candle_time(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>, DataError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .candles
            .get(&(symbol.to_exchange(), timeframe.to_interval().to_string()))
            .and_then(|bucket| bucket.keys().next_back().copied())
            .map(ms))
    }

    async fn list_symbols(&self) -> Result<Vec<Symbol>, DataError> {
        Ok(Vec::new())
    }

    async fn delete_symbol(&self, _symbol: &Symbol) -> Result<(), DataError> {
        Ok(())
    }

    async fn vacuum(&self) -> Result<(), DataError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, DataError> {
        Ok(true)
    }

    async fn info(&self) -> Result<StorageInfo, DataError> {
        Ok(StorageInfo {
            backend: "memory",
            initialized: true,
            size_bytes: None,
        })
    }
}

// ============================================================================
// 스텁 거래소
// ============================================================================

/// [data_start, data_end] 그리드의 캔들을 페이지 단위로 돌려주는 협조 스텁.
struct StubApi {
    data_start: i64,
    data_end: i64,
    step_ms: i64,
}

impl StubApi {
    fn new(data_start: i64, data_end: i64, timeframe: Timeframe) -> Self {
        Self {
            data_start,
            data_end,
            step_ms: timeframe.as_millis(),
        }
    }
}

#[async_trait]
impl FuturesApi for StubApi {
    async fn fetch_ohlcv(
        &self,
        _symbol: &Symbol,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        let since = since.unwrap_or(self.data_start).max(self.data_start);
        let offset = (since - self.data_start).rem_euclid(self.step_ms);
        let mut t = if offset == 0 {
            since
        } else {
            since + self.step_ms - offset
        };

        let mut page = Vec::new();
        while t <= self.data_end && page.len() < limit as usize {
            page.push(make_candle(ms(t), timeframe));
            t += self.step_ms;
        }
        Ok(page)
    }

    async fn fetch_open_interest_hist(
        &self,
        _symbol: &Symbol,
        _period: Timeframe,
        _limit: u32,
    ) -> ExchangeResult<Vec<OpenInterest>> {
        Ok(Vec::new())
    }

    async fn fetch_funding_rate(
        &self,
        _symbol: &Symbol,
        _start_time: Option<i64>,
        _limit: u32,
    ) -> ExchangeResult<Vec<FundingRate>> {
        Ok(Vec::new())
    }

    async fn fetch_liquidations(
        &self,
        _symbol: &Symbol,
        _limit: u32,
    ) -> ExchangeResult<Vec<Liquidation>> {
        Ok(Vec::new())
    }

    async fn fetch_top_trader_ratio(
        &self,
        _symbol: &Symbol,
        _period: Timeframe,
        _limit: u32,
    ) -> ExchangeResult<Vec<LongShortRatio>> {
        Ok(Vec::new())
    }

    async fn fetch_order_book(
        &self,
        _symbol: &Symbol,
        _depth: u32,
    ) -> ExchangeResult<DepthSnapshot> {
        Ok(DepthSnapshot {
            time: ms(self.data_end),
            last_update_id: 1,
            bids: vec![BookLevel { price: dec("100.00"), quantity: dec("10") }],
            asks: vec![BookLevel { price: dec("100.05"), quantity: dec("10") }],
        })
    }

    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        Ok(Utc::now())
    }
}

/// 회로가 열린 상태를 흉내내는 스텁.
struct OpenCircuitApi;

#[async_trait]
impl FuturesApi for OpenCircuitApi {
    async fn fetch_ohlcv(
        &self,
        _symbol: &Symbol,
        _timeframe: Timeframe,
        _since: Option<i64>,
        _limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        Err(ExchangeError::CircuitOpen { name: "binance_ohlcv".into() })
    }

    async fn fetch_open_interest_hist(
        &self,
        _symbol: &Symbol,
        _period: Timeframe,
        _limit: u32,
    ) -> ExchangeResult<Vec<OpenInterest>> {
        Err(ExchangeError::CircuitOpen { name: "binance_oi".into() })
    }

    async fn fetch_funding_rate(
        &self,
        _symbol: &Symbol,
        _start_time: Option<i64>,
        _limit: u32,
    ) -> ExchangeResult<Vec<FundingRate>> {
        Err(ExchangeError::CircuitOpen { name: "binance_funding".into() })
    }

    async fn fetch_liquidations(
        &self,
        _symbol: &Symbol,
        _limit: u32,
    ) -> ExchangeResult<Vec<Liquidation>> {
        Err(ExchangeError::CircuitOpen { name: "binance_liquidations".into() })
    }

    async fn fetch_top_trader_ratio(
        &self,
        _symbol: &Symbol,
        _period: Timeframe,
        _limit: u32,
    ) -> ExchangeResult<Vec<LongShortRatio>> {
        Err(ExchangeError::CircuitOpen { name: "binance_trader_ratio".into() })
    }

    async fn fetch_order_book(
        &self,
        _symbol: &Symbol,
        _depth: u32,
    ) -> ExchangeResult<DepthSnapshot> {
        Err(ExchangeError::CircuitOpen { name: "binance_depth".into() })
    }

    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        Err(ExchangeError::CircuitOpen { name: "binance".into() })
    }
}

/// 잘못된 OHLC 캔들 한 페이지를 돌려주는 스텁.
struct BadDataApi {
    time: i64,
}

#[async_trait]
impl FuturesApi for BadDataApi {
    async fn fetch_ohlcv(
        &self,
        _symbol: &Symbol,
        timeframe: Timeframe,
        since: Option<i64>,
        _limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        if since.unwrap_or(0) > self.time {
            return Ok(Vec::new());
        }
        // open=10, high=5, low=6, close=7 - OHLC 관계 위반
        let mut candle = make_candle(ms(self.time), timeframe);
        candle.open = dec("10");
        candle.high = dec("5");
        candle.low = dec("6");
        candle.close = dec("7");
        Ok(vec![candle])
    }

    async fn fetch_open_interest_hist(
        &self,
        _symbol: &Symbol,
        _period: Timeframe,
        _limit: u32,
    ) -> ExchangeResult<Vec<OpenInterest>> {
        Ok(Vec::new())
    }

    async fn fetch_funding_rate(
        &self,
        _symbol: &Symbol,
        _start_time: Option<i64>,
        _limit: u32,
    ) -> ExchangeResult<Vec<FundingRate>> {
        Ok(Vec::new())
    }

    async fn fetch_liquidations(
        &self,
        _symbol: &Symbol,
        _limit: u32,
    ) -> ExchangeResult<Vec<Liquidation>> {
        Ok(Vec::new())
    }

    async fn fetch_top_trader_ratio(
        &self,
        _symbol: &Symbol,
        _period: Timeframe,
        _limit: u32,
    ) -> ExchangeResult<Vec<LongShortRatio>> {
        Ok(Vec::new())
    }

    async fn fetch_order_book(
        &self,
        _symbol: &Symbol,
        _depth: u32,
    ) -> ExchangeResult<DepthSnapshot> {
        Err(ExchangeError::Network("not implemented".into()))
    }

    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        Ok(Utc::now())
    }
}

// ============================================================================
// 과거 수집 테스트
// ============================================================================

const WINDOW_START: i64 = 1_700_000_100_000;

#[tokio::test]
async fn backfill_persists_every_timestamp_in_window() {
    // 5분봉 2016개 (1500개 페이지 한도로 2페이지 필요)
    let step = Timeframe::M5.as_millis();
    let expected: i64 = 2016;
    let window_end = WINDOW_START + (expected - 1) * step;

    let api = Arc::new(StubApi::new(WINDOW_START, window_end, Timeframe::M5));
    let storage = MemoryStorage::default();
    let tracker = Arc::new(ErrorTracker::with_defaults());
    let collector = HistoricalCollector::new(
        api,
        Arc::new(storage.clone()),
        tracker,
    );

    let symbol = Symbol::parse("SOL/USDT");
    let window = BackfillWindow::new(ms(WINDOW_START), ms(window_end));
    let outcome = collector
        .collect_stream(&symbol, StreamSpec::Ohlcv(Timeframe::M5), window)
        .await;

    assert!(outcome.error.is_none(), "outcome: {:?}", outcome);
    assert!(!outcome.partial);
    assert!(outcome.pages >= 2, "pages: {}", outcome.pages);
    assert_eq!(outcome.rows_written as i64, expected);

    // 유일 타임스탬프 수 == 윈도우 안의 그리드 포인트 수
    let stored = Arc::new(storage.clone());
    let count = stored.count_candles(&symbol, Timeframe::M5).await.unwrap();
    assert_eq!(count, expected);

    // 버전 레코드가 남아야 함
    let versions = storage.versions();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].table, "ohlcv");
    assert_eq!(versions[0].record_count, expected);
    assert!(!versions[0].checksum.is_empty());
}

#[tokio::test]
async fn backfill_is_idempotent_across_runs() {
    let step = Timeframe::M5.as_millis();
    let window_end = WINDOW_START + 99 * step;

    let api = Arc::new(StubApi::new(WINDOW_START, window_end, Timeframe::M5));
    let storage = MemoryStorage::default();
    let tracker = Arc::new(ErrorTracker::with_defaults());
    let collector = HistoricalCollector::new(api, Arc::new(storage.clone()), tracker);

    let symbol = Symbol::parse("SOL/USDT");
    let window = BackfillWindow::new(ms(WINDOW_START), ms(window_end));

    collector
        .collect_stream(&symbol, StreamSpec::Ohlcv(Timeframe::M5), window)
        .await;
    collector
        .collect_stream(&symbol, StreamSpec::Ohlcv(Timeframe::M5), window)
        .await;

    let stored = Arc::new(storage);
    let count = stored.count_candles(&symbol, Timeframe::M5).await.unwrap();
    assert_eq!(count, 100);
}

#[tokio::test]
async fn circuit_open_marks_stream_partial_without_aborting() {
    let api = Arc::new(OpenCircuitApi);
    let storage = MemoryStorage::default();
    let tracker = Arc::new(ErrorTracker::with_defaults());
    let collector = HistoricalCollector::new(api, Arc::new(storage.clone()), tracker.clone());

    let symbol = Symbol::parse("SOL/USDT");
    let window = BackfillWindow::new(ms(WINDOW_START), ms(WINDOW_START + 300_000));
    let outcome = collector
        .collect_stream(&symbol, StreamSpec::Ohlcv(Timeframe::M5), window)
        .await;

    assert!(outcome.partial);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.rows_written, 0);
    assert!(tracker.summary().by_kind.contains_key("circuit_open"));
}

#[tokio::test]
async fn fatal_validation_rejects_batch_before_storage() {
    let api = Arc::new(BadDataApi { time: WINDOW_START });
    let storage = MemoryStorage::default();
    let tracker = Arc::new(ErrorTracker::with_defaults());
    let collector = HistoricalCollector::new(api, Arc::new(storage.clone()), tracker.clone());

    let symbol = Symbol::parse("SOL/USDT");
    let window = BackfillWindow::new(ms(WINDOW_START), ms(WINDOW_START + 300_000));
    let outcome = collector
        .collect_stream(&symbol, StreamSpec::Ohlcv(Timeframe::M5), window)
        .await;

    // 저장소는 호출되지 않아야 함
    assert!(storage.candle_batches().is_empty());
    assert!(outcome.error.is_some());
    assert_eq!(outcome.rows_written, 0);

    // validation 에러가 기록되어야 함
    assert!(tracker.summary().by_kind.contains_key("validation"));
}

#[tokio::test]
async fn concurrent_collection_aggregates_all_streams() {
    let step = Timeframe::M5.as_millis();
    let window_end = WINDOW_START + 49 * step;

    let api = Arc::new(StubApi::new(WINDOW_START, window_end, Timeframe::M5));
    let storage = MemoryStorage::default();
    let tracker = Arc::new(ErrorTracker::with_defaults());
    let collector = HistoricalCollector::new(api, Arc::new(storage.clone()), tracker)
        .with_concurrency(4);

    let symbol = Symbol::parse("SOL/USDT");
    let window = BackfillWindow::new(ms(WINDOW_START), ms(window_end));
    let streams = vec![
        StreamSpec::Ohlcv(Timeframe::M5),
        StreamSpec::OpenInterest(Timeframe::M5),
        StreamSpec::Funding,
        StreamSpec::Liquidations,
        StreamSpec::Depth,
    ];

    let stats = collector
        .collect_all_concurrent(&symbol, window, streams)
        .await;

    assert_eq!(stats.total_streams, 5);
    assert_eq!(stats.errors, 0);
    // OHLCV 50행 + 호가창 2행 (빈 스트림은 0행)
    assert_eq!(stats.total_rows, 52);
}

// ============================================================================
// 스트리밍 테스트
// ============================================================================

fn kline_event(symbol: &Symbol, index: i64) -> StreamEvent {
    StreamEvent::Kline {
        symbol: symbol.clone(),
        timeframe: Timeframe::M5,
        candle: make_candle(ms(WINDOW_START + index * 300_000), Timeframe::M5),
    }
}

#[tokio::test]
async fn interval_flush_delivers_single_batch_of_nine() {
    let storage = MemoryStorage::default();
    let tracker = Arc::new(ErrorTracker::with_defaults());
    let collector = StreamingCollector::new(
        Arc::new(storage.clone()),
        None,
        tracker,
        StreamingConfig {
            batch_size: 10,
            flush_interval: Duration::from_millis(100),
            cache_ttl_secs: 300,
        },
    );

    let (tx, rx) = tokio::sync::mpsc::channel(100);
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let symbol = Symbol::parse("SOL/USDT");
    // 9개 전송 후 대기: 크기 조건(10)은 미달, 간격 플러시가 일어나야 함
    for i in 0..9 {
        tx.send(kline_event(&symbol, i)).await.unwrap();
    }

    let handle = tokio::spawn(async move { collector.run(rx, stop_rx).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(storage.candle_batches(), vec![9]);

    stop_tx.send(true).unwrap();
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.events, 9);
    assert_eq!(stats.rows_written, 9);
    assert_eq!(stats.flushes, 1);
}

#[tokio::test]
async fn batch_size_triggers_flush_before_interval() {
    let storage = MemoryStorage::default();
    let tracker = Arc::new(ErrorTracker::with_defaults());
    let collector = StreamingCollector::new(
        Arc::new(storage.clone()),
        None,
        tracker,
        StreamingConfig {
            batch_size: 5,
            // 간격 조건이 먼저 오지 않도록 길게
            flush_interval: Duration::from_secs(60),
            cache_ttl_secs: 300,
        },
    );

    let (tx, rx) = tokio::sync::mpsc::channel(100);
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let symbol = Symbol::parse("SOL/USDT");
    for i in 0..5 {
        tx.send(kline_event(&symbol, i)).await.unwrap();
    }

    let handle = tokio::spawn(async move { collector.run(rx, stop_rx).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(storage.candle_batches(), vec![5]);

    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_flushes_in_flight_batch() {
    let storage = MemoryStorage::default();
    let tracker = Arc::new(ErrorTracker::with_defaults());
    let collector = StreamingCollector::new(
        Arc::new(storage.clone()),
        None,
        tracker,
        StreamingConfig {
            batch_size: 10,
            // 플러시 조건이 중지 전에 발생하지 않도록
            flush_interval: Duration::from_secs(60),
            cache_ttl_secs: 300,
        },
    );

    let (tx, rx) = tokio::sync::mpsc::channel(100);
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let symbol = Symbol::parse("SOL/USDT");
    for i in 0..3 {
        tx.send(kline_event(&symbol, i)).await.unwrap();
    }

    let handle = tokio::spawn(async move { collector.run(rx, stop_rx).await });

    // 이벤트가 흡수될 시간을 준 뒤 중지
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send(true).unwrap();

    let stats = handle.await.unwrap().unwrap();

    // 중지 후 전달 중이던 배치는 온전히 저장되어야 함 (부분 저장 없음)
    assert_eq!(storage.candle_batches(), vec![3]);
    assert_eq!(stats.rows_written, 3);

    let stored = Arc::new(storage);
    let count = stored.count_candles(&symbol, Timeframe::M5).await.unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn liquidation_events_are_deduplicated_by_order_id() {
    let storage = MemoryStorage::default();
    let tracker = Arc::new(ErrorTracker::with_defaults());
    let collector = StreamingCollector::new(
        Arc::new(storage.clone()),
        None,
        tracker,
        StreamingConfig::default(),
    );

    let (tx, rx) = tokio::sync::mpsc::channel(100);
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let symbol = Symbol::parse("SOL/USDT");
    let liquidation = Liquidation {
        order_id: 42,
        time: ms(WINDOW_START),
        side: Side::Sell,
        price: dec("57.10"),
        quantity: dec("10"),
    };

    tx.send(StreamEvent::Liquidation {
        symbol: symbol.clone(),
        liquidation: liquidation.clone(),
    })
    .await
    .unwrap();
    tx.send(StreamEvent::Liquidation {
        symbol: symbol.clone(),
        liquidation,
    })
    .await
    .unwrap();

    let handle = tokio::spawn(async move { collector.run(rx, stop_rx).await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let stored = Arc::new(storage);
    let rows = stored.get_liquidations(&symbol, None, None).await.unwrap();
    assert_eq!(rows.len(), 1);
}
