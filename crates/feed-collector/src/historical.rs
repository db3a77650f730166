//! 과거 데이터 백필 수집기.
//!
//! (심볼, 스트림, 윈도우)별로 거래소를 페이지 단위로 순회하며 수집합니다.
//! 모든 스트림은 세마포어로 제한된 동시성 아래 병렬 실행되고,
//! 단일 스트림의 실패는 나머지 스트림에 영향을 주지 않습니다.
//!
//! 각 스트림은 완료 시 내용 해시가 포함된 DataVersion 레코드를 남깁니다.

use crate::error::Result;
use crate::stats::{CollectionStats, StreamOutcome};
use chrono::{DateTime, Utc};
use feed_core::{
    Candle, DataVersion, ErrorSeverity, ErrorTracker, FundingRate, Liquidation, LongShortRatio,
    OpenInterest, Symbol, Timeframe,
};
use feed_data::{DataError, DataValidator, StorageDriver, ValidationReport};
use feed_exchange::{ExchangeError, FuturesApi};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// 페이지당 레코드 수 (거래소 한도).
const OHLCV_PAGE_LIMIT: u32 = 1500;
const OI_PAGE_LIMIT: u32 = 500;
const FUNDING_PAGE_LIMIT: u32 = 1000;
const LIQUIDATION_PAGE_LIMIT: u32 = 1000;
const RATIO_PAGE_LIMIT: u32 = 500;

/// 재시도/breaker 소진 후 같은 커서에서 재개하기 전 대기.
const FAILURE_PAUSE: Duration = Duration::from_secs(2);

/// 펀딩 주기 (8시간).
const FUNDING_INTERVAL_MS: i64 = 8 * 60 * 60 * 1000;

/// 백필 대상 스트림.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSpec {
    Ohlcv(Timeframe),
    OpenInterest(Timeframe),
    Funding,
    Liquidations,
    TraderRatio(Timeframe),
    Depth,
}

impl StreamSpec {
    /// 스트림 식별 문자열.
    pub fn label(&self) -> String {
        match self {
            StreamSpec::Ohlcv(tf) => format!("ohlcv_{}", tf.to_interval()),
            StreamSpec::OpenInterest(period) => format!("oi_{}", period.to_interval()),
            StreamSpec::Funding => "funding".to_string(),
            StreamSpec::Liquidations => "liquidations".to_string(),
            StreamSpec::TraderRatio(period) => format!("ls_ratio_{}", period.to_interval()),
            StreamSpec::Depth => "order_book".to_string(),
        }
    }

    /// 대상 테이블 이름 (DataVersion용).
    fn table(&self) -> &'static str {
        match self {
            StreamSpec::Ohlcv(_) => "ohlcv",
            StreamSpec::OpenInterest(_) => "open_interest",
            StreamSpec::Funding => "funding_rate",
            StreamSpec::Liquidations => "liquidations",
            StreamSpec::TraderRatio(_) => "long_short_ratio",
            StreamSpec::Depth => "order_book",
        }
    }

    /// 페이지 간 최소 간격.
    fn page_gap(&self) -> Duration {
        match self {
            StreamSpec::Ohlcv(_) => Duration::from_millis(200),
            StreamSpec::OpenInterest(_) => Duration::from_millis(300),
            _ => Duration::from_millis(200),
        }
    }
}

/// 수집 대상 스트림 목록을 구성합니다.
pub fn streams_for(
    timeframes: &[Timeframe],
    oi_periods: &[Timeframe],
    collect_order_book: bool,
) -> Vec<StreamSpec> {
    let mut streams = Vec::new();
    for tf in timeframes {
        streams.push(StreamSpec::Ohlcv(*tf));
    }
    for period in oi_periods {
        streams.push(StreamSpec::OpenInterest(*period));
        streams.push(StreamSpec::TraderRatio(*period));
    }
    streams.push(StreamSpec::Funding);
    streams.push(StreamSpec::Liquidations);
    if collect_order_book {
        streams.push(StreamSpec::Depth);
    }
    streams
}

/// 백필 윈도우 [start, end].
#[derive(Debug, Clone, Copy)]
pub struct BackfillWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BackfillWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// 현재 시각까지 최근 N일.
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - chrono::Duration::days(days),
            end,
        }
    }

    /// 현재 시각까지 최근 N시간 (데몬 증분 수집용).
    pub fn last_hours(hours: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - chrono::Duration::hours(hours),
            end,
        }
    }
}

/// 과거 데이터 수집기.
#[derive(Clone)]
pub struct HistoricalCollector {
    api: Arc<dyn FuturesApi>,
    storage: Arc<dyn StorageDriver>,
    tracker: Arc<ErrorTracker>,
    /// 동시 실행 스트림 수 제한 (None이면 스트림 수)
    concurrency: Option<usize>,
    order_book_depth: u32,
}

impl HistoricalCollector {
    pub fn new(
        api: Arc<dyn FuturesApi>,
        storage: Arc<dyn StorageDriver>,
        tracker: Arc<ErrorTracker>,
    ) -> Self {
        Self {
            api,
            storage,
            tracker,
            concurrency: None,
            order_book_depth: 100,
        }
    }

    /// 동시 실행 스트림 수를 제한합니다.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }

    /// 호가창 수집 깊이를 설정합니다.
    pub fn with_order_book_depth(mut self, depth: u32) -> Self {
        self.order_book_depth = depth;
        self
    }

    /// 한 심볼의 모든 스트림을 병렬로 수집합니다.
    pub async fn collect_all_concurrent(
        &self,
        symbol: &Symbol,
        window: BackfillWindow,
        streams: Vec<StreamSpec>,
    ) -> CollectionStats {
        let started = std::time::Instant::now();
        let limit = self.concurrency.unwrap_or_else(|| streams.len().max(1));
        let semaphore = Arc::new(Semaphore::new(limit));

        info!(
            symbol = %symbol,
            streams = streams.len(),
            concurrency = limit,
            start = %window.start,
            end = %window.end,
            "동시 수집 시작"
        );

        let mut join_set = JoinSet::new();
        for spec in streams {
            let collector = self.clone();
            let symbol = symbol.clone();
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                collector.collect_stream(&symbol, spec, window).await
            });
        }

        let mut stats = CollectionStats::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => stats.record(outcome),
                Err(e) => stats.record(StreamOutcome {
                    stream: "unknown".to_string(),
                    rows_written: 0,
                    pages: 0,
                    partial: false,
                    error: Some(format!("task panicked: {}", e)),
                }),
            }
        }

        stats.elapsed = started.elapsed();
        stats
    }

    /// 단일 스트림을 수집합니다. 실패는 결과에 담겨 반환되며 패닉하지 않습니다.
    pub async fn collect_stream(
        &self,
        symbol: &Symbol,
        spec: StreamSpec,
        window: BackfillWindow,
    ) -> StreamOutcome {
        let result = match spec {
            StreamSpec::Ohlcv(tf) => self.collect_ohlcv(symbol, tf, window).await,
            StreamSpec::OpenInterest(period) => {
                self.collect_open_interest(symbol, period, window).await
            }
            StreamSpec::Funding => self.collect_funding(symbol, window).await,
            StreamSpec::Liquidations => self.collect_liquidations(symbol, window).await,
            StreamSpec::TraderRatio(period) => {
                self.collect_trader_ratio(symbol, period, window).await
            }
            StreamSpec::Depth => self.collect_depth(symbol).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.tracker.record(
                    "collector_stream_error",
                    e.to_string(),
                    vec![
                        ("symbol", symbol.to_string()),
                        ("stream", spec.label()),
                    ],
                    ErrorSeverity::Error,
                );
                StreamOutcome {
                    stream: spec.label(),
                    rows_written: 0,
                    pages: 0,
                    partial: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// OHLCV 백필. 커서 기반 페이지네이션.
    async fn collect_ohlcv(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: BackfillWindow,
    ) -> Result<StreamOutcome> {
        let spec = StreamSpec::Ohlcv(timeframe);
        let end_ms = window.end.timestamp_millis();
        let mut cursor = window.start.timestamp_millis();
        let mut buffer: Vec<Candle> = Vec::new();
        let mut pages = 0usize;
        let mut partial = false;

        loop {
            if cursor > end_ms {
                break;
            }

            match self
                .api
                .fetch_ohlcv(symbol, timeframe, Some(cursor), OHLCV_PAGE_LIMIT)
                .await
            {
                Ok(page) if page.is_empty() => break,
                Ok(page) => {
                    pages += 1;
                    let last_ms = page
                        .last()
                        .map(|c| c.open_time.timestamp_millis())
                        .unwrap_or(cursor);
                    buffer.extend(page);

                    let next = last_ms + timeframe.as_millis();
                    if next <= cursor {
                        break;
                    }
                    cursor = next;

                    if last_ms >= end_ms {
                        break;
                    }
                    tokio::time::sleep(spec.page_gap()).await;
                }
                Err(e) => {
                    if !self.handle_stream_failure(symbol, &spec, &e).await {
                        partial = true;
                        break;
                    }
                    // 같은 커서에서 재개
                }
            }
        }

        // 키 기준 중복 제거 + 윈도우로 잘라내기
        buffer.sort_by_key(|c| c.open_time);
        buffer.dedup_by_key(|c| c.open_time);
        buffer.retain(|c| c.open_time >= window.start && c.open_time <= window.end);

        let report = DataValidator::validate_candles(timeframe, &buffer);
        if self.reject_if_fatal(symbol, &spec, &report) {
            return Ok(StreamOutcome {
                stream: spec.label(),
                rows_written: 0,
                pages,
                partial,
                error: Some(format!("validation failed: {}", report.summary())),
            });
        }

        let written = self
            .save_with_retry(|| self.storage.save_candles(symbol, timeframe, &buffer))
            .await?;

        let keys: Vec<i64> = buffer.iter().map(|c| c.open_time.timestamp_millis()).collect();
        self.finish_stream(symbol, &spec, window, &keys, partial).await?;

        Ok(StreamOutcome {
            stream: spec.label(),
            rows_written: written,
            pages,
            partial,
            error: None,
        })
    }

    /// 미결제약정 수집. 거래소가 최근 구간만 제공하므로 단일 페이지.
    async fn collect_open_interest(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        window: BackfillWindow,
    ) -> Result<StreamOutcome> {
        let spec = StreamSpec::OpenInterest(period);
        let mut partial = false;

        let mut rows: Vec<OpenInterest> = loop {
            match self
                .api
                .fetch_open_interest_hist(symbol, period, OI_PAGE_LIMIT)
                .await
            {
                Ok(rows) => break rows,
                Err(e) => {
                    if !self.handle_stream_failure(symbol, &spec, &e).await {
                        partial = true;
                        break Vec::new();
                    }
                }
            }
        };

        rows.sort_by_key(|r| r.time);
        rows.dedup_by_key(|r| r.time);
        rows.retain(|r| r.time >= window.start && r.time <= window.end);

        let report = DataValidator::validate_open_interest(&rows);
        if self.reject_if_fatal(symbol, &spec, &report) {
            return Ok(StreamOutcome {
                stream: spec.label(),
                rows_written: 0,
                pages: 1,
                partial,
                error: Some(format!("validation failed: {}", report.summary())),
            });
        }

        let written = self
            .save_with_retry(|| self.storage.save_open_interest(symbol, period, &rows))
            .await?;

        let keys: Vec<i64> = rows.iter().map(|r| r.time.timestamp_millis()).collect();
        self.finish_stream(symbol, &spec, window, &keys, partial).await?;

        Ok(StreamOutcome {
            stream: spec.label(),
            rows_written: written,
            pages: 1,
            partial,
            error: None,
        })
    }

    /// 펀딩비 백필. 8시간 주기 커서 페이지네이션.
    async fn collect_funding(
        &self,
        symbol: &Symbol,
        window: BackfillWindow,
    ) -> Result<StreamOutcome> {
        let spec = StreamSpec::Funding;
        let end_ms = window.end.timestamp_millis();
        let mut cursor = window.start.timestamp_millis();
        let mut buffer: Vec<FundingRate> = Vec::new();
        let mut pages = 0usize;
        let mut partial = false;

        loop {
            if cursor > end_ms {
                break;
            }

            match self
                .api
                .fetch_funding_rate(symbol, Some(cursor), FUNDING_PAGE_LIMIT)
                .await
            {
                Ok(page) if page.is_empty() => break,
                Ok(page) => {
                    pages += 1;
                    let last_ms = page
                        .last()
                        .map(|r| r.funding_time.timestamp_millis())
                        .unwrap_or(cursor);
                    buffer.extend(page);

                    let next = last_ms + FUNDING_INTERVAL_MS;
                    if next <= cursor {
                        break;
                    }
                    cursor = next;

                    if last_ms >= end_ms {
                        break;
                    }
                    tokio::time::sleep(spec.page_gap()).await;
                }
                Err(e) => {
                    if !self.handle_stream_failure(symbol, &spec, &e).await {
                        partial = true;
                        break;
                    }
                }
            }
        }

        buffer.sort_by_key(|r| r.funding_time);
        buffer.dedup_by_key(|r| r.funding_time);
        buffer.retain(|r| r.funding_time >= window.start && r.funding_time <= window.end);

        let report = DataValidator::validate_funding_rates(&buffer);
        if self.reject_if_fatal(symbol, &spec, &report) {
            return Ok(StreamOutcome {
                stream: spec.label(),
                rows_written: 0,
                pages,
                partial,
                error: Some(format!("validation failed: {}", report.summary())),
            });
        }

        let written = self
            .save_with_retry(|| self.storage.save_funding_rates(symbol, &buffer))
            .await?;

        let keys: Vec<i64> = buffer
            .iter()
            .map(|r| r.funding_time.timestamp_millis())
            .collect();
        self.finish_stream(symbol, &spec, window, &keys, partial).await?;

        Ok(StreamOutcome {
            stream: spec.label(),
            rows_written: written,
            pages,
            partial,
            error: None,
        })
    }

    /// 최근 청산 주문 수집.
    async fn collect_liquidations(
        &self,
        symbol: &Symbol,
        window: BackfillWindow,
    ) -> Result<StreamOutcome> {
        let spec = StreamSpec::Liquidations;
        let mut partial = false;

        let mut rows: Vec<Liquidation> = loop {
            match self
                .api
                .fetch_liquidations(symbol, LIQUIDATION_PAGE_LIMIT)
                .await
            {
                Ok(rows) => break rows,
                Err(e) => {
                    if !self.handle_stream_failure(symbol, &spec, &e).await {
                        partial = true;
                        break Vec::new();
                    }
                }
            }
        };

        rows.sort_by_key(|r| r.order_id);
        rows.dedup_by_key(|r| r.order_id);
        rows.retain(|r| r.time >= window.start && r.time <= window.end);
        rows.sort_by_key(|r| r.time);

        let written = self
            .save_with_retry(|| self.storage.save_liquidations(symbol, &rows))
            .await?;

        let keys: Vec<i64> = rows.iter().map(|r| r.order_id).collect();
        self.finish_stream(symbol, &spec, window, &keys, partial).await?;

        Ok(StreamOutcome {
            stream: spec.label(),
            rows_written: written,
            pages: 1,
            partial,
            error: None,
        })
    }

    /// 상위 트레이더 롱숏 비율 수집.
    async fn collect_trader_ratio(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        window: BackfillWindow,
    ) -> Result<StreamOutcome> {
        let spec = StreamSpec::TraderRatio(period);
        let mut partial = false;

        let mut rows: Vec<LongShortRatio> = loop {
            match self
                .api
                .fetch_top_trader_ratio(symbol, period, RATIO_PAGE_LIMIT)
                .await
            {
                Ok(rows) => break rows,
                Err(e) => {
                    if !self.handle_stream_failure(symbol, &spec, &e).await {
                        partial = true;
                        break Vec::new();
                    }
                }
            }
        };

        rows.sort_by_key(|r| r.time);
        rows.dedup_by_key(|r| r.time);
        rows.retain(|r| r.time >= window.start && r.time <= window.end);

        let written = self
            .save_with_retry(|| self.storage.save_long_short_ratios(symbol, period, &rows))
            .await?;

        let keys: Vec<i64> = rows.iter().map(|r| r.time.timestamp_millis()).collect();
        self.finish_stream(symbol, &spec, window, &keys, partial).await?;

        Ok(StreamOutcome {
            stream: spec.label(),
            rows_written: written,
            pages: 1,
            partial,
            error: None,
        })
    }

    /// 호가창 스냅샷 한 장 수집.
    async fn collect_depth(&self, symbol: &Symbol) -> Result<StreamOutcome> {
        let spec = StreamSpec::Depth;

        let snapshot = match self.api.fetch_order_book(symbol, self.order_book_depth).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return Ok(StreamOutcome {
                    stream: spec.label(),
                    rows_written: 0,
                    pages: 1,
                    partial: matches!(e, ExchangeError::CircuitOpen { .. }),
                    error: Some(e.to_string()),
                });
            }
        };

        if snapshot.is_crossed() {
            self.tracker.record(
                "validation",
                "crossed order book snapshot rejected",
                vec![("symbol", symbol.to_string())],
                ErrorSeverity::Warning,
            );
            return Ok(StreamOutcome {
                stream: spec.label(),
                rows_written: 0,
                pages: 1,
                partial: false,
                error: Some("crossed order book".to_string()),
            });
        }

        let written = self
            .save_with_retry(|| self.storage.save_depth_snapshot(symbol, &snapshot))
            .await?;

        Ok(StreamOutcome {
            stream: spec.label(),
            rows_written: written,
            pages: 1,
            partial: false,
            error: None,
        })
    }

    /// 스트림 호출 실패 처리.
    ///
    /// 반환값이 true면 같은 커서에서 계속, false면 스트림을 중단합니다
    /// (회로 열림이나 재시도 불가 에러).
    async fn handle_stream_failure(
        &self,
        symbol: &Symbol,
        spec: &StreamSpec,
        error: &ExchangeError,
    ) -> bool {
        if matches!(error, ExchangeError::CircuitOpen { .. }) {
            warn!(
                symbol = %symbol,
                stream = %spec.label(),
                "회로 열림, 이 스트림은 이번 회차에서 건너뜀"
            );
            self.tracker.record(
                "circuit_open",
                error.to_string(),
                vec![("symbol", symbol.to_string()), ("stream", spec.label())],
                ErrorSeverity::Warning,
            );
            return false;
        }

        if !error.is_retryable() {
            self.tracker.record(
                "collector_stream_error",
                error.to_string(),
                vec![("symbol", symbol.to_string()), ("stream", spec.label())],
                ErrorSeverity::Error,
            );
            return false;
        }

        // 재시도 예산 소진 후에도 일시적 에러: 잠시 쉬고 같은 커서에서 재개
        self.tracker.record(
            "collector_stream_error",
            error.to_string(),
            vec![("symbol", symbol.to_string()), ("stream", spec.label())],
            ErrorSeverity::Warning,
        );
        tokio::time::sleep(FAILURE_PAUSE).await;
        true
    }

    /// 치명적 검사 실패 시 배치를 거부하고 기록합니다.
    fn reject_if_fatal(
        &self,
        symbol: &Symbol,
        spec: &StreamSpec,
        report: &ValidationReport,
    ) -> bool {
        if !report.is_fatal() {
            if !report.passed() {
                warn!(
                    symbol = %symbol,
                    stream = %spec.label(),
                    summary = %report.summary(),
                    "비치명적 품질 경고, 저장 계속"
                );
            }
            return false;
        }

        self.tracker.record(
            "validation",
            format!("batch rejected: {}", report.summary()),
            vec![("symbol", symbol.to_string()), ("stream", spec.label())],
            ErrorSeverity::Error,
        );
        true
    }

    /// 저장 실패는 한 번만 재시도합니다.
    async fn save_with_retry<F, Fut>(&self, op: F) -> std::result::Result<usize, DataError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<usize, DataError>>,
    {
        match op().await {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "저장 실패, 한 번 재시도");
                op().await
            }
            result => result,
        }
    }

    /// 스트림 완료 처리: 버전 레코드를 남깁니다.
    async fn finish_stream(
        &self,
        symbol: &Symbol,
        spec: &StreamSpec,
        window: BackfillWindow,
        keys: &[i64],
        partial: bool,
    ) -> Result<()> {
        if keys.is_empty() {
            debug!(symbol = %symbol, stream = %spec.label(), "저장할 레코드 없음");
            return Ok(());
        }

        let version = DataVersion {
            table: spec.table().to_string(),
            symbol: symbol.clone(),
            window_start: window.start,
            window_end: window.end,
            record_count: keys.len() as i64,
            checksum: content_checksum(spec.table(), symbol, keys),
            created_at: Utc::now(),
        };

        self.storage.save_data_version(&version).await?;

        info!(
            symbol = %symbol,
            stream = %spec.label(),
            records = keys.len(),
            partial = partial,
            checksum = %version.checksum[..12.min(version.checksum.len())],
            "스트림 백필 완료"
        );
        Ok(())
    }
}

/// 결정적 내용 해시: 테이블, 심볼, 정렬된 키 목록의 SHA-256.
pub fn content_checksum(table: &str, symbol: &Symbol, keys: &[i64]) -> String {
    let mut sorted = keys.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    hasher.update(b"|");
    hasher.update(symbol.to_exchange().as_bytes());
    for key in sorted {
        hasher.update(b"|");
        hasher.update(key.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}
