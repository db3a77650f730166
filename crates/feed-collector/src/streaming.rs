//! 실시간 스트리밍 수집기.
//!
//! WebSocket 이벤트를 종류별 버퍼에 모아 배치 크기(기본 10) 또는
//! 플러시 간격(기본 100ms) 중 먼저 도달하는 조건에서 저장소로
//! 플러시하고 캐시의 최신 값을 갱신합니다.
//!
//! `stop` 신호를 받으면 진행 중인 배치를 플러시한 뒤 루프를 종료하므로
//! 전달 중이던 배치가 유실되지 않습니다.

use crate::error::Result;
use feed_core::{Candle, ErrorSeverity, ErrorTracker, Liquidation, Symbol, Timeframe};
use feed_data::{DataError, RedisCache, StorageDriver};
use feed_exchange::{ConnectionState, MarkPriceUpdate, StreamEvent};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// 스트리밍 수집기 설정.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// 플러시를 일으키는 버퍼 크기
    pub batch_size: usize,
    /// 플러시 간격
    pub flush_interval: Duration,
    /// 최신 값 캐시 TTL (초)
    pub cache_ttl_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_millis(100),
            cache_ttl_secs: 300,
        }
    }
}

/// 스트리밍 수집 통계.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamingStats {
    /// 수신한 데이터 이벤트 수
    pub events: u64,
    /// 플러시 횟수
    pub flushes: u64,
    /// 저장된 행 수
    pub rows_written: u64,
    /// 캐시 갱신 횟수
    pub cache_updates: u64,
    /// 연결 끊김 횟수
    pub connection_drops: u64,
}

/// 종류별 배치 버퍼.
#[derive(Default)]
struct Buffers {
    klines: HashMap<(Symbol, Timeframe), Vec<Candle>>,
    liquidations: HashMap<Symbol, Vec<Liquidation>>,
    /// 마크 가격은 저장하지 않고 최신 값만 캐시
    marks: HashMap<Symbol, MarkPriceUpdate>,
    pending: usize,
}

impl Buffers {
    fn clear(&mut self) {
        self.klines.clear();
        self.liquidations.clear();
        self.marks.clear();
        self.pending = 0;
    }
}

/// 실시간 스트리밍 수집기.
pub struct StreamingCollector {
    storage: Arc<dyn StorageDriver>,
    cache: Option<RedisCache>,
    tracker: Arc<ErrorTracker>,
    config: StreamingConfig,
}

impl StreamingCollector {
    pub fn new(
        storage: Arc<dyn StorageDriver>,
        cache: Option<RedisCache>,
        tracker: Arc<ErrorTracker>,
        config: StreamingConfig,
    ) -> Self {
        Self {
            storage,
            cache,
            tracker,
            config,
        }
    }

    /// 이벤트 스트림을 소비합니다.
    ///
    /// 이벤트 채널이 닫히거나 `stop`이 true가 되면 마지막 배치를
    /// 플러시한 뒤 통계를 반환합니다.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<StreamEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<StreamingStats> {
        let mut stats = StreamingStats::default();
        let mut buffers = Buffers::default();

        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // 첫 tick은 즉시 발생하므로 소비하고 시작
        interval.tick().await;

        info!(
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            "스트리밍 수집 시작"
        );

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.absorb(event, &mut buffers, &mut stats);
                        if buffers.pending >= self.config.batch_size {
                            self.flush(&mut buffers, &mut stats).await;
                        }
                    }
                    None => {
                        // 스트림 종료: 남은 배치를 플러시하고 종료
                        self.flush(&mut buffers, &mut stats).await;
                        break;
                    }
                },
                _ = interval.tick() => {
                    if buffers.pending > 0 {
                        self.flush(&mut buffers, &mut stats).await;
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        self.flush(&mut buffers, &mut stats).await;
                        break;
                    }
                }
            }
        }

        info!(
            events = stats.events,
            flushes = stats.flushes,
            rows = stats.rows_written,
            "스트리밍 수집 종료"
        );
        Ok(stats)
    }

    /// 이벤트를 버퍼에 반영합니다.
    fn absorb(&self, event: StreamEvent, buffers: &mut Buffers, stats: &mut StreamingStats) {
        match event {
            StreamEvent::Kline {
                symbol,
                timeframe,
                candle,
            } => {
                stats.events += 1;
                buffers.pending += 1;
                buffers
                    .klines
                    .entry((symbol, timeframe))
                    .or_default()
                    .push(candle);
            }
            StreamEvent::Liquidation {
                symbol,
                liquidation,
            } => {
                stats.events += 1;
                buffers.pending += 1;
                buffers
                    .liquidations
                    .entry(symbol)
                    .or_default()
                    .push(liquidation);
            }
            StreamEvent::MarkPrice { symbol, update } => {
                stats.events += 1;
                buffers.pending += 1;
                // 최신 값만 유지
                buffers.marks.insert(symbol, update);
            }
            StreamEvent::StateChanged(state) => {
                info!(state = %state, "스트림 연결 상태 전이");
                if state == ConnectionState::Disconnected {
                    stats.connection_drops += 1;
                }
            }
        }
    }

    /// 모든 버퍼를 저장소/캐시로 플러시합니다.
    async fn flush(&self, buffers: &mut Buffers, stats: &mut StreamingStats) {
        if buffers.pending == 0 {
            return;
        }

        stats.flushes += 1;
        debug!(pending = buffers.pending, "배치 플러시");

        for ((symbol, timeframe), candles) in buffers.klines.drain() {
            // 같은 open_time의 중간 업데이트는 마지막 것만 반영
            let mut candles = candles;
            candles.sort_by_key(|c| c.open_time);
            let deduped = dedup_keep_last(candles, |c| c.open_time);

            match self.save_once_retry(&symbol, || {
                self.storage.save_candles(&symbol, timeframe, &deduped)
            })
            .await
            {
                Ok(written) => {
                    stats.rows_written += written as u64;
                    if let Some(last) = deduped.last() {
                        self.cache_latest(&symbol, "latest_kline", last, stats).await;
                    }
                }
                Err(_) => {
                    // 기록은 save_once_retry에서 완료. 배치는 폐기하고 계속.
                }
            }
        }

        for (symbol, liquidations) in buffers.liquidations.drain() {
            match self.save_once_retry(&symbol, || {
                self.storage.save_liquidations(&symbol, &liquidations)
            })
            .await
            {
                Ok(written) => {
                    stats.rows_written += written as u64;
                    if let Some(last) = liquidations.last() {
                        self.cache_latest(&symbol, "latest_liquidation", last, stats).await;
                    }
                }
                Err(_) => {}
            }
        }

        for (symbol, mark) in buffers.marks.drain() {
            self.cache_mark(&symbol, &mark, stats).await;
        }

        buffers.clear();
    }

    /// 저장 실패 시 한 번 재시도하고, 최종 실패는 추적기에 기록합니다.
    async fn save_once_retry<F, Fut>(
        &self,
        symbol: &Symbol,
        op: F,
    ) -> std::result::Result<usize, DataError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<usize, DataError>>,
    {
        let result = match op().await {
            Err(e) if e.is_retryable() => {
                warn!(symbol = %symbol, error = %e, "저장 실패, 한 번 재시도");
                op().await
            }
            result => result,
        };

        if let Err(e) = &result {
            self.tracker.record(
                e.kind(),
                e.to_string(),
                vec![("symbol", symbol.to_string())],
                ErrorSeverity::Error,
            );
        }

        result
    }

    /// 최신 값을 캐시에 기록합니다. 캐시가 없으면 건너뜁니다.
    async fn cache_latest<T: Serialize>(
        &self,
        symbol: &Symbol,
        kind: &str,
        value: &T,
        stats: &mut StreamingStats,
    ) {
        let Some(cache) = &self.cache else {
            return;
        };

        let key = RedisCache::key(kind, symbol);
        match cache
            .set_with_ttl(&key, value, self.config.cache_ttl_secs)
            .await
        {
            Ok(()) => stats.cache_updates += 1,
            Err(e) => warn!(key = %key, error = %e, "캐시 갱신 실패"),
        }
    }

    async fn cache_mark(
        &self,
        symbol: &Symbol,
        mark: &MarkPriceUpdate,
        stats: &mut StreamingStats,
    ) {
        let Some(cache) = &self.cache else {
            return;
        };

        // 마크 가격은 시간에 민감하므로 짧은 TTL 사용
        let payload = CachedMark {
            time_ms: mark.time.timestamp_millis(),
            mark_price: mark.mark_price.to_string(),
            funding_rate: mark.funding_rate.to_string(),
            next_funding_ms: mark.next_funding_time.timestamp_millis(),
        };

        let key = RedisCache::key("latest_mark", symbol);
        match cache.set_with_ttl(&key, &payload, 60).await {
            Ok(()) => stats.cache_updates += 1,
            Err(e) => warn!(key = %key, error = %e, "캐시 갱신 실패"),
        }
    }
}

/// 캐시용 마크 가격 페이로드.
#[derive(Debug, Serialize, serde::Deserialize)]
struct CachedMark {
    time_ms: i64,
    mark_price: String,
    funding_rate: String,
    next_funding_ms: i64,
}

/// 키 기준으로 중복을 제거하되 마지막 항목을 유지합니다.
fn dedup_keep_last<T, K: PartialEq + Copy>(items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut result: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if let Some(last) = result.last() {
            if key(last) == key(&item) {
                result.pop();
            }
        }
        result.push(item);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keep_last() {
        let items = vec![(1, "a"), (1, "b"), (2, "c"), (2, "d"), (3, "e")];
        let deduped = dedup_keep_last(items, |(k, _)| *k);
        assert_eq!(deduped, vec![(1, "b"), (2, "d"), (3, "e")]);
    }

    #[test]
    fn test_default_config() {
        let config = StreamingConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.flush_interval, Duration::from_millis(100));
    }
}
