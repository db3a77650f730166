//! 시스템 헬스 체크 및 에러 모니터 리포트.
//!
//! 저장소/캐시/거래소 연결과 데이터 신선도(최근 캔들 10분 이내)를
//! 확인합니다.

use chrono::{DateTime, Duration, Utc};
use feed_core::{ErrorTracker, Symbol, Timeframe};
use feed_data::{RedisCache, StorageDriver};
use feed_exchange::{BreakerRegistry, FuturesApi};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 데이터 신선도 기준 (분).
const FRESHNESS_LIMIT_MINUTES: i64 = 10;

/// 헬스 체크 결과.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// 저장소 연결
    pub database: bool,
    /// 캐시 연결 (구성되지 않았으면 None)
    pub cache: Option<bool>,
    /// 거래소 연결
    pub exchange: bool,
    /// 데이터 신선도 (최근 캔들 ≤ 10분)
    pub data_fresh: bool,
    /// 가장 최근 캔들 시간
    pub latest_candle: Option<DateTime<Utc>>,
}

impl HealthReport {
    /// 전체 상태.
    pub fn healthy(&self) -> bool {
        self.database && self.exchange && self.data_fresh && self.cache.unwrap_or(true)
    }

    /// 사람이 읽을 수 있는 표를 출력합니다.
    pub fn print(&self) {
        let status = if self.healthy() { "HEALTHY" } else { "DEGRADED" };
        println!("\n{}", "=".repeat(60));
        println!("SYSTEM HEALTH CHECK - {}", status);
        println!("{}", "=".repeat(60));

        let line = |name: &str, ok: bool| {
            println!("  {:<16} {}", name, if ok { "PASS" } else { "FAIL" });
        };

        line("database", self.database);
        match self.cache {
            Some(ok) => line("cache", ok),
            None => println!("  {:<16} SKIP (not configured)", "cache"),
        }
        line("exchange", self.exchange);
        line("data_freshness", self.data_fresh);

        if let Some(latest) = self.latest_candle {
            println!("  latest candle:   {}", latest);
        }
        println!("{}", "=".repeat(60));
    }
}

/// 헬스 체크를 실행합니다.
pub async fn run_health_check(
    storage: &Arc<dyn StorageDriver>,
    cache: Option<&RedisCache>,
    api: &Arc<dyn FuturesApi>,
    symbol: &Symbol,
    timeframe: Timeframe,
) -> HealthReport {
    info!("헬스 체크 시작");

    let database = match storage.health_check().await {
        Ok(ok) => ok,
        Err(e) => {
            error!(error = %e, "저장소 헬스 체크 실패");
            false
        }
    };

    let cache_ok = match cache {
        Some(cache) => Some(match cache.health_check().await {
            Ok(ok) => ok,
            Err(e) => {
                error!(error = %e, "캐시 헬스 체크 실패");
                false
            }
        }),
        None => None,
    };

    let exchange = match api.server_time().await {
        Ok(server_time) => {
            info!(server_time = %server_time, "거래소 연결 확인");
            true
        }
        Err(e) => {
            error!(error = %e, "거래소 헬스 체크 실패");
            false
        }
    };

    let latest_candle = match storage.latest_candle_time(symbol, timeframe).await {
        Ok(latest) => latest,
        Err(e) => {
            warn!(error = %e, "최근 캔들 조회 실패");
            None
        }
    };

    let data_fresh = latest_candle
        .map(|t| Utc::now() - t <= Duration::minutes(FRESHNESS_LIMIT_MINUTES))
        .unwrap_or(false);

    HealthReport {
        database,
        cache: cache_ok,
        exchange,
        data_fresh,
        latest_candle,
    }
}

/// 에러 모니터 리포트를 출력합니다.
///
/// 추적기의 유형별 카운트/발생률/최근 에러와 breaker 상태를 보여줍니다.
pub fn print_error_report(tracker: &ErrorTracker, breakers: &BreakerRegistry) {
    let summary = tracker.summary();

    println!("\n{}", "=".repeat(70));
    println!("ERROR MONITOR");
    println!("{}", "=".repeat(70));
    println!("total errors: {}", summary.total_errors);

    if !summary.top_kinds.is_empty() {
        println!("\ntop error kinds:");
        for (kind, count) in &summary.top_kinds {
            let rate = summary.rates_per_minute.get(kind).copied().unwrap_or(0.0);
            println!("  {:<28} {:>6}  ({:.2}/min)", kind, count, rate);
        }
    }

    if !summary.recent_errors.is_empty() {
        println!("\nrecent errors:");
        for record in summary.recent_errors.iter().take(5) {
            let message: String = record.message.chars().take(60).collect();
            println!(
                "  [{}] {} {}: {}",
                record.timestamp.format("%H:%M:%S"),
                record.severity,
                record.kind,
                message
            );
        }
    }

    let stats = breakers.all_stats();
    if !stats.is_empty() {
        println!("\ncircuit breakers:");
        for stat in stats {
            println!(
                "  {:<24} {:<10} calls={} ok={} fail={} rejected={} ({:.1}%)",
                stat.name,
                stat.state.to_string(),
                stat.total_calls,
                stat.successful_calls,
                stat.failed_calls,
                stat.rejected_calls,
                stat.success_rate
            );
        }
    }

    println!("{}", "=".repeat(70));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_requires_all_checks() {
        let report = HealthReport {
            database: true,
            cache: Some(true),
            exchange: true,
            data_fresh: true,
            latest_candle: Some(Utc::now()),
        };
        assert!(report.healthy());

        let degraded = HealthReport {
            exchange: false,
            ..report.clone()
        };
        assert!(!degraded.healthy());
    }

    #[test]
    fn test_missing_cache_does_not_degrade() {
        let report = HealthReport {
            database: true,
            cache: None,
            exchange: true,
            data_fresh: true,
            latest_candle: Some(Utc::now()),
        };
        assert!(report.healthy());
    }
}
