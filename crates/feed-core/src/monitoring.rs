//! 에러 추적 및 알림 모듈.
//!
//! 프로세스 전역의 에러 카운터, 최근 에러 링 버퍼, 에러 유형별 발생률을
//! 관리하고 임계치 초과 시 알림을 발행합니다.
//! - 에러 유형(kind)은 안정적인 문자열 키 (예: "network", "api_ohlcv_error")
//! - 추적기는 시작 시 한 번 생성되어 `Arc`로 주입됩니다 (전역 싱글톤 없음)
//! - 핫패스에서 I/O 없음: 잠금 아래 작업은 O(1), 알림 싱크는 잠금 해제 후 호출

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{error, warn};

/// 에러 심각도.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorSeverity {
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// 단일 에러 레코드.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// 발생 시간
    pub timestamp: DateTime<Utc>,
    /// 에러 유형
    pub kind: String,
    /// 에러 메시지
    pub message: String,
    /// 추가 컨텍스트 (심볼, 타임프레임 등)
    pub context: HashMap<String, String>,
    /// 심각도
    pub severity: ErrorSeverity,
    /// 해당 유형의 누적 발생 횟수
    pub count: u64,
}

/// 에러 요약.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// 총 에러 수
    pub total_errors: u64,
    /// 유형별 누적 카운트
    pub by_kind: BTreeMap<String, u64>,
    /// 유형별 분당 발생률 (최근 5분 기준)
    pub rates_per_minute: BTreeMap<String, f64>,
    /// 최근 에러 (최대 10개, 최신 순)
    pub recent_errors: Vec<ErrorRecord>,
    /// 발생 수 상위 유형
    pub top_kinds: Vec<(String, u64)>,
}

/// 알림 싱크.
///
/// 구현체는 블로킹 I/O를 수행해서는 안 됩니다. 기본 구현은 로그 출력입니다.
pub trait AlertSink: Send + Sync {
    fn alert(&self, record: &ErrorRecord, window_count: u64, rate_per_minute: f64);
}

/// 로그 전용 알림 싱크 (기본).
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, record: &ErrorRecord, window_count: u64, rate_per_minute: f64) {
        error!(
            kind = %record.kind,
            severity = %record.severity,
            total = record.count,
            window_count = window_count,
            rate_per_min = format!("{:.2}", rate_per_minute),
            message = %record.message,
            "[ERROR ALERT]"
        );
    }
}

/// 에러 추적기 설정.
#[derive(Debug, Clone)]
pub struct ErrorTrackerConfig {
    /// 링 버퍼 최대 크기
    pub max_history: usize,
    /// 알림 발행 기준: 윈도우 내 발생 수
    pub alert_count_threshold: u64,
    /// 알림 발행 기준: 분당 발생률
    pub alert_rate_threshold: f64,
    /// 발생률 계산 윈도우 (초)
    pub rate_window_secs: i64,
    /// 유형별 알림 쿨다운 (초)
    pub alert_cooldown_secs: i64,
}

impl Default for ErrorTrackerConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            alert_count_threshold: 10,
            alert_rate_threshold: 5.0,
            rate_window_secs: 300,
            alert_cooldown_secs: 300,
        }
    }
}

struct TrackerInner {
    /// 총 에러 수
    total: u64,
    /// 유형별 누적 카운트
    counts: HashMap<String, u64>,
    /// 최근 에러 링 (오래된 것부터)
    history: VecDeque<ErrorRecord>,
    /// 유형별 최근 발생 시각 (발생률 계산용)
    timestamps: HashMap<String, VecDeque<DateTime<Utc>>>,
    /// 유형별 마지막 알림 시각
    last_alert: HashMap<String, DateTime<Utc>>,
}

/// 에러 추적기 (스레드 안전).
///
/// 모든 변경 연산은 단일 뮤텍스로 직렬화되며 읽기는 일관된 스냅샷을 반환합니다.
pub struct ErrorTracker {
    inner: Mutex<TrackerInner>,
    config: ErrorTrackerConfig,
    sink: Box<dyn AlertSink>,
}

impl ErrorTracker {
    /// 새 추적기 생성.
    pub fn new(config: ErrorTrackerConfig) -> Self {
        Self::with_sink(config, Box::new(LogAlertSink))
    }

    /// 기본 설정으로 생성.
    pub fn with_defaults() -> Self {
        Self::new(ErrorTrackerConfig::default())
    }

    /// 사용자 정의 알림 싱크로 생성.
    pub fn with_sink(config: ErrorTrackerConfig, sink: Box<dyn AlertSink>) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                total: 0,
                counts: HashMap::new(),
                history: VecDeque::with_capacity(config.max_history),
                timestamps: HashMap::new(),
                last_alert: HashMap::new(),
            }),
            config,
            sink,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("ErrorTracker mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// 에러 기록.
    ///
    /// 카운터 증가, 링 버퍼 추가, 알림 정책 평가를 수행합니다.
    pub fn record(
        &self,
        kind: &str,
        message: impl Into<String>,
        context: Vec<(&str, String)>,
        severity: ErrorSeverity,
    ) {
        let now = Utc::now();
        let window = Duration::seconds(self.config.rate_window_secs);

        let (record, fire_alert, window_count, rate) = {
            let mut inner = self.lock();

            inner.total += 1;
            let count = inner.counts.entry(kind.to_string()).or_insert(0);
            *count += 1;
            let count = *count;

            let timestamps = inner.timestamps.entry(kind.to_string()).or_default();
            timestamps.push_back(now);
            while let Some(front) = timestamps.front() {
                if now - *front > window {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }
            let window_count = timestamps.len() as u64;
            let rate = window_count as f64 / (self.config.rate_window_secs as f64 / 60.0);

            let record = ErrorRecord {
                timestamp: now,
                kind: kind.to_string(),
                message: message.into(),
                context: context
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                severity,
                count,
            };

            if inner.history.len() >= self.config.max_history {
                inner.history.pop_front();
            }
            inner.history.push_back(record.clone());

            // 알림 정책: 윈도우 카운트 또는 발생률 초과, 유형별 쿨다운 적용
            let threshold_hit = window_count > self.config.alert_count_threshold
                || rate > self.config.alert_rate_threshold;
            let cooled_down = inner
                .last_alert
                .get(kind)
                .map(|t| now - *t >= Duration::seconds(self.config.alert_cooldown_secs))
                .unwrap_or(true);

            let fire_alert = threshold_hit && cooled_down;
            if fire_alert {
                inner.last_alert.insert(kind.to_string(), now);
            }

            (record, fire_alert, window_count, rate)
        };

        match severity {
            ErrorSeverity::Critical => error!(
                kind = %record.kind,
                context = ?record.context,
                message = %record.message,
                "[CRITICAL]"
            ),
            ErrorSeverity::Error => error!(
                kind = %record.kind,
                context = ?record.context,
                message = %record.message,
                "error recorded"
            ),
            ErrorSeverity::Warning => warn!(
                kind = %record.kind,
                message = %record.message,
                "warning recorded"
            ),
        }

        if fire_alert {
            self.sink.alert(&record, window_count, rate);
        }
    }

    /// 특정 유형의 분당 발생률 (최근 윈도우 기준).
    pub fn rate_per_minute(&self, kind: &str) -> f64 {
        let now = Utc::now();
        let window = Duration::seconds(self.config.rate_window_secs);
        let inner = self.lock();

        let recent = inner
            .timestamps
            .get(kind)
            .map(|ts| ts.iter().filter(|t| now - **t <= window).count())
            .unwrap_or(0);

        recent as f64 / (self.config.rate_window_secs as f64 / 60.0)
    }

    /// 종합 요약 반환.
    pub fn summary(&self) -> ErrorSummary {
        let now = Utc::now();
        let window = Duration::seconds(self.config.rate_window_secs);
        let inner = self.lock();

        let by_kind: BTreeMap<String, u64> =
            inner.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();

        let rates_per_minute = inner
            .timestamps
            .iter()
            .map(|(k, ts)| {
                let recent = ts.iter().filter(|t| now - **t <= window).count();
                let rate = recent as f64 / (self.config.rate_window_secs as f64 / 60.0);
                (k.clone(), rate)
            })
            .collect();

        let recent_errors: Vec<ErrorRecord> =
            inner.history.iter().rev().take(10).cloned().collect();

        let mut top_kinds: Vec<(String, u64)> =
            inner.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        top_kinds.sort_by(|a, b| b.1.cmp(&a.1));
        top_kinds.truncate(5);

        ErrorSummary {
            total_errors: inner.total,
            by_kind,
            rates_per_minute,
            recent_errors,
            top_kinds,
        }
    }

    /// 특정 유형의 최근 에러 조회.
    pub fn recent_by_kind(&self, kind: &str, limit: usize) -> Vec<ErrorRecord> {
        let inner = self.lock();
        inner
            .history
            .iter()
            .rev()
            .filter(|r| r.kind == kind)
            .take(limit)
            .cloned()
            .collect()
    }

    /// 스냅샷을 JSON 파일로 내보냅니다.
    pub fn export(&self, path: &std::path::Path) -> std::io::Result<()> {
        let summary = self.summary();
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// 모든 카운터와 히스토리를 초기화합니다.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.total = 0;
        inner.counts.clear();
        inner.history.clear();
        inner.timestamps.clear();
        inner.last_alert.clear();
    }

    /// 특정 유형만 초기화합니다.
    pub fn clear_kind(&self, kind: &str) {
        let mut inner = self.lock();
        if let Some(count) = inner.counts.remove(kind) {
            inner.total = inner.total.saturating_sub(count);
        }
        inner.timestamps.remove(kind);
        inner.history.retain(|r| r.kind != kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);

    impl AlertSink for CountingSink {
        fn alert(&self, _record: &ErrorRecord, _count: u64, _rate: f64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_record_and_summary() {
        let tracker = ErrorTracker::with_defaults();

        tracker.record(
            "api_ohlcv_error",
            "connection refused",
            vec![("symbol", "SOL/USDT".to_string())],
            ErrorSeverity::Error,
        );
        tracker.record("network", "timed out", vec![], ErrorSeverity::Warning);

        let summary = tracker.summary();
        assert_eq!(summary.total_errors, 2);
        assert_eq!(summary.by_kind.get("api_ohlcv_error"), Some(&1));
        assert_eq!(summary.recent_errors.len(), 2);
        // 최신 순
        assert_eq!(summary.recent_errors[0].kind, "network");
        assert_eq!(
            summary.recent_errors[1].context.get("symbol"),
            Some(&"SOL/USDT".to_string())
        );
    }

    #[test]
    fn test_ring_eviction() {
        let config = ErrorTrackerConfig {
            max_history: 5,
            ..Default::default()
        };
        let tracker = ErrorTracker::new(config);

        for i in 0..8 {
            tracker.record("storage", format!("error {}", i), vec![], ErrorSeverity::Error);
        }

        let summary = tracker.summary();
        assert_eq!(summary.total_errors, 8);
        // 링은 5개만 유지, 가장 오래된 것부터 제거
        assert_eq!(tracker.recent_by_kind("storage", 100).len(), 5);
        assert_eq!(summary.recent_errors[0].message, "error 7");
    }

    #[test]
    fn test_alert_fires_over_threshold_with_cooldown() {
        let fired = Arc::new(AtomicUsize::new(0));
        let config = ErrorTrackerConfig {
            alert_count_threshold: 3,
            alert_rate_threshold: 1000.0, // 카운트 기준만 평가
            ..Default::default()
        };
        let tracker =
            ErrorTracker::with_sink(config, Box::new(CountingSink(Arc::clone(&fired))));

        for _ in 0..10 {
            tracker.record("rate_limit", "429", vec![], ErrorSeverity::Warning);
        }

        // 임계치 초과 후 첫 알림 한 번, 이후 쿨다운
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_kind() {
        let tracker = ErrorTracker::with_defaults();
        tracker.record("network", "a", vec![], ErrorSeverity::Error);
        tracker.record("timeout", "b", vec![], ErrorSeverity::Error);

        tracker.clear_kind("network");

        let summary = tracker.summary();
        assert_eq!(summary.total_errors, 1);
        assert!(summary.by_kind.get("network").is_none());
        assert_eq!(summary.by_kind.get("timeout"), Some(&1));
    }

    #[test]
    fn test_rate_computation() {
        let tracker = ErrorTracker::with_defaults();
        for _ in 0..10 {
            tracker.record("network", "x", vec![], ErrorSeverity::Error);
        }
        // 5분 윈도우에 10건 → 2건/분
        let rate = tracker.rate_per_minute("network");
        assert!((rate - 2.0).abs() < 1e-9);
    }
}
