//! 수집 통계.

use serde::Serialize;
use std::time::Duration;

/// 단일 스트림 수집 결과.
#[derive(Debug, Clone, Serialize)]
pub struct StreamOutcome {
    /// 스트림 이름 (예: "ohlcv_5m", "funding")
    pub stream: String,
    /// 저장된 행 수
    pub rows_written: usize,
    /// 호출한 페이지 수
    pub pages: usize,
    /// 회로 열림 등으로 일부만 수집됨
    pub partial: bool,
    /// 스트림을 중단시킨 에러
    pub error: Option<String>,
}

impl StreamOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && !self.partial
    }
}

/// 심볼 단위 수집 통계.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionStats {
    /// 시도한 스트림 수
    pub total_streams: usize,
    /// 완전히 성공한 스트림 수
    pub success: usize,
    /// 에러로 끝난 스트림 수
    pub errors: usize,
    /// 부분 수집 스트림 수
    pub partial: usize,
    /// 저장된 총 행 수
    pub total_rows: usize,
    /// 스트림별 상세 결과
    pub outcomes: Vec<StreamOutcome>,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CollectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 스트림 결과를 집계에 반영합니다.
    pub fn record(&mut self, outcome: StreamOutcome) {
        self.total_streams += 1;
        self.total_rows += outcome.rows_written;
        if outcome.error.is_some() {
            self.errors += 1;
        } else if outcome.partial {
            self.partial += 1;
        } else {
            self.success += 1;
        }
        self.outcomes.push(outcome);
    }

    /// 성공률 (%).
    pub fn success_rate(&self) -> f64 {
        if self.total_streams == 0 {
            0.0
        } else {
            self.success as f64 / self.total_streams as f64 * 100.0
        }
    }

    /// 통계 요약 로그 출력.
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            streams = self.total_streams,
            success = self.success,
            errors = self.errors,
            partial = self.partial,
            total_rows = self.total_rows,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "수집 완료"
        );

        for outcome in &self.outcomes {
            if let Some(error) = &outcome.error {
                tracing::error!(stream = %outcome.stream, error = %error, "스트림 실패");
            } else if outcome.partial {
                tracing::warn!(
                    stream = %outcome.stream,
                    rows = outcome.rows_written,
                    "스트림 부분 수집"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(stream: &str, rows: usize, partial: bool, error: Option<&str>) -> StreamOutcome {
        StreamOutcome {
            stream: stream.to_string(),
            rows_written: rows,
            pages: 1,
            partial,
            error: error.map(String::from),
        }
    }

    #[test]
    fn test_aggregation() {
        let mut stats = CollectionStats::new();
        stats.record(outcome("ohlcv_5m", 100, false, None));
        stats.record(outcome("oi_5m", 50, true, None));
        stats.record(outcome("funding", 0, false, Some("boom")));

        assert_eq!(stats.total_streams, 3);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.partial, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.total_rows, 150);
        assert!((stats.success_rate() - 33.333).abs() < 0.01);
    }
}
