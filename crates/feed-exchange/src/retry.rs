//! 지수 백오프 재시도.
//!
//! 재시도 가능한 에러(network, timeout, rate_limit, exchange_server)만
//! 예산 안에서 재시도하고, 그 외 에러는 즉시 전파합니다.
//! 예산 소진 시 마지막 에러를 그대로 반환합니다.

use crate::error::{ExchangeError, ExchangeResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 재시도 정책.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 최대 재시도 횟수 (첫 시도 제외)
    pub max_retries: u32,
    /// 초기 지연
    pub initial_delay: Duration,
    /// 최대 지연 (상한)
    pub max_delay: Duration,
    /// 지수 밑
    pub base: f64,
    /// 지터 적용 여부 (±50%)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // API 호출 기본값: 최대 5회, 2초에서 시작해 2분까지
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// 새 정책 생성.
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            base: 2.0,
            jitter: true,
        }
    }

    /// 지터를 비활성화합니다 (테스트용 결정적 지연).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// k번째 시도(0부터) 후 대기 시간.
    ///
    /// delay = min(max_delay, initial · base^k) × (1 ± 0.5)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64() * self.base.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());

        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            1.0
        };

        Duration::from_secs_f64(capped * factor)
    }
}

/// 재시도 정책에 따라 연산을 실행합니다.
///
/// `op`은 시도마다 새 future를 생성합니다. 합성 순서는 고정입니다:
/// `retry(|| breaker.call(http_call()))` — 열린 회로 거부(`circuit_open`)는
/// 재시도 예산을 소모하지 않고 즉시 전파됩니다.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> ExchangeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExchangeResult<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_millis(10),
            Duration::from_secs(1),
        )
        .without_jitter()
    }

    #[test]
    fn test_delay_schedule_without_jitter() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(10),
            Duration::from_millis(60),
        )
        .without_jitter();

        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
        // 상한에서 잘림
        assert_eq!(policy.delay_for(3), Duration::from_millis(60));
        assert_eq!(policy.delay_for(10), Duration::from_millis(60));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_secs(10),
        );

        for attempt in 0..4 {
            let nominal = 100.0 * 2f64.powi(attempt as i32);
            for _ in 0..50 {
                let delay = policy.delay_for(attempt).as_secs_f64() * 1000.0;
                assert!(
                    delay >= nominal * 0.5 - 1e-6 && delay <= nominal * 1.5 + 1e-6,
                    "attempt {}: delay {} outside [{}, {}]",
                    attempt,
                    delay,
                    nominal * 0.5,
                    nominal * 1.5
                );
            }
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        // timeout 4회 후 성공, max_retries=5 → 다섯 번째 시도에서 성공
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let started = Instant::now();
        let result = retry(&fast_policy(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 4 {
                    Err(ExchangeError::Timeout("slow".into()))
                } else {
                    Ok(n + 1)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 5);
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        // 총 대기 ≈ 10 + 20 + 40 + 80 = 150ms
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: ExchangeResult<()> = retry(&fast_policy(2), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::Network("connection reset".into()))
            }
        })
        .await;

        // 첫 시도 + 재시도 2회 = 3회 실행
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(ExchangeError::Network(msg)) => assert_eq!(msg, "connection reset"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_propagates_immediately() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: ExchangeResult<()> = retry(&fast_policy(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::Client { code: 400, message: "bad request".into() })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_circuit_open_bypasses_retry_budget() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: ExchangeResult<()> = retry(&fast_policy(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::CircuitOpen { name: "binance_ohlcv".into() })
            }
        })
        .await;

        assert!(matches!(result, Err(ExchangeError::CircuitOpen { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
