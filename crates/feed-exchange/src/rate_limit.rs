//! 토큰 버킷 속도 제한.
//!
//! 거래소의 분당 요청 한도(기본 1200 req/min)를 클라이언트 측에서
//! 선제적으로 지킵니다. `acquire()`는 토큰이 생길 때까지 대기합니다.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// 토큰 버킷 속도 제한기.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    /// 분당 요청 수 기준으로 생성.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute as f64;
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity / 60.0,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = Instant::now();
    }

    /// 토큰 하나를 획득합니다. 부족하면 충전될 때까지 대기합니다.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// 현재 사용 가능한 토큰 수 (모니터링용).
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_within_capacity_is_immediate() {
        let limiter = RateLimiter::per_minute(1200);
        let started = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_acquire_waits_when_exhausted() {
        // 분당 600 = 초당 10 토큰, 용량 600
        let limiter = RateLimiter::per_minute(600);
        {
            let mut state = limiter.state.lock().await;
            state.tokens = 0.0;
            state.last_refill = Instant::now();
        }

        let started = Instant::now();
        limiter.acquire().await;
        // 토큰 1개 충전에 약 100ms 필요
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_available_reports_refill() {
        let limiter = RateLimiter::per_minute(1200);
        limiter.acquire().await;
        let available = limiter.available().await;
        assert!(available <= 1200.0);
        assert!(available > 1190.0);
    }
}
