//! Circuit breaker 구현.
//!
//! 외부 서비스 장애 시 연쇄 실패를 방지합니다.
//!
//! # 상태 전이
//!
//! ```text
//! Closed ──[연속 실패 >= failure_threshold]──> Open
//!    ↑                                          │
//!    │                              [recovery_timeout 경과]
//!    │                                          ↓
//!    └──[연속 성공 >= success_threshold]── HalfOpen ──[실패]──> Open
//! ```
//!
//! 허용 판정과 상태 전이는 하나의 임계 구역에서 이루어지며,
//! 거부된 호출은 감싼 함수를 절대 실행하지 않습니다.

use crate::error::{ExchangeError, ExchangeResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Circuit breaker 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// 정상 상태 - 모든 요청 허용
    Closed,
    /// 장애 상태 - 모든 요청 즉시 거부
    Open,
    /// 복구 테스트 상태 - 제한된 시험 호출만 허용
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker 설정.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 연속 실패 임계치 (Closed → Open)
    pub failure_threshold: u32,
    /// Open 유지 시간 (이후 HalfOpen으로 전이)
    pub recovery_timeout: Duration,
    /// 연속 성공 임계치 (HalfOpen → Closed)
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// 새 설정 생성.
    pub fn new(failure_threshold: u32, recovery_timeout_secs: u64, success_threshold: u32) -> Self {
        Self {
            failure_threshold,
            recovery_timeout: Duration::from_secs(recovery_timeout_secs),
            success_threshold,
        }
    }

    /// 거래소 엔드포인트용 기본 설정.
    pub fn for_endpoint() -> Self {
        Self::new(10, 120, 2)
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    /// HalfOpen에서 진행 중인 시험 호출 수
    half_open_probes: u32,
    last_state_change: Instant,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_probes: 0,
            last_state_change: Instant::now(),
        }
    }
}

/// Circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    /// 새 circuit breaker 생성.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::new()),
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    /// 기본 설정으로 생성.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// breaker 이름 반환.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(circuit_breaker = %self.name, "breaker mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// 현재 상태 반환 (Open 타임아웃 전이 포함).
    pub fn state(&self) -> CircuitState {
        let mut state = self.lock();
        self.maybe_half_open(&mut state);
        state.state
    }

    /// 호출 허용 판정.
    ///
    /// 거부 시 `CircuitOpen` 에러를 반환하며, 허용과 상태 전이는
    /// 같은 잠금 아래에서 원자적으로 결정됩니다.
    pub fn try_acquire(&self) -> ExchangeResult<()> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let mut state = self.lock();
        self.maybe_half_open(&mut state);

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                Err(ExchangeError::CircuitOpen {
                    name: self.name.clone(),
                })
            }
            CircuitState::HalfOpen => {
                // 시험 호출은 success_threshold개까지만 동시에 허용
                if state.half_open_probes < self.config.success_threshold {
                    state.half_open_probes += 1;
                    Ok(())
                } else {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    Err(ExchangeError::CircuitOpen {
                        name: self.name.clone(),
                    })
                }
            }
        }
    }

    /// 성공 기록.
    pub fn record_success(&self) {
        self.successful_calls.fetch_add(1, Ordering::Relaxed);

        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.half_open_probes = state.half_open_probes.saturating_sub(1);
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    self.transition(&mut state, CircuitState::Closed);
                    tracing::info!(
                        circuit_breaker = %self.name,
                        "circuit breaker recovered: half_open -> closed"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// 실패 기록.
    pub fn record_failure(&self) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);

        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    self.transition(&mut state, CircuitState::Open);
                    tracing::warn!(
                        circuit_breaker = %self.name,
                        failure_count = state.failure_count,
                        "circuit breaker tripped: closed -> open"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut state, CircuitState::Open);
                tracing::warn!(
                    circuit_breaker = %self.name,
                    "circuit breaker recovery failed: half_open -> open"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// 실패로 집계되지 않는 에러가 시험 호출 슬롯을 차지한 경우 반납.
    fn release_probe(&self) {
        let mut state = self.lock();
        if state.state == CircuitState::HalfOpen {
            state.half_open_probes = state.half_open_probes.saturating_sub(1);
        }
    }

    /// breaker를 통해 future를 실행합니다.
    ///
    /// 거부된 호출은 future를 poll하지 않고 즉시 `CircuitOpen`을 반환합니다.
    pub async fn call<T, Fut>(&self, fut: Fut) -> ExchangeResult<T>
    where
        Fut: Future<Output = ExchangeResult<T>>,
    {
        self.try_acquire()?;

        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.counts_as_breaker_failure() {
                    self.record_failure();
                } else {
                    self.release_probe();
                }
                Err(err)
            }
        }
    }

    /// 수동 리셋 (운영 용도).
    pub fn reset(&self) {
        let mut state = self.lock();
        self.transition(&mut state, CircuitState::Closed);
        tracing::info!(circuit_breaker = %self.name, "circuit breaker manually reset");
    }

    /// 통계 반환.
    pub fn stats(&self) -> BreakerStats {
        let state = self.lock();
        let total = self.total_calls.load(Ordering::Relaxed);
        let successful = self.successful_calls.load(Ordering::Relaxed);

        BreakerStats {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            total_calls: total,
            successful_calls: successful,
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            success_rate: if total > 0 {
                successful as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            time_in_state: state.last_state_change.elapsed(),
        }
    }

    fn maybe_half_open(&self, state: &mut BreakerState) {
        if state.state == CircuitState::Open
            && state.last_state_change.elapsed() >= self.config.recovery_timeout
        {
            self.transition(state, CircuitState::HalfOpen);
            tracing::info!(
                circuit_breaker = %self.name,
                "circuit breaker timeout elapsed: open -> half_open"
            );
        }
    }

    fn transition(&self, state: &mut BreakerState, new_state: CircuitState) {
        state.state = new_state;
        state.last_state_change = Instant::now();
        state.half_open_probes = 0;
        match new_state {
            CircuitState::Closed => {
                state.failure_count = 0;
                state.success_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }
}

/// Circuit breaker 통계.
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    /// 성공률 (%)
    pub success_rate: f64,
    pub time_in_state: Duration,
}

/// 이름 기반 circuit breaker 레지스트리.
///
/// 거래소 엔드포인트마다 전용 breaker를 생성/조회합니다.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    /// 새 레지스트리 생성.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    /// 엔드포인트 기본값(실패 10회, 복구 120초)으로 생성.
    pub fn with_endpoint_defaults() -> Self {
        Self::new(CircuitBreakerConfig::for_endpoint())
    }

    /// 이름으로 breaker를 조회하거나 생성합니다.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(|p| p.into_inner());
            if let Some(breaker) = breakers.get(name) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
                }),
        )
    }

    /// 모든 breaker의 통계를 반환합니다.
    pub fn all_stats(&self) -> Vec<BreakerStats> {
        let breakers = self.breakers.read().unwrap_or_else(|p| p.into_inner());
        let mut stats: Vec<BreakerStats> = breakers.values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// 모든 breaker를 리셋합니다.
    pub fn reset_all(&self) {
        let breakers = self.breakers.read().unwrap_or_else(|p| p.into_inner());
        for breaker in breakers.values() {
            breaker.reset();
        }
    }
}
