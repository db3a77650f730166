//! 환경변수 기반 설정.
//!
//! 표준 설정 키를 환경변수로 노출합니다:
//! - `DATABASE_TYPE` ∈ {relational, embedded_file, cloud_doc}
//! - `DATABASE_{HOST,PORT,NAME,USER,PASSWORD}` (relational)
//! - `EMBEDDED_PATH` (embedded_file)
//! - `CLOUD_{CREDENTIALS_PATH,URL}` (cloud_doc)
//! - `CACHE_{ENABLED,HOST,PORT,DB,POOL_SIZE}`
//! - `COLLECTION_{SYMBOLS,TIMEFRAMES,OI_PERIODS,HISTORICAL_DAYS,...}`
//! - `RETRY_*`, `BREAKER_*`
//! - `BINANCE_{API_KEY,TESTNET}`

use crate::error::{CollectorError, Result};
use feed_core::{Symbol, Timeframe};
use feed_data::{CacheConfig, DatabaseConfig, FirebaseConfig, SqliteConfig, StorageConfig};
use feed_exchange::{CircuitBreakerConfig, FuturesClientConfig, RetryPolicy};
use std::time::Duration;

/// 수집 대상 설정.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// 수집 심볼
    pub symbols: Vec<Symbol>,
    /// OHLCV 타임프레임
    pub timeframes: Vec<Timeframe>,
    /// 미결제약정/롱숏 비율 샘플링 주기
    pub oi_periods: Vec<Timeframe>,
    /// 과거 수집 일수
    pub historical_days: i64,
    /// 저장 배치 크기
    pub batch_size: usize,
    /// WebSocket 배치 크기
    pub ws_batch_size: usize,
    /// WebSocket 배치 플러시 간격 (밀리초)
    pub ws_batch_interval_ms: u64,
    /// 호가창 스냅샷 수집 여부
    pub collect_order_book: bool,
    /// 호가창 깊이
    pub order_book_depth: u32,
}

impl CollectionConfig {
    pub fn ws_batch_interval(&self) -> Duration {
        Duration::from_millis(self.ws_batch_interval_ms)
    }
}

/// 복원력 설정 (재시도 + 회로 차단기).
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

/// 데몬 모드 설정.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// 워크플로우 실행 주기 (분)
    pub interval_minutes: u64,
    /// 증분 수집 윈도우 (시간)
    pub incremental_hours: i64,
}

impl DaemonConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// 수집기 전체 설정.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 저장소 백엔드
    pub storage: StorageConfig,
    /// 캐시 설정 (비활성화 시 None)
    pub cache: Option<CacheConfig>,
    /// 거래소 클라이언트 설정
    pub exchange: FuturesClientConfig,
    /// 수집 대상
    pub collection: CollectionConfig,
    /// 복원력
    pub resilience: ResilienceConfig,
    /// 데몬 모드
    pub daemon: DaemonConfig,
}

impl CollectorConfig {
    /// 환경변수에서 설정을 로드합니다.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let storage = Self::storage_from_env()?;

        let cache = if env_var_bool("CACHE_ENABLED", true) {
            Some(CacheConfig {
                host: env_var_string("CACHE_HOST", "localhost"),
                port: env_var_parse("CACHE_PORT", 6379),
                db: env_var_parse("CACHE_DB", 0),
                password: std::env::var("CACHE_PASSWORD").ok(),
                default_ttl_secs: env_var_parse("CACHE_DEFAULT_TTL_SECS", 300),
                pool_size: env_var_parse("CACHE_POOL_SIZE", 50),
            })
        } else {
            None
        };

        let symbols = env_var_list("COLLECTION_SYMBOLS", "SOL/USDT")
            .iter()
            .map(|s| Symbol::parse(s))
            .collect();

        let timeframes = parse_timeframes(
            &env_var_list("COLLECTION_TIMEFRAMES", "1m,5m,15m,1h,4h,1d"),
        )?;
        let oi_periods = parse_timeframes(&env_var_list("COLLECTION_OI_PERIODS", "5m,15m,1h,4h"))?;

        Ok(Self {
            storage,
            cache,
            exchange: FuturesClientConfig::from_env(),
            collection: CollectionConfig {
                symbols,
                timeframes,
                oi_periods,
                historical_days: env_var_parse("COLLECTION_HISTORICAL_DAYS", 30),
                batch_size: env_var_parse("COLLECTION_BATCH_SIZE", 1000),
                ws_batch_size: env_var_parse("COLLECTION_WS_BATCH_SIZE", 10),
                ws_batch_interval_ms: env_var_parse("COLLECTION_WS_BATCH_INTERVAL_MS", 100),
                collect_order_book: env_var_bool("COLLECTION_ORDER_BOOK", false),
                order_book_depth: env_var_parse("COLLECTION_ORDER_BOOK_DEPTH", 100),
            },
            resilience: ResilienceConfig {
                retry: RetryPolicy {
                    max_retries: env_var_parse("RETRY_MAX_RETRIES", 5),
                    initial_delay: Duration::from_millis(env_var_parse(
                        "RETRY_INITIAL_DELAY_MS",
                        2000,
                    )),
                    max_delay: Duration::from_millis(env_var_parse("RETRY_MAX_DELAY_MS", 120_000)),
                    base: 2.0,
                    jitter: env_var_bool("RETRY_JITTER", true),
                },
                breaker: CircuitBreakerConfig::new(
                    env_var_parse("BREAKER_FAILURE_THRESHOLD", 10),
                    env_var_parse("BREAKER_RECOVERY_TIMEOUT_SECS", 120),
                    env_var_parse("BREAKER_SUCCESS_THRESHOLD", 2),
                ),
            },
            daemon: DaemonConfig {
                interval_minutes: env_var_parse("DAEMON_INTERVAL_MINUTES", 60),
                incremental_hours: env_var_parse("DAEMON_INCREMENTAL_HOURS", 24),
            },
        })
    }

    fn storage_from_env() -> Result<StorageConfig> {
        let kind = env_var_string("DATABASE_TYPE", "embedded_file");
        let backend = StorageConfig::backend_name(&kind)
            .map_err(|e| CollectorError::Config(e.to_string()))?;

        match backend {
            "timescale" => Ok(StorageConfig::Timescale(DatabaseConfig {
                host: env_var_string("DATABASE_HOST", "localhost"),
                port: env_var_parse("DATABASE_PORT", 5432),
                database: env_var_string("DATABASE_NAME", "futures_data"),
                user: env_var_string("DATABASE_USER", "postgres"),
                password: env_var_string("DATABASE_PASSWORD", ""),
                ..Default::default()
            })),
            "sqlite" => Ok(StorageConfig::Sqlite(SqliteConfig {
                path: env_var_string("EMBEDDED_PATH", "data/futures_data.db"),
                ..Default::default()
            })),
            "firebase" => {
                let url = std::env::var("CLOUD_URL").map_err(|_| {
                    CollectorError::Config(
                        "CLOUD_URL is required for the cloud_doc backend".to_string(),
                    )
                })?;
                let mut config = FirebaseConfig::new(url);
                config.credentials_path = std::env::var("CLOUD_CREDENTIALS_PATH").ok();
                Ok(StorageConfig::Firebase(config))
            }
            _ => unreachable!(),
        }
    }
}

fn parse_timeframes(values: &[String]) -> Result<Vec<Timeframe>> {
    values
        .iter()
        .map(|v| {
            Timeframe::from_interval(v.trim())
                .ok_or_else(|| CollectorError::Config(format!("invalid timeframe: {}", v)))
        })
        .collect()
}

/// 환경변수에서 값을 파싱합니다 (없거나 실패 시 기본값).
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 환경변수에서 문자열을 읽습니다.
fn env_var_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// 환경변수에서 bool 값을 파싱합니다.
fn env_var_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// 환경변수에서 쉼표 구분 목록을 파싱합니다.
fn env_var_list(key: &str, default: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeframes() {
        let values = vec!["5m".to_string(), "1h".to_string()];
        let parsed = parse_timeframes(&values).unwrap();
        assert_eq!(parsed, vec![Timeframe::M5, Timeframe::H1]);

        let invalid = vec!["7m".to_string()];
        assert!(parse_timeframes(&invalid).is_err());
    }

    #[test]
    fn test_env_var_list_parsing() {
        std::env::set_var("TEST_FEED_SYMBOL_LIST", "SOL/USDT, BTC/USDT ,");
        let list = env_var_list("TEST_FEED_SYMBOL_LIST", "");
        assert_eq!(list, vec!["SOL/USDT", "BTC/USDT"]);
        std::env::remove_var("TEST_FEED_SYMBOL_LIST");
    }

    #[test]
    fn test_env_var_bool_default() {
        assert!(env_var_bool("TEST_FEED_MISSING_BOOL", true));
        assert!(!env_var_bool("TEST_FEED_MISSING_BOOL", false));
    }
}
