//! Redis 캐시.
//!
//! 스트리밍 수집기가 최신 값을 `종류:심볼` 키로 캐시합니다
//! (예: `latest_kline:SOLUSDT`). 값은 효율을 위해 bincode로
//! 이진 직렬화됩니다. 캐시는 선택 구성요소이며, 없으면 수집기는
//! 캐시 갱신을 건너뜁니다.

use crate::error::{DataError, Result};
use feed_core::Symbol;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// 캐시 설정.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    #[serde(default)]
    pub password: Option<String>,
    /// 기본 TTL (초)
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,
    /// 연결 풀 크기
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_ttl() -> u64 {
    300
}
fn default_pool_size() -> usize {
    50
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            default_ttl_secs: default_ttl(),
            pool_size: default_pool_size(),
        }
    }
}

impl CacheConfig {
    /// Redis 연결 URL.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// 캐시 통계.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub hit_rate: f64,
}

/// Redis 캐시 (스레드 안전).
#[derive(Clone)]
pub struct RedisCache {
    connection: Arc<Mutex<MultiplexedConnection>>,
    default_ttl_secs: u64,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    sets: Arc<AtomicU64>,
}

impl RedisCache {
    /// Redis에 연결합니다.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        info!(host = %config.host, port = config.port, "connecting to Redis");

        let client =
            Client::open(config.url()).map_err(|e| DataError::Cache(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DataError::Cache(e.to_string()))?;

        info!("Redis connection established");

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            default_ttl_secs: config.default_ttl_secs,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
        })
    }

    /// `종류:심볼` 형식의 캐시 키를 만듭니다.
    pub fn key(kind: &str, symbol: &Symbol) -> String {
        format!("{}:{}", kind, symbol.to_exchange())
    }

    /// 연결 상태를 확인합니다.
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let result: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(DataError::from)?;
        Ok(result == "PONG")
    }

    /// 기본 TTL로 값을 저장합니다.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.default_ttl_secs).await
    }

    /// 지정한 TTL로 값을 저장합니다.
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<()> {
        let packed =
            bincode::serialize(value).map_err(|e| DataError::Serialization(e.to_string()))?;

        let mut conn = self.connection.lock().await;
        let _: () = conn
            .set_ex(key, packed, ttl_secs)
            .await
            .map_err(DataError::from)?;

        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 값을 가져옵니다. 없으면 `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection.lock().await;
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(DataError::from)?;
        drop(conn);

        match value {
            Some(packed) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let parsed = bincode::deserialize(&packed)
                    .map_err(|e| DataError::Serialization(e.to_string()))?;
                Ok(Some(parsed))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// 여러 키를 파이프라인으로 한 번에 저장합니다.
    pub async fn set_multi<T: Serialize>(&self, items: &[(String, T)], ttl_secs: u64) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (key, value) in items {
            let packed =
                bincode::serialize(value).map_err(|e| DataError::Serialization(e.to_string()))?;
            pipe.set_ex(key, packed, ttl_secs).ignore();
        }

        let mut conn = self.connection.lock().await;
        let _: () = pipe.query_async(&mut *conn).await.map_err(DataError::from)?;

        self.sets.fetch_add(items.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// 여러 키를 파이프라인으로 한 번에 가져옵니다.
    pub async fn get_multi<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, T>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }

        let mut conn = self.connection.lock().await;
        let values: Vec<Option<Vec<u8>>> =
            pipe.query_async(&mut *conn).await.map_err(DataError::from)?;
        drop(conn);

        let mut result = HashMap::new();
        for (key, value) in keys.iter().zip(values) {
            match value {
                Some(packed) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    let parsed = bincode::deserialize(&packed)
                        .map_err(|e| DataError::Serialization(e.to_string()))?;
                    result.insert(key.clone(), parsed);
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        Ok(result)
    }

    /// 키를 삭제합니다.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let deleted: i64 = conn.del(key).await.map_err(DataError::from)?;
        Ok(deleted > 0)
    }

    /// 통계 조회.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// 통계 초기화.
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_url() {
        let config = CacheConfig::default();
        assert_eq!(config.url(), "redis://localhost:6379/0");

        let with_password = CacheConfig {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        assert_eq!(with_password.url(), "redis://:hunter2@localhost:6379/0");
    }

    #[test]
    fn test_cache_keys() {
        let symbol = Symbol::parse("SOL/USDT");
        assert_eq!(RedisCache::key("latest_kline", &symbol), "latest_kline:SOLUSDT");
        assert_eq!(RedisCache::key("latest_mark", &symbol), "latest_mark:SOLUSDT");
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl_secs, 300);
        assert_eq!(config.pool_size, 50);
    }
}
