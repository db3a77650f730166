//! 저장소 추상화.
//!
//! 세 가지 백엔드가 하나의 인터페이스를 공유합니다:
//! - `TimescaleStorage`: PostgreSQL + TimescaleDB (운영, 하이퍼테이블)
//! - `SqliteStorage`: 단일 파일 임베디드 저장소 (로컬 개발)
//! - `FirebaseStorage`: 클라우드 문서 저장소 (무인프라)
//!
//! 모든 배치 쓰기는 멱등입니다: 같은 배치를 다시 제출해도 행이
//! 중복되거나 에러가 발생하지 않습니다.

pub mod firebase;
pub mod sqlite;
pub mod timescale;

use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_core::{
    Candle, DataVersion, DepthSnapshot, FundingRate, Liquidation, LongShortRatio, OpenInterest,
    Symbol, Timeframe,
};
use serde::Serialize;
use std::sync::Arc;

pub use firebase::{FirebaseConfig, FirebaseStorage};
pub use sqlite::{SqliteConfig, SqliteStorage};
pub use timescale::{DatabaseConfig, TimescaleStorage};

/// 백엔드 정보.
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    /// 백엔드 종류 ("timescale", "sqlite", "firebase")
    pub backend: &'static str,
    /// 스키마 초기화 여부
    pub initialized: bool,
    /// 추정 크기 (바이트, 백엔드가 지원할 때만)
    pub size_bytes: Option<u64>,
}

/// 공통 저장소 인터페이스.
///
/// 범위 조회는 시간 오름차순으로 정렬되며 양 끝 경계를 포함합니다.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// 스키마/구조를 생성합니다. 멱등입니다.
    async fn init(&self) -> Result<()>;

    /// OHLCV 배치 업서트. 마지막 쓰기가 이깁니다.
    async fn save_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize>;

    /// 미결제약정 배치 업서트.
    async fn save_open_interest(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        rows: &[OpenInterest],
    ) -> Result<usize>;

    /// 펀딩비 배치 추가 (불변 레코드).
    async fn save_funding_rates(&self, symbol: &Symbol, rows: &[FundingRate]) -> Result<usize>;

    /// 청산 배치 추가. 중복 `order_id`는 조용히 무시됩니다.
    async fn save_liquidations(&self, symbol: &Symbol, rows: &[Liquidation]) -> Result<usize>;

    /// 롱숏 비율 배치 업서트.
    async fn save_long_short_ratios(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        rows: &[LongShortRatio],
    ) -> Result<usize>;

    /// 호가창 스냅샷 저장. 동일 타임스탬프는 전체 교체됩니다.
    async fn save_depth_snapshot(
        &self,
        symbol: &Symbol,
        snapshot: &DepthSnapshot,
    ) -> Result<usize>;

    /// 백필 완료 기록 추가.
    async fn save_data_version(&self, version: &DataVersion) -> Result<()>;

    /// OHLCV 범위 조회.
    async fn get_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>>;

    /// 최근 N개 캔들 (시간 오름차순).
    async fn latest_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>>;

    /// 미결제약정 범위 조회.
    async fn get_open_interest(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<OpenInterest>>;

    /// 펀딩비 범위 조회.
    async fn get_funding_rates(
        &self,
        symbol: &Symbol,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<FundingRate>>;

    /// 청산 범위 조회.
    async fn get_liquidations(
        &self,
        symbol: &Symbol,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Liquidation>>;

    /// 롱숏 비율 범위 조회.
    async fn get_long_short_ratios(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<LongShortRatio>>;

    /// 가장 최근 호가창 스냅샷.
    async fn latest_depth(&self, symbol: &Symbol) -> Result<Option<DepthSnapshot>>;

    /// 캔들 수 (멱등성 검증 및 모니터링용).
    async fn count_candles(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<i64>;

    /// 가장 최근 캔들 시간 (신선도 검사용).
    async fn latest_candle_time(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>>;

    /// 저장된 심볼 목록.
    async fn list_symbols(&self) -> Result<Vec<Symbol>>;

    /// 심볼의 모든 데이터 삭제.
    async fn delete_symbol(&self, symbol: &Symbol) -> Result<()>;

    /// 백엔드별 유지보수 (공간 회수 등). no-op 허용.
    async fn vacuum(&self) -> Result<()>;

    /// 연결 상태 확인.
    async fn health_check(&self) -> Result<bool>;

    /// 백엔드 정보.
    async fn info(&self) -> Result<StorageInfo>;
}

/// 저장소 백엔드 선택 설정.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// 관계형 시계열 저장소 (PostgreSQL + TimescaleDB)
    Timescale(DatabaseConfig),
    /// 임베디드 파일 저장소 (SQLite)
    Sqlite(SqliteConfig),
    /// 클라우드 문서 저장소 (Firebase RTDB)
    Firebase(FirebaseConfig),
}

impl StorageConfig {
    /// 설정 문자열에서 백엔드 종류를 파싱합니다.
    ///
    /// 표준 이름(relational/embedded_file/cloud_doc)과 구현 이름
    /// (timescale/sqlite/firebase)을 모두 허용합니다.
    pub fn backend_name(kind: &str) -> Result<&'static str> {
        match kind.to_lowercase().as_str() {
            "relational" | "timescale" | "postgresql" | "postgres" => Ok("timescale"),
            "embedded_file" | "sqlite" => Ok("sqlite"),
            "cloud_doc" | "firebase" => Ok("firebase"),
            other => Err(DataError::Config(format!(
                "unsupported database type: {} (expected relational, embedded_file or cloud_doc)",
                other
            ))),
        }
    }
}

/// 설정에 따라 저장소 드라이버를 생성합니다.
pub async fn connect_storage(config: &StorageConfig) -> Result<Arc<dyn StorageDriver>> {
    match config {
        StorageConfig::Timescale(cfg) => {
            tracing::info!(backend = "timescale", "creating storage driver");
            Ok(Arc::new(TimescaleStorage::connect(cfg).await?))
        }
        StorageConfig::Sqlite(cfg) => {
            tracing::info!(backend = "sqlite", path = %cfg.path, "creating storage driver");
            Ok(Arc::new(SqliteStorage::connect(cfg).await?))
        }
        StorageConfig::Firebase(cfg) => {
            tracing::info!(backend = "firebase", "creating storage driver");
            Ok(Arc::new(FirebaseStorage::new(cfg)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name_aliases() {
        assert_eq!(StorageConfig::backend_name("relational").unwrap(), "timescale");
        assert_eq!(StorageConfig::backend_name("embedded_file").unwrap(), "sqlite");
        assert_eq!(StorageConfig::backend_name("cloud_doc").unwrap(), "firebase");
        assert_eq!(StorageConfig::backend_name("SQLite").unwrap(), "sqlite");
        assert!(StorageConfig::backend_name("mongodb").is_err());
    }
}
