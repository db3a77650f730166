//! Firebase Realtime Database 저장소 구현.
//!
//! 인프라 없이 운영 가능한 클라우드 문서 저장소입니다. REST API 위에서
//! 심볼별 하위 트리를 타임스탬프(밀리초) 문자열 키로 구성합니다:
//!
//! ```text
//! ohlcv/SOL_USDT/5m/1700000000000 -> { open, high, ... }
//! open_interest/SOL_USDT/5m/...   -> { open_interest, ... }
//! order_book/SOL_USDT/...         -> { bids, asks, last_update_id }
//! ```
//!
//! 경로 키에는 `/`를 쓸 수 없으므로 심볼은 `SOL_USDT` 형식으로 치환합니다.
//! 밀리초 키는 13자리로 길이가 같아 사전식 정렬이 시간 정렬과 일치합니다.
//! PATCH는 키 단위 병합이므로 같은 배치를 다시 제출해도 중복이 생기지
//! 않습니다 (경로 업서트).

use crate::error::{DataError, Result};
use crate::storage::{StorageDriver, StorageInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_core::{
    Candle, DataVersion, DepthSnapshot, FundingRate, Liquidation, LongShortRatio, OpenInterest,
    Symbol, Timeframe,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Firebase 설정.
#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    /// 데이터베이스 URL (예: https://project-id.firebaseio.com)
    pub database_url: String,
    /// 자격증명 파일 경로 (database secret 또는 토큰)
    pub credentials_path: Option<String>,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl FirebaseConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            credentials_path: None,
            timeout_secs: 30,
        }
    }
}

/// 자격증명 파일에서 인증 토큰을 읽습니다.
///
/// JSON 파일이면 `database_secret` 필드를, 아니면 파일 내용 전체를
/// 토큰으로 사용합니다.
fn load_auth_token(path: &str) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&contents) {
        if let Some(secret) = value.get("database_secret").and_then(|v| v.as_str()) {
            return Some(secret.to_string());
        }
    }
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Firebase RTDB 저장소.
pub struct FirebaseStorage {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    initialized: AtomicBool,
}

impl FirebaseStorage {
    /// 새 저장소 생성.
    pub fn new(config: &FirebaseConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DataError::Connection(e.to_string()))?;

        let auth_token = config
            .credentials_path
            .as_deref()
            .and_then(load_auth_token);
        if config.credentials_path.is_some() && auth_token.is_none() {
            warn!("firebase credentials file could not be read, continuing unauthenticated");
        }

        Ok(Self {
            http,
            base_url: config.database_url.trim_end_matches('/').to_string(),
            auth_token,
            initialized: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    fn auth_params(&self) -> Vec<(&'static str, String)> {
        match &self.auth_token {
            Some(token) => vec![("auth", token.clone())],
            None => Vec::new(),
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(DataError::Connection(format!("firebase {}: {}", status, body)))
        } else {
            Err(DataError::Query(format!("firebase {}: {}", status, body)))
        }
    }

    /// 키 단위 병합 쓰기 (PATCH). 멱등입니다.
    async fn patch<T: Serialize>(&self, path: &str, body: &BTreeMap<String, T>) -> Result<()> {
        if body.is_empty() {
            return Ok(());
        }

        let response = self
            .http
            .patch(self.url(path))
            .query(&self.auth_params())
            .json(body)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    /// 경로 전체 교체 쓰기 (PUT).
    async fn put<T: Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let response = self
            .http
            .put(self.url(path))
            .query(&self.auth_params())
            .json(body)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    /// push 쓰기 (POST, 서버가 키 생성).
    async fn push<T: Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let response = self
            .http
            .post(self.url(path))
            .query(&self.auth_params())
            .json(body)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    /// 키 범위 조회. 키 순서(= 시간 순서)로 정렬해 반환합니다.
    async fn get_range<T: DeserializeOwned>(
        &self,
        path: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<(i64, T)>> {
        let mut params = self.auth_params();
        params.push(("orderBy", "\"$key\"".to_string()));
        if let Some(start) = start {
            params.push(("startAt", format!("\"{}\"", start.timestamp_millis())));
        }
        if let Some(end) = end {
            params.push(("endAt", format!("\"{}\"", end.timestamp_millis())));
        }

        let response = self
            .http
            .get(self.url(path))
            .query(&params)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body: Option<BTreeMap<String, T>> = response.json().await?;
        let mut rows: Vec<(i64, T)> = body
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| key.parse::<i64>().ok().map(|ts| (ts, value)))
            .collect();

        rows.sort_by_key(|(ts, _)| *ts);
        Ok(rows)
    }

    /// 최근 N개 조회 (키 역순 limitToLast).
    async fn get_last<T: DeserializeOwned>(&self, path: &str, count: usize) -> Result<Vec<(i64, T)>> {
        let mut params = self.auth_params();
        params.push(("orderBy", "\"$key\"".to_string()));
        params.push(("limitToLast", count.to_string()));

        let response = self
            .http
            .get(self.url(path))
            .query(&params)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body: Option<BTreeMap<String, T>> = response.json().await?;
        let mut rows: Vec<(i64, T)> = body
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| key.parse::<i64>().ok().map(|ts| (ts, value)))
            .collect();

        rows.sort_by_key(|(ts, _)| *ts);
        Ok(rows)
    }

    /// 얕은 조회로 하위 키 목록을 가져옵니다.
    async fn shallow_keys(&self, path: &str) -> Result<Vec<String>> {
        let mut params = self.auth_params();
        params.push(("shallow", "true".to_string()));

        let response = self
            .http
            .get(self.url(path))
            .query(&params)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body: Option<BTreeMap<String, serde_json::Value>> = response.json().await?;
        Ok(body.unwrap_or_default().into_keys().collect())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(path))
            .query(&self.auth_params())
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    fn candle_path(symbol: &Symbol, timeframe: Timeframe) -> String {
        format!("ohlcv/{}/{}", symbol.path_key(), timeframe.to_interval())
    }
}

#[async_trait]
impl StorageDriver for FirebaseStorage {
    async fn init(&self) -> Result<()> {
        // 스키마 없는 저장소: 연결만 확인
        self.health_check().await?;
        self.initialized.store(true, Ordering::Relaxed);
        info!("firebase storage ready");
        Ok(())
    }

    async fn save_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize> {
        let body: BTreeMap<String, &Candle> = candles
            .iter()
            .map(|c| (c.open_time.timestamp_millis().to_string(), c))
            .collect();

        let written = body.len();
        self.patch(&Self::candle_path(symbol, timeframe), &body).await?;
        debug!(symbol = %symbol, timeframe = %timeframe, rows = written, "candles saved");
        Ok(written)
    }

    async fn save_open_interest(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        rows: &[OpenInterest],
    ) -> Result<usize> {
        let body: BTreeMap<String, &OpenInterest> = rows
            .iter()
            .map(|r| (r.time.timestamp_millis().to_string(), r))
            .collect();

        let written = body.len();
        let path = format!(
            "open_interest/{}/{}",
            symbol.path_key(),
            period.to_interval()
        );
        self.patch(&path, &body).await?;
        Ok(written)
    }

    async fn save_funding_rates(&self, symbol: &Symbol, rows: &[FundingRate]) -> Result<usize> {
        let body: BTreeMap<String, &FundingRate> = rows
            .iter()
            .map(|r| (r.funding_time.timestamp_millis().to_string(), r))
            .collect();

        let written = body.len();
        let path = format!("funding_rate/{}", symbol.path_key());
        self.patch(&path, &body).await?;
        Ok(written)
    }

    async fn save_liquidations(&self, symbol: &Symbol, rows: &[Liquidation]) -> Result<usize> {
        // order_id가 키이므로 재제출은 같은 경로를 덮어쓸 뿐 중복되지 않음
        let body: BTreeMap<String, &Liquidation> = rows
            .iter()
            .map(|r| (r.order_id.to_string(), r))
            .collect();

        let written = body.len();
        let path = format!("liquidations/{}", symbol.path_key());
        self.patch(&path, &body).await?;
        Ok(written)
    }

    async fn save_long_short_ratios(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        rows: &[LongShortRatio],
    ) -> Result<usize> {
        let body: BTreeMap<String, &LongShortRatio> = rows
            .iter()
            .map(|r| (r.time.timestamp_millis().to_string(), r))
            .collect();

        let written = body.len();
        let path = format!(
            "long_short_ratio/{}/{}",
            symbol.path_key(),
            period.to_interval()
        );
        self.patch(&path, &body).await?;
        Ok(written)
    }

    async fn save_depth_snapshot(
        &self,
        symbol: &Symbol,
        snapshot: &DepthSnapshot,
    ) -> Result<usize> {
        // 전체 교체: 경로 PUT은 기존 스냅샷을 통째로 대체
        let path = format!(
            "order_book/{}/{}",
            symbol.path_key(),
            snapshot.time.timestamp_millis()
        );
        self.put(&path, snapshot).await?;
        Ok(snapshot.bids.len() + snapshot.asks.len())
    }

    async fn save_data_version(&self, version: &DataVersion) -> Result<()> {
        self.push("data_versions", version).await
    }

    async fn get_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>> {
        let rows: Vec<(i64, Candle)> = self
            .get_range(&Self::candle_path(symbol, timeframe), start, end)
            .await?;
        Ok(rows.into_iter().map(|(_, c)| c).collect())
    }

    async fn latest_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let rows: Vec<(i64, Candle)> = self
            .get_last(&Self::candle_path(symbol, timeframe), count)
            .await?;
        Ok(rows.into_iter().map(|(_, c)| c).collect())
    }

    async fn get_open_interest(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<OpenInterest>> {
        let path = format!(
            "open_interest/{}/{}",
            symbol.path_key(),
            period.to_interval()
        );
        let rows: Vec<(i64, OpenInterest)> = self.get_range(&path, start, end).await?;
        Ok(rows.into_iter().map(|(_, r)| r).collect())
    }

    async fn get_funding_rates(
        &self,
        symbol: &Symbol,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<FundingRate>> {
        let path = format!("funding_rate/{}", symbol.path_key());
        let rows: Vec<(i64, FundingRate)> = self.get_range(&path, start, end).await?;
        Ok(rows.into_iter().map(|(_, r)| r).collect())
    }

    async fn get_liquidations(
        &self,
        symbol: &Symbol,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Liquidation>> {
        // 청산 키는 order_id이므로 범위는 시간 필드로 거릅니다
        let path = format!("liquidations/{}", symbol.path_key());
        let rows: Vec<(i64, Liquidation)> = self.get_range(&path, None, None).await?;

        let mut liquidations: Vec<Liquidation> = rows
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| start.map_or(true, |s| r.time >= s) && end.map_or(true, |e| r.time <= e))
            .collect();
        liquidations.sort_by_key(|r| r.time);
        Ok(liquidations)
    }

    async fn get_long_short_ratios(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<LongShortRatio>> {
        let path = format!(
            "long_short_ratio/{}/{}",
            symbol.path_key(),
            period.to_interval()
        );
        let rows: Vec<(i64, LongShortRatio)> = self.get_range(&path, start, end).await?;
        Ok(rows.into_iter().map(|(_, r)| r).collect())
    }

    async fn latest_depth(&self, symbol: &Symbol) -> Result<Option<DepthSnapshot>> {
        let path = format!("order_book/{}", symbol.path_key());
        let rows: Vec<(i64, DepthSnapshot)> = self.get_last(&path, 1).await?;
        Ok(rows.into_iter().next().map(|(_, s)| s))
    }

    async fn count_candles(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<i64> {
        let keys = self
            .shallow_keys(&Self::candle_path(symbol, timeframe))
            .await?;
        Ok(keys.len() as i64)
    }

    async fn latest_candle_time(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>> {
        let rows: Vec<(i64, Candle)> = self
            .get_last(&Self::candle_path(symbol, timeframe), 1)
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|(ts, _)| DateTime::from_timestamp_millis(ts)))
    }

    async fn list_symbols(&self) -> Result<Vec<Symbol>> {
        let keys = self.shallow_keys("ohlcv").await?;
        Ok(keys
            .into_iter()
            .map(|k| Symbol::parse(&k.replace('_', "/")))
            .collect())
    }

    async fn delete_symbol(&self, symbol: &Symbol) -> Result<()> {
        let key = symbol.path_key();
        for table in [
            "ohlcv",
            "open_interest",
            "funding_rate",
            "liquidations",
            "long_short_ratio",
            "order_book",
        ] {
            self.delete(&format!("{}/{}", table, key)).await?;
        }

        info!(symbol = %symbol, "deleted all data for symbol");
        Ok(())
    }

    async fn vacuum(&self) -> Result<()> {
        // 관리형 저장소: 유지보수 불필요
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let mut params = self.auth_params();
        params.push(("shallow", "true".to_string()));

        let response = self
            .http
            .get(format!("{}/.json", self.base_url))
            .query(&params)
            .send()
            .await?;

        Ok(response.status().is_success())
    }

    async fn info(&self) -> Result<StorageInfo> {
        Ok(StorageInfo {
            backend: "firebase",
            initialized: self.initialized.load(Ordering::Relaxed),
            size_bytes: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let storage = FirebaseStorage::new(&FirebaseConfig::new(
            "https://demo-project.firebaseio.com/",
        ))
        .unwrap();

        assert_eq!(
            storage.url("ohlcv/SOL_USDT/5m"),
            "https://demo-project.firebaseio.com/ohlcv/SOL_USDT/5m.json"
        );
    }

    #[test]
    fn test_candle_path_uses_path_key() {
        let symbol = Symbol::parse("SOL/USDT");
        assert_eq!(
            FirebaseStorage::candle_path(&symbol, Timeframe::M5),
            "ohlcv/SOL_USDT/5m"
        );
    }

    #[test]
    fn test_auth_params_empty_without_token() {
        let storage =
            FirebaseStorage::new(&FirebaseConfig::new("https://x.firebaseio.com")).unwrap();
        assert!(storage.auth_params().is_empty());
    }
}
