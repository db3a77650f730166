//! 바이낸스 USD-M 선물 REST 클라이언트.
//!
//! 모든 공개 시장 데이터 엔드포인트를 타입이 있는 레코드로 노출합니다.
//! 각 호출은 전역 속도 제한 → 재시도 → 엔드포인트 전용 circuit breaker를
//! 차례로 통과하며, 최종 실패는 에러 추적기에 `api_<리소스>_error`로
//! 기록됩니다.

#![allow(dead_code)] // API 응답 필드 전체 매핑 (일부만 사용)

use crate::circuit_breaker::BreakerRegistry;
use crate::error::{ExchangeError, ExchangeResult};
use crate::rate_limit::RateLimiter;
use crate::retry::{retry, RetryPolicy};
use crate::traits::FuturesApi;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_core::{
    BookLevel, Candle, DepthSnapshot, ErrorSeverity, ErrorTracker, FundingRate, Liquidation,
    LongShortRatio, OpenInterest, Side, Symbol, Timeframe,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// 유효한 호가창 깊이.
const VALID_DEPTHS: [u32; 7] = [5, 10, 20, 50, 100, 500, 1000];

// ============================================================================
// 설정
// ============================================================================

/// 선물 클라이언트 설정.
///
/// # 보안
/// `Debug` 구현은 API 키를 마스킹합니다. 에러 메시지에 자격증명이
/// 노출되지 않습니다.
#[derive(Clone)]
pub struct FuturesClientConfig {
    /// API 키 (공개 데이터만 사용하므로 선택)
    pub api_key: Option<String>,
    /// 테스트넷 사용
    pub testnet: bool,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 전역 속도 제한 (분당 요청 수)
    pub requests_per_minute: u32,
}

impl fmt::Debug for FuturesClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = match &self.api_key {
            Some(key) if key.len() > 8 => format!("{}...{}", &key[..4], &key[key.len() - 4..]),
            Some(_) => "***REDACTED***".to_string(),
            None => "<none>".to_string(),
        };

        f.debug_struct("FuturesClientConfig")
            .field("api_key", &masked)
            .field("testnet", &self.testnet)
            .field("timeout_secs", &self.timeout_secs)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

impl Default for FuturesClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            testnet: false,
            timeout_secs: 30,
            requests_per_minute: 1200,
        }
    }
}

impl FuturesClientConfig {
    /// 환경 변수에서 생성.
    pub fn from_env() -> Self {
        let testnet = std::env::var("BINANCE_TESTNET")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        Self {
            api_key: std::env::var("BINANCE_API_KEY").ok(),
            testnet,
            ..Default::default()
        }
    }

    /// REST API 기본 URL.
    pub fn rest_base_url(&self) -> &'static str {
        if self.testnet {
            "https://testnet.binancefuture.com"
        } else {
            "https://fapi.binance.com"
        }
    }

    /// WebSocket 기본 URL.
    pub fn ws_base_url(&self) -> &'static str {
        if self.testnet {
            "wss://stream.binancefuture.com"
        } else {
            "wss://fstream.binance.com"
        }
    }
}

// ============================================================================
// API 응답 타입
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerTime {
    server_time: i64,
}

/// 캔들 배열 응답.
/// [open_time, open, high, low, close, volume, close_time,
///  quote_volume, num_trades, taker_buy_base, taker_buy_quote, ignore]
#[derive(Debug, Deserialize)]
struct RawKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    String,
    String,
    serde_json::Value,
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenInterest {
    symbol: String,
    sum_open_interest: String,
    sum_open_interest_value: Option<String>,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFundingRate {
    symbol: String,
    funding_time: i64,
    funding_rate: String,
    mark_price: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawForceOrder {
    symbol: String,
    // 일부 응답에는 orderId가 없음. 없으면 이벤트 시간으로 대체.
    order_id: Option<i64>,
    side: String,
    price: String,
    orig_qty: String,
    time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTraderRatio {
    symbol: String,
    long_short_ratio: String,
    long_account: String,
    short_account: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDepth {
    last_update_id: i64,
    #[serde(rename = "E")]
    event_time: Option<i64>,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct RawApiError {
    code: i64,
    msg: String,
}

// ============================================================================
// 클라이언트
// ============================================================================

/// 바이낸스 USD-M 선물 클라이언트.
pub struct BinanceFuturesClient {
    config: FuturesClientConfig,
    http: reqwest::Client,
    limiter: RateLimiter,
    retry_policy: RetryPolicy,
    breakers: Arc<BreakerRegistry>,
    tracker: Arc<ErrorTracker>,
}

impl BinanceFuturesClient {
    /// 새 클라이언트 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::Network`를 반환합니다.
    pub fn new(
        config: FuturesClientConfig,
        retry_policy: RetryPolicy,
        breakers: Arc<BreakerRegistry>,
        tracker: Arc<ErrorTracker>,
    ) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::Network(format!("failed to build HTTP client: {}", e)))?;

        let limiter = RateLimiter::per_minute(config.requests_per_minute);

        Ok(Self {
            config,
            http,
            limiter,
            retry_policy,
            breakers,
            tracker,
        })
    }

    /// 문자열에서 Decimal 파싱. 실패 시 0 (유효성 검사가 걸러냄).
    fn parse_decimal(s: &str) -> Decimal {
        s.parse().unwrap_or(Decimal::ZERO)
    }

    fn parse_optional_decimal(s: &Option<String>) -> Option<Decimal> {
        s.as_deref()
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok())
    }

    fn to_datetime(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }

    /// 공개 GET 요청.
    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}", self.config.rest_base_url(), path);
        debug!(url = %url, params = ?params, "GET");

        let mut request = self.http.get(&url).query(params);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let response = request.send().await.map_err(ExchangeError::from)?;
        self.handle_response(response).await
    }

    /// API 응답 처리. 상태 코드를 에러 분류로 매핑합니다.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ExchangeResult<T> {
        let status = response.status();
        let body = response.text().await.map_err(ExchangeError::from)?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                error!("failed to parse response: {} - body: {}", e, truncate(&body, 300));
                ExchangeError::Parse(e.to_string())
            });
        }

        // 429: 요청 한도, 418: 한도 위반 후 IP 차단
        if status.as_u16() == 429 || status.as_u16() == 418 {
            return Err(ExchangeError::RateLimited);
        }

        if status.is_server_error() {
            return Err(ExchangeError::Server {
                status: status.as_u16(),
                message: truncate(&body, 300).to_string(),
            });
        }

        match serde_json::from_str::<RawApiError>(&body) {
            Ok(api_err) => Err(ExchangeError::Client {
                code: api_err.code,
                message: api_err.msg,
            }),
            Err(_) => Err(ExchangeError::Client {
                code: status.as_u16() as i64,
                message: truncate(&body, 300).to_string(),
            }),
        }
    }

    /// 속도 제한 → 재시도 → breaker 순서로 연산을 감쌉니다.
    ///
    /// 최종 실패는 추적기에 기록됩니다. 회로 열림 거부는 이미 breaker
    /// 통계에 집계되므로 별도로 기록하지 않습니다.
    async fn guarded<T, F, Fut>(
        &self,
        breaker_name: &str,
        track_kind: &str,
        severity: ErrorSeverity,
        context: Vec<(&str, String)>,
        op: F,
    ) -> ExchangeResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        self.limiter.acquire().await;

        let breaker = self.breakers.breaker(breaker_name);
        let result = retry(&self.retry_policy, || breaker.call(op())).await;

        if let Err(err) = &result {
            if !matches!(err, ExchangeError::CircuitOpen { .. }) {
                let mut context = context;
                context.push(("error_kind", err.kind().to_string()));
                self.tracker
                    .record(track_kind, err.to_string(), context, severity);
            }
        }

        result
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl FuturesApi for BinanceFuturesClient {
    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        let exchange_symbol = symbol.to_exchange();
        let context = vec![
            ("symbol", symbol.to_string()),
            ("timeframe", timeframe.to_string()),
        ];

        let raw: Vec<RawKline> = self
            .guarded(
                "binance_ohlcv",
                "api_ohlcv_error",
                ErrorSeverity::Error,
                context,
                || {
                    let mut params = vec![
                        ("symbol", exchange_symbol.clone()),
                        ("interval", timeframe.to_interval().to_string()),
                        ("limit", limit.min(1500).to_string()),
                    ];
                    if let Some(since) = since {
                        params.push(("startTime", since.to_string()));
                    }
                    async move { self.public_get("/fapi/v1/klines", &params).await }
                },
            )
            .await?;

        let now = Utc::now();
        let mut candles: Vec<Candle> = raw
            .into_iter()
            .map(|k| {
                let close_time = Self::to_datetime(k.6);
                Candle {
                    open_time: Self::to_datetime(k.0),
                    open: Self::parse_decimal(&k.1),
                    high: Self::parse_decimal(&k.2),
                    low: Self::parse_decimal(&k.3),
                    close: Self::parse_decimal(&k.4),
                    volume: Self::parse_decimal(&k.5),
                    close_time,
                    quote_volume: Some(Self::parse_decimal(&k.7)),
                    num_trades: Some(k.8),
                    taker_buy_base: Some(Self::parse_decimal(&k.9)),
                    taker_buy_quote: Some(Self::parse_decimal(&k.10)),
                    is_closed: close_time <= now,
                }
            })
            .collect();

        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    async fn fetch_open_interest_hist(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        limit: u32,
    ) -> ExchangeResult<Vec<OpenInterest>> {
        let exchange_symbol = symbol.to_exchange();
        let context = vec![
            ("symbol", symbol.to_string()),
            ("period", period.to_string()),
        ];

        let raw: Vec<RawOpenInterest> = self
            .guarded(
                "binance_oi",
                "api_oi_error",
                ErrorSeverity::Error,
                context,
                || {
                    let params = vec![
                        ("symbol", exchange_symbol.clone()),
                        ("period", period.to_interval().to_string()),
                        ("limit", limit.min(500).to_string()),
                    ];
                    async move {
                        self.public_get("/futures/data/openInterestHist", &params)
                            .await
                    }
                },
            )
            .await?;

        let mut rows: Vec<OpenInterest> = raw
            .into_iter()
            .map(|o| OpenInterest {
                time: Self::to_datetime(o.timestamp),
                open_interest: Self::parse_decimal(&o.sum_open_interest),
                open_interest_value: Self::parse_optional_decimal(&o.sum_open_interest_value),
            })
            .collect();

        rows.sort_by_key(|r| r.time);
        Ok(rows)
    }

    async fn fetch_funding_rate(
        &self,
        symbol: &Symbol,
        start_time: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<FundingRate>> {
        let exchange_symbol = symbol.to_exchange();
        let context = vec![("symbol", symbol.to_string())];

        let raw: Vec<RawFundingRate> = self
            .guarded(
                "binance_funding",
                "api_funding_error",
                ErrorSeverity::Error,
                context,
                || {
                    let mut params = vec![
                        ("symbol", exchange_symbol.clone()),
                        ("limit", limit.min(1000).to_string()),
                    ];
                    if let Some(start) = start_time {
                        params.push(("startTime", start.to_string()));
                    }
                    async move { self.public_get("/fapi/v1/fundingRate", &params).await }
                },
            )
            .await?;

        let mut rows: Vec<FundingRate> = raw
            .into_iter()
            .map(|f| FundingRate {
                funding_time: Self::to_datetime(f.funding_time),
                funding_rate: Self::parse_decimal(&f.funding_rate),
                mark_price: Self::parse_optional_decimal(&f.mark_price),
            })
            .collect();

        rows.sort_by_key(|r| r.funding_time);
        Ok(rows)
    }

    async fn fetch_liquidations(
        &self,
        symbol: &Symbol,
        limit: u32,
    ) -> ExchangeResult<Vec<Liquidation>> {
        let exchange_symbol = symbol.to_exchange();
        let context = vec![("symbol", symbol.to_string())];

        let raw: Vec<RawForceOrder> = self
            .guarded(
                "binance_liquidations",
                "api_liquidation_error",
                // 청산 데이터는 보조 지표이므로 심각도를 낮춤
                ErrorSeverity::Warning,
                context,
                || {
                    let params = vec![
                        ("symbol", exchange_symbol.clone()),
                        ("limit", limit.min(1000).to_string()),
                    ];
                    async move { self.public_get("/fapi/v1/allForceOrders", &params).await }
                },
            )
            .await?;

        let mut rows: Vec<Liquidation> = raw
            .into_iter()
            .filter_map(|o| {
                let side = Side::parse(&o.side)?;
                Some(Liquidation {
                    order_id: o.order_id.unwrap_or(o.time),
                    time: Self::to_datetime(o.time),
                    side,
                    price: Self::parse_decimal(&o.price),
                    quantity: Self::parse_decimal(&o.orig_qty),
                })
            })
            .collect();

        rows.sort_by_key(|r| r.time);
        Ok(rows)
    }

    async fn fetch_top_trader_ratio(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        limit: u32,
    ) -> ExchangeResult<Vec<LongShortRatio>> {
        let exchange_symbol = symbol.to_exchange();
        let context = vec![
            ("symbol", symbol.to_string()),
            ("period", period.to_string()),
        ];

        let raw: Vec<RawTraderRatio> = self
            .guarded(
                "binance_trader_ratio",
                "api_trader_ratio_error",
                ErrorSeverity::Error,
                context,
                || {
                    let params = vec![
                        ("symbol", exchange_symbol.clone()),
                        ("period", period.to_interval().to_string()),
                        ("limit", limit.min(500).to_string()),
                    ];
                    async move {
                        self.public_get("/futures/data/topLongShortAccountRatio", &params)
                            .await
                    }
                },
            )
            .await?;

        let mut rows: Vec<LongShortRatio> = raw
            .into_iter()
            .map(|r| LongShortRatio {
                time: Self::to_datetime(r.timestamp),
                long_short_ratio: Self::parse_decimal(&r.long_short_ratio),
                long_account: Self::parse_decimal(&r.long_account),
                short_account: Self::parse_decimal(&r.short_account),
            })
            .collect();

        rows.sort_by_key(|r| r.time);
        Ok(rows)
    }

    async fn fetch_order_book(
        &self,
        symbol: &Symbol,
        depth: u32,
    ) -> ExchangeResult<DepthSnapshot> {
        let exchange_symbol = symbol.to_exchange();
        let context = vec![("symbol", symbol.to_string())];

        // 거래소는 정해진 깊이만 허용. 가장 가까운 유효 깊이로 올림.
        let depth = VALID_DEPTHS
            .iter()
            .find(|d| **d >= depth)
            .copied()
            .unwrap_or(1000);

        let raw: RawDepth = self
            .guarded(
                "binance_depth",
                "api_depth_error",
                ErrorSeverity::Error,
                context,
                || {
                    let params = vec![
                        ("symbol", exchange_symbol.clone()),
                        ("limit", depth.to_string()),
                    ];
                    async move { self.public_get("/fapi/v1/depth", &params).await }
                },
            )
            .await?;

        let level = |[price, quantity]: &[String; 2]| BookLevel {
            price: Self::parse_decimal(price),
            quantity: Self::parse_decimal(quantity),
        };

        Ok(DepthSnapshot {
            time: raw
                .event_time
                .map(Self::to_datetime)
                .unwrap_or_else(Utc::now),
            last_update_id: raw.last_update_id,
            bids: raw.bids.iter().map(level).collect(),
            asks: raw.asks.iter().map(level).collect(),
        })
    }

    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        self.limiter.acquire().await;
        let raw: RawServerTime = self.public_get("/fapi/v1/time", &[]).await?;
        Ok(Self::to_datetime(raw.server_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_debug_masks_key() {
        let config = FuturesClientConfig {
            api_key: Some("AKIA1234SECRETSECRET5678".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("SECRETSECRET"));
        assert!(debug.contains("AKIA...5678"));
    }

    #[test]
    fn test_base_urls() {
        let mainnet = FuturesClientConfig::default();
        assert_eq!(mainnet.rest_base_url(), "https://fapi.binance.com");
        assert_eq!(mainnet.ws_base_url(), "wss://fstream.binance.com");

        let testnet = FuturesClientConfig {
            testnet: true,
            ..Default::default()
        };
        assert_eq!(testnet.rest_base_url(), "https://testnet.binancefuture.com");
    }

    #[test]
    fn test_kline_array_decoding() {
        let body = r#"[[1700000000000,"57.10","57.50","56.90","57.30","12345.6",1700000299999,"705432.1",842,"6000.0","343000.5","0"]]"#;
        let raw: Vec<RawKline> = serde_json::from_str(body).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].0, 1_700_000_000_000);
        assert_eq!(raw[0].8, 842);
    }

    #[test]
    fn test_funding_rate_decoding_with_empty_mark_price() {
        let body = r#"[{"symbol":"SOLUSDT","fundingTime":1700000000000,"fundingRate":"0.00010000","markPrice":""}]"#;
        let raw: Vec<RawFundingRate> = serde_json::from_str(body).unwrap();
        assert_eq!(raw[0].funding_rate, "0.00010000");
        assert_eq!(
            BinanceFuturesClient::parse_optional_decimal(&raw[0].mark_price),
            None
        );
    }

    #[test]
    fn test_force_order_without_order_id() {
        let body = r#"[{"symbol":"SOLUSDT","side":"SELL","price":"57.10","origQty":"10.5","time":1700000000000}]"#;
        let raw: Vec<RawForceOrder> = serde_json::from_str(body).unwrap();
        assert_eq!(raw[0].order_id, None);
    }

    #[test]
    fn test_depth_decoding() {
        let body = r#"{"lastUpdateId":42,"E":1700000000000,"bids":[["100.00","1000"]],"asks":[["100.05","800"]]}"#;
        let raw: RawDepth = serde_json::from_str(body).unwrap();
        assert_eq!(raw.last_update_id, 42);
        assert_eq!(raw.bids[0][0], "100.00");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("hi", 10), "hi");
        // 멀티바이트 경계에서 패닉하지 않아야 함
        assert_eq!(truncate("가나다라", 2), "가나");
    }
}
