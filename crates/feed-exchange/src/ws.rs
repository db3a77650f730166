//! 선물 WebSocket 시장 데이터 스트림.
//!
//! 결합 스트림 URL(`/stream?streams=a/b/c`)로 연결하여
//! `{stream, data}` 봉투 메시지를 타입이 있는 이벤트로 디코딩합니다.
//!
//! 연결은 명시적인 상태 기계로 관리됩니다:
//! DISCONNECTED → CONNECTING → OPEN → (끊김 시 DISCONNECTED → 재연결)
//! 재연결 백오프는 60초 상한의 지수 증가입니다. 취소는 watch 채널로
//! 전달되며 현재 반복이 끝나는 즉시 반영됩니다.

use crate::error::{ExchangeError, ExchangeResult};
use chrono::{DateTime, Utc};
use feed_core::{Candle, Liquidation, Side, Symbol, Timeframe};
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

// ============================================================================
// 스트림 종류 및 이벤트
// ============================================================================

/// 구독 가능한 스트림 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsStreamKind {
    /// 캔들 스트림 (`<symbol>@kline_<tf>`)
    Kline(Timeframe),
    /// 마크 가격 스트림 (`<symbol>@markPrice`)
    MarkPrice,
    /// 강제 청산 스트림 (`<symbol>@forceOrder`)
    ForceOrder,
}

impl WsStreamKind {
    /// 심볼에 대한 스트림 이름을 반환합니다.
    pub fn stream_name(&self, symbol: &Symbol) -> String {
        match self {
            WsStreamKind::Kline(tf) => {
                format!("{}@kline_{}", symbol.to_stream(), tf.to_interval())
            }
            WsStreamKind::MarkPrice => format!("{}@markPrice", symbol.to_stream()),
            WsStreamKind::ForceOrder => format!("{}@forceOrder", symbol.to_stream()),
        }
    }
}

/// 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
        }
    }
}

/// 마크 가격 업데이트.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkPriceUpdate {
    pub time: DateTime<Utc>,
    pub mark_price: Decimal,
    pub index_price: Option<Decimal>,
    pub funding_rate: Decimal,
    pub next_funding_time: DateTime<Utc>,
}

/// WebSocket에서 수신한 타입 이벤트.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// 캔들 업데이트. `candle.is_closed`가 마감 여부를 나타냅니다.
    Kline {
        symbol: Symbol,
        timeframe: Timeframe,
        candle: Candle,
    },
    /// 마크 가격 + 펀딩비 업데이트
    MarkPrice {
        symbol: Symbol,
        update: MarkPriceUpdate,
    },
    /// 강제 청산 이벤트
    Liquidation {
        symbol: Symbol,
        liquidation: Liquidation,
    },
    /// 연결 상태 전이
    StateChanged(ConnectionState),
}

// ============================================================================
// 수신 메시지 타입
// ============================================================================

/// 결합 스트림 봉투.
#[derive(Debug, Deserialize)]
struct WsEnvelope {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WsKlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "n")]
    num_trades: i64,
    #[serde(rename = "x")]
    is_closed: bool,
    #[serde(rename = "V")]
    taker_buy_base: String,
    #[serde(rename = "Q")]
    taker_buy_quote: String,
}

#[derive(Debug, Deserialize)]
struct WsMarkPrice {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    mark_price: String,
    #[serde(rename = "i")]
    index_price: Option<String>,
    #[serde(rename = "r")]
    funding_rate: String,
    #[serde(rename = "T")]
    next_funding_time: i64,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)] // 이벤트 필드 전체 매핑 (일부만 사용)
struct WsForceOrder {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "o")]
    order: WsForceOrderDetail,
}

#[derive(Debug, Deserialize)]
struct WsForceOrderDetail {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

// ============================================================================
// 메트릭
// ============================================================================

/// 스트림 성능 메트릭.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    pub messages_received: AtomicU64,
    pub events_emitted: AtomicU64,
    pub reconnects: AtomicU64,
    /// 마지막 메시지 수신 시각 (Unix 밀리초)
    pub last_message_ms: AtomicI64,
}

impl StreamMetrics {
    /// 마지막 메시지 이후 경과 시간 (밀리초).
    pub fn last_message_age_ms(&self) -> Option<i64> {
        let last = self.last_message_ms.load(Ordering::Relaxed);
        if last == 0 {
            return None;
        }
        Some(Utc::now().timestamp_millis() - last)
    }
}

// ============================================================================
// 시장 스트림
// ============================================================================

/// 자동 재연결 WebSocket 시장 스트림.
pub struct FuturesMarketStream {
    url: String,
    metrics: Arc<StreamMetrics>,
    max_backoff: Duration,
}

impl FuturesMarketStream {
    /// 새 스트림 생성.
    pub fn new(ws_base_url: &str, symbols: &[Symbol], kinds: &[WsStreamKind]) -> Self {
        Self {
            url: Self::combined_url(ws_base_url, symbols, kinds),
            metrics: Arc::new(StreamMetrics::default()),
            max_backoff: Duration::from_secs(60),
        }
    }

    /// 결합 스트림 URL을 구성합니다.
    pub fn combined_url(ws_base_url: &str, symbols: &[Symbol], kinds: &[WsStreamKind]) -> String {
        let streams: Vec<String> = symbols
            .iter()
            .flat_map(|s| kinds.iter().map(move |k| k.stream_name(s)))
            .collect();

        format!("{}/stream?streams={}", ws_base_url, streams.join("/"))
    }

    /// 메트릭 핸들.
    pub fn metrics(&self) -> Arc<StreamMetrics> {
        Arc::clone(&self.metrics)
    }

    /// 스트림을 백그라운드 태스크로 실행합니다.
    ///
    /// 이벤트 수신 채널과 중지 핸들을 반환합니다. 중지 핸들에
    /// `true`를 보내면 현재 반복이 끝난 뒤 루프가 종료됩니다.
    pub fn spawn(
        self,
    ) -> (
        mpsc::Receiver<StreamEvent>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<()>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(1000);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            self.run(event_tx, stop_rx).await;
        });

        (event_rx, stop_tx, handle)
    }

    /// 소비 루프. 연결이 끊기면 백오프 후 재연결합니다.
    pub async fn run(self, tx: mpsc::Sender<StreamEvent>, mut stop: watch::Receiver<bool>) {
        let mut reconnect_attempts: u32 = 0;

        loop {
            if *stop.borrow() {
                break;
            }

            info!(url = %self.url, "connecting to futures stream");
            let _ = tx.send(StreamEvent::StateChanged(ConnectionState::Connecting)).await;

            match connect_async(self.url.as_str()).await {
                Ok((ws, _)) => {
                    info!("futures stream connected");
                    reconnect_attempts = 0;
                    let _ = tx.send(StreamEvent::StateChanged(ConnectionState::Open)).await;

                    let (mut write, mut read) = ws.split();

                    loop {
                        tokio::select! {
                            changed = stop.changed() => {
                                if changed.is_err() || *stop.borrow() {
                                    let _ = write.send(Message::Close(None)).await;
                                    let _ = tx
                                        .send(StreamEvent::StateChanged(ConnectionState::Disconnected))
                                        .await;
                                    return;
                                }
                            }
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                                    self.metrics
                                        .last_message_ms
                                        .store(Utc::now().timestamp_millis(), Ordering::Relaxed);

                                    if let Some(event) = Self::parse_event(&text) {
                                        self.metrics.events_emitted.fetch_add(1, Ordering::Relaxed);
                                        if tx.send(event).await.is_err() {
                                            // 수신 측이 종료됨
                                            return;
                                        }
                                    }
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    debug!("ping received");
                                    let _ = write.send(Message::Pong(data)).await;
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    warn!(frame = ?frame, "stream closed by server");
                                    break;
                                }
                                Some(Err(e)) => {
                                    error!(error = %e, "stream read error");
                                    break;
                                }
                                None => {
                                    warn!("stream ended");
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }

                    let _ = tx
                        .send(StreamEvent::StateChanged(ConnectionState::Disconnected))
                        .await;
                }
                Err(e) => {
                    error!(error = %e, "failed to connect futures stream");
                    let _ = tx
                        .send(StreamEvent::StateChanged(ConnectionState::Disconnected))
                        .await;
                }
            }

            // 지수 백오프 재연결 (상한 60초)
            let backoff_secs = 2u64
                .saturating_pow(reconnect_attempts.min(6))
                .min(self.max_backoff.as_secs());
            reconnect_attempts += 1;
            self.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
            info!(backoff_secs = backoff_secs, "reconnecting after backoff");

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
            }
        }
    }

    fn parse_decimal(s: &str) -> Decimal {
        s.parse().unwrap_or(Decimal::ZERO)
    }

    fn to_datetime(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }

    /// 봉투 메시지를 타입 이벤트로 파싱합니다. 알 수 없는 메시지는 무시합니다.
    pub fn parse_event(text: &str) -> Option<StreamEvent> {
        let envelope: WsEnvelope = serde_json::from_str(text).ok()?;

        if envelope.stream.contains("@kline") {
            let event: WsKlineEvent = serde_json::from_value(envelope.data).ok()?;
            if event.event_type != "kline" {
                return None;
            }
            let k = event.kline;
            let timeframe = Timeframe::from_interval(&k.interval)?;

            return Some(StreamEvent::Kline {
                symbol: Symbol::parse(&event.symbol),
                timeframe,
                candle: Candle {
                    open_time: Self::to_datetime(k.open_time),
                    open: Self::parse_decimal(&k.open),
                    high: Self::parse_decimal(&k.high),
                    low: Self::parse_decimal(&k.low),
                    close: Self::parse_decimal(&k.close),
                    volume: Self::parse_decimal(&k.volume),
                    close_time: Self::to_datetime(k.close_time),
                    quote_volume: Some(Self::parse_decimal(&k.quote_volume)),
                    num_trades: Some(k.num_trades),
                    taker_buy_base: Some(Self::parse_decimal(&k.taker_buy_base)),
                    taker_buy_quote: Some(Self::parse_decimal(&k.taker_buy_quote)),
                    is_closed: k.is_closed,
                },
            });
        }

        if envelope.stream.contains("@markPrice") {
            let event: WsMarkPrice = serde_json::from_value(envelope.data).ok()?;
            if event.event_type != "markPriceUpdate" {
                return None;
            }

            return Some(StreamEvent::MarkPrice {
                symbol: Symbol::parse(&event.symbol),
                update: MarkPriceUpdate {
                    time: Self::to_datetime(event.event_time),
                    mark_price: Self::parse_decimal(&event.mark_price),
                    index_price: event
                        .index_price
                        .as_deref()
                        .filter(|s| !s.is_empty())
                        .and_then(|s| s.parse().ok()),
                    funding_rate: Self::parse_decimal(&event.funding_rate),
                    next_funding_time: Self::to_datetime(event.next_funding_time),
                },
            });
        }

        if envelope.stream.contains("@forceOrder") {
            let event: WsForceOrder = serde_json::from_value(envelope.data).ok()?;
            if event.event_type != "forceOrder" {
                return None;
            }
            let order = event.order;
            let side = Side::parse(&order.side)?;

            return Some(StreamEvent::Liquidation {
                symbol: Symbol::parse(&order.symbol),
                liquidation: Liquidation {
                    // 스트림 이벤트에는 주문 ID가 없으므로 체결 시간을 키로 사용
                    order_id: order.trade_time,
                    time: Self::to_datetime(order.trade_time),
                    side,
                    price: Self::parse_decimal(&order.price),
                    quantity: Self::parse_decimal(&order.quantity),
                },
            });
        }

        None
    }
}

/// 스트림 구성에 대한 간단한 유효성 검사.
pub fn validate_subscription(symbols: &[Symbol], kinds: &[WsStreamKind]) -> ExchangeResult<()> {
    if symbols.is_empty() {
        return Err(ExchangeError::WebSocket("no symbols to subscribe".into()));
    }
    if kinds.is_empty() {
        return Err(ExchangeError::WebSocket("no stream kinds to subscribe".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_names() {
        let symbol = Symbol::parse("SOL/USDT");
        assert_eq!(
            WsStreamKind::Kline(Timeframe::M5).stream_name(&symbol),
            "solusdt@kline_5m"
        );
        assert_eq!(
            WsStreamKind::MarkPrice.stream_name(&symbol),
            "solusdt@markPrice"
        );
        assert_eq!(
            WsStreamKind::ForceOrder.stream_name(&symbol),
            "solusdt@forceOrder"
        );
    }

    #[test]
    fn test_combined_url() {
        let symbols = vec![Symbol::parse("SOL/USDT"), Symbol::parse("BTC/USDT")];
        let kinds = vec![WsStreamKind::Kline(Timeframe::M5), WsStreamKind::MarkPrice];

        let url =
            FuturesMarketStream::combined_url("wss://fstream.binance.com", &symbols, &kinds);
        assert_eq!(
            url,
            "wss://fstream.binance.com/stream?streams=solusdt@kline_5m/solusdt@markPrice/btcusdt@kline_5m/btcusdt@markPrice"
        );
    }

    #[test]
    fn test_parse_kline_event() {
        let text = r#"{"stream":"solusdt@kline_5m","data":{"e":"kline","E":1700000012345,"s":"SOLUSDT","k":{"t":1700000000000,"T":1700000299999,"s":"SOLUSDT","i":"5m","f":1,"L":2,"o":"57.10","c":"57.30","h":"57.50","l":"56.90","v":"12345.6","n":842,"x":true,"q":"705432.1","V":"6000.0","Q":"343000.5","B":"0"}}}"#;

        match FuturesMarketStream::parse_event(text) {
            Some(StreamEvent::Kline { symbol, timeframe, candle }) => {
                assert_eq!(symbol.to_exchange(), "SOLUSDT");
                assert_eq!(timeframe, Timeframe::M5);
                assert!(candle.is_closed);
                assert_eq!(candle.num_trades, Some(842));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_mark_price_event() {
        let text = r#"{"stream":"solusdt@markPrice","data":{"e":"markPriceUpdate","E":1700000012345,"s":"SOLUSDT","p":"57.25","i":"57.20","P":"57.26","r":"0.00010000","T":1700028800000}}"#;

        match FuturesMarketStream::parse_event(text) {
            Some(StreamEvent::MarkPrice { symbol, update }) => {
                assert_eq!(symbol.to_exchange(), "SOLUSDT");
                assert_eq!(update.funding_rate.to_string(), "0.00010000");
                assert!(update.index_price.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_force_order_event() {
        let text = r#"{"stream":"solusdt@forceOrder","data":{"e":"forceOrder","E":1700000012345,"o":{"s":"SOLUSDT","S":"SELL","o":"LIMIT","f":"IOC","q":"10.5","p":"57.10","ap":"57.12","X":"FILLED","l":"10.5","z":"10.5","T":1700000012000}}}"#;

        match FuturesMarketStream::parse_event(text) {
            Some(StreamEvent::Liquidation { symbol, liquidation }) => {
                assert_eq!(symbol.to_exchange(), "SOLUSDT");
                assert_eq!(liquidation.side, Side::Sell);
                assert_eq!(liquidation.order_id, 1_700_000_012_000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_message_ignored() {
        assert!(FuturesMarketStream::parse_event("{\"result\":null,\"id\":1}").is_none());
        assert!(FuturesMarketStream::parse_event("not json").is_none());
    }

    #[test]
    fn test_validate_subscription() {
        let symbols = vec![Symbol::parse("SOL/USDT")];
        assert!(validate_subscription(&symbols, &[WsStreamKind::MarkPrice]).is_ok());
        assert!(validate_subscription(&[], &[WsStreamKind::MarkPrice]).is_err());
        assert!(validate_subscription(&symbols, &[]).is_err());
    }
}
