//! 시장 데이터 레코드 타입.
//!
//! 이 모듈은 수집기가 다루는 모든 시계열 레코드를 정의합니다:
//! - `Candle` - OHLCV 캔들
//! - `OpenInterest` - 미결제약정 샘플
//! - `FundingRate` - 펀딩비 이벤트
//! - `Liquidation` - 강제 청산 주문
//! - `LongShortRatio` - 상위 트레이더 롱숏 비율
//! - `DepthSnapshot` - 호가창 스냅샷
//! - `DataVersion` - 백필 완료 기록
//!
//! 레코드는 심볼을 포함하지 않습니다. 심볼/주기는 저장 시점에
//! 배치 단위로 전달됩니다.

use crate::types::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 주문 방향.
///
/// 청산 레코드에서 BUY는 숏 포지션 청산, SELL은 롱 포지션 청산을 의미합니다
/// (거래소 의미 그대로 전달).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// 거래소 문자열에서 파싱합니다.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// 호가창 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookSide {
    Bid,
    Ask,
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookSide::Bid => write!(f, "BID"),
            BookSide::Ask => write!(f, "ASK"),
        }
    }
}

/// OHLCV 캔들.
///
/// 진행 중인(아직 닫히지 않은) 캔들도 저장되며 다음 패스에서 덮어쓰입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 캔들 시작 시간
    pub open_time: DateTime<Utc>,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량 (기준 자산)
    pub volume: Decimal,
    /// 캔들 종료 시간
    pub close_time: DateTime<Utc>,
    /// 거래대금 (호가 자산)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_volume: Option<Decimal>,
    /// 체결 건수
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_trades: Option<i64>,
    /// 시장가 매수 거래량 (기준 자산)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taker_buy_base: Option<Decimal>,
    /// 시장가 매수 거래대금 (호가 자산)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taker_buy_quote: Option<Decimal>,
    /// 캔들 마감 여부 (WebSocket 이벤트에서만 의미 있음)
    #[serde(default = "default_closed")]
    pub is_closed: bool,
}

fn default_closed() -> bool {
    true
}

impl Candle {
    /// OHLC 관계가 유효한지 확인합니다.
    ///
    /// low ≤ min(open, close) ≤ max(open, close) ≤ high, 모든 값 ≥ 0.
    pub fn is_valid_ohlc(&self) -> bool {
        self.low >= Decimal::ZERO
            && self.volume >= Decimal::ZERO
            && self.low <= self.open
            && self.low <= self.close
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.high
    }
}

/// 미결제약정 샘플.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterest {
    /// 샘플 시간
    pub time: DateTime<Utc>,
    /// 미결제약정 (계약 수)
    pub open_interest: Decimal,
    /// 미결제약정 명목 가치 (호가 자산)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_interest_value: Option<Decimal>,
}

/// 펀딩비 이벤트. 8시간 주기로 발생하며 불변입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    /// 펀딩 시간
    pub funding_time: DateTime<Utc>,
    /// 펀딩비 (부호 있는 소수)
    pub funding_rate: Decimal,
    /// 펀딩 시점 마크 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<Decimal>,
}

/// 강제 청산 주문. `order_id`가 유일 키이며 중복은 조용히 무시됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquidation {
    /// 주문 ID (유일)
    pub order_id: i64,
    /// 청산 시간
    pub time: DateTime<Utc>,
    /// 방향 (BUY = 숏 청산, SELL = 롱 청산)
    pub side: Side,
    /// 체결 가격
    pub price: Decimal,
    /// 수량
    pub quantity: Decimal,
}

/// 상위 트레이더 롱숏 계정 비율.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongShortRatio {
    /// 샘플 시간
    pub time: DateTime<Utc>,
    /// 롱/숏 비율
    pub long_short_ratio: Decimal,
    /// 롱 계정 비중
    pub long_account: Decimal,
    /// 숏 계정 비중
    pub short_account: Decimal,
}

/// 호가창 단일 레벨.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// 호가창 스냅샷.
///
/// 호가는 최우선가 순서로 정렬되어 있습니다 (bids 내림차순, asks 오름차순).
/// 동일 타임스탬프 스냅샷은 전체 교체(full-replace)로 저장됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    /// 스냅샷 시간
    pub time: DateTime<Utc>,
    /// 거래소 업데이트 ID
    pub last_update_id: i64,
    /// 매수 호가 (가격 내림차순)
    pub bids: Vec<BookLevel>,
    /// 매도 호가 (가격 오름차순)
    pub asks: Vec<BookLevel>,
}

impl DepthSnapshot {
    /// 최우선 매수 호가.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// 최우선 매도 호가.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// 스프레드 (best_ask - best_bid).
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// 중간 가격 ((best_bid + best_ask) / 2).
    pub fn mid_price(&self) -> Option<Decimal> {
        Some((self.best_bid()? + self.best_ask()?) / Decimal::TWO)
    }

    /// 베이시스 포인트 단위 스프레드 (spread / mid × 10000).
    pub fn spread_bps(&self) -> Option<Decimal> {
        let mid = self.mid_price()?;
        if mid.is_zero() {
            return None;
        }
        Some(self.spread()? / mid * Decimal::from(10_000))
    }

    /// 교차 여부 확인. 정상 호가창은 best_ask > best_bid.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask <= bid,
            _ => false,
        }
    }
}

/// 백필 완료 기록. 성공한 수집 윈도우마다 하나씩 추가됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataVersion {
    /// 대상 테이블 이름
    pub table: String,
    /// 심볼
    pub symbol: Symbol,
    /// 수집 윈도우 시작
    pub window_start: DateTime<Utc>,
    /// 수집 윈도우 끝
    pub window_end: DateTime<Utc>,
    /// 저장된 레코드 수
    pub record_count: i64,
    /// 내용 해시 (SHA-256, 16진수)
    pub checksum: String,
    /// 기록 시간
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn candle(open: &str, high: &str, low: &str, close: &str) -> Candle {
        let t = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        Candle {
            open_time: t,
            open: dec(open),
            high: dec(high),
            low: dec(low),
            close: dec(close),
            volume: dec("100"),
            close_time: t + chrono::Duration::minutes(5),
            quote_volume: None,
            num_trades: None,
            taker_buy_base: None,
            taker_buy_quote: None,
            is_closed: true,
        }
    }

    #[test]
    fn test_valid_ohlc() {
        assert!(candle("10", "12", "9", "11").is_valid_ohlc());
        // high < open
        assert!(!candle("10", "5", "6", "7").is_valid_ohlc());
        // low > close
        assert!(!candle("10", "12", "11", "10.5").is_valid_ohlc());
    }

    #[test]
    fn test_depth_aggregates() {
        let t = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let snapshot = DepthSnapshot {
            time: t,
            last_update_id: 1,
            bids: vec![
                BookLevel { price: dec("100.00"), quantity: dec("1000") },
                BookLevel { price: dec("99.95"), quantity: dec("500") },
            ],
            asks: vec![
                BookLevel { price: dec("100.05"), quantity: dec("800") },
                BookLevel { price: dec("100.10"), quantity: dec("600") },
            ],
        };

        assert_eq!(snapshot.best_bid(), Some(dec("100.00")));
        assert_eq!(snapshot.best_ask(), Some(dec("100.05")));
        assert_eq!(snapshot.spread(), Some(dec("0.05")));
        assert_eq!(snapshot.mid_price(), Some(dec("100.025")));
        assert!(!snapshot.is_crossed());

        // spread_bps = 0.05 / 100.025 * 10000 ≈ 4.9987
        let bps = snapshot.spread_bps().unwrap();
        let expected = dec("4.9987");
        assert!((bps - expected).abs() < dec("0.0001"), "bps = {}", bps);
    }

    #[test]
    fn test_crossed_book_detected() {
        let t = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let snapshot = DepthSnapshot {
            time: t,
            last_update_id: 1,
            bids: vec![BookLevel { price: dec("100.10"), quantity: dec("1") }],
            asks: vec![BookLevel { price: dec("100.00"), quantity: dec("1") }],
        };
        assert!(snapshot.is_crossed());
    }

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("BUY"), Some(Side::Buy));
        assert_eq!(Side::parse("SELL"), Some(Side::Sell));
        assert_eq!(Side::parse("HOLD"), None);
    }
}
