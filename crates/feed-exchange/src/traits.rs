//! 거래소 API 추상화.
//!
//! 수집기는 이 trait에만 의존하므로 테스트에서 네트워크 없이
//! 스텁 구현으로 대체할 수 있습니다.

use crate::error::ExchangeResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_core::{
    Candle, DepthSnapshot, FundingRate, Liquidation, LongShortRatio, OpenInterest, Symbol,
    Timeframe,
};

/// USD-M 선물 시장 데이터 API.
///
/// 모든 메서드는 시간 오름차순으로 정렬된 레코드를 반환하며,
/// 빈 결과는 빈 벡터입니다 (에러 아님).
#[async_trait]
pub trait FuturesApi: Send + Sync {
    /// OHLCV 캔들 조회. `since`는 밀리초 타임스탬프.
    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        since: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>>;

    /// 미결제약정 히스토리 조회.
    async fn fetch_open_interest_hist(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        limit: u32,
    ) -> ExchangeResult<Vec<OpenInterest>>;

    /// 펀딩비 히스토리 조회. `start_time`은 밀리초 타임스탬프.
    async fn fetch_funding_rate(
        &self,
        symbol: &Symbol,
        start_time: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<FundingRate>>;

    /// 최근 강제 청산 주문 조회.
    async fn fetch_liquidations(
        &self,
        symbol: &Symbol,
        limit: u32,
    ) -> ExchangeResult<Vec<Liquidation>>;

    /// 상위 트레이더 롱숏 계정 비율 조회.
    async fn fetch_top_trader_ratio(
        &self,
        symbol: &Symbol,
        period: Timeframe,
        limit: u32,
    ) -> ExchangeResult<Vec<LongShortRatio>>;

    /// 호가창 스냅샷 조회. `depth`는 {5, 10, 20, 50, 100, 500, 1000} 중 하나.
    async fn fetch_order_book(&self, symbol: &Symbol, depth: u32)
        -> ExchangeResult<DepthSnapshot>;

    /// 거래소 서버 시간 조회 (헬스 체크용).
    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>>;
}
