//! 거래소 에러 타입.

use thiserror::Error;

/// 거래소 관련 에러.
///
/// `kind()`는 에러 추적기와 재시도 분류기가 공유하는 안정적인 문자열 키를
/// 반환합니다.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    Network(String),

    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 요청 한도 초과 (HTTP 429 또는 거래소 쓰로틀링)
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 거래소 서버 에러 (HTTP 5xx)
    #[error("Exchange server error {status}: {message}")]
    Server { status: u16, message: String },

    /// 거래소 클라이언트 에러 (429 제외 HTTP 4xx, API 에러 코드)
    #[error("Exchange client error {code}: {message}")]
    Client { code: i64, message: String },

    /// 응답 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    Parse(String),

    /// WebSocket 에러
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 연결 끊김
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// 회로 차단기 열림 - 호출이 수행되지 않음
    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen { name: String },
}

impl ExchangeError {
    /// 안정적인 에러 유형 문자열.
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Network(_)
            | ExchangeError::Disconnected(_)
            | ExchangeError::WebSocket(_) => "network",
            ExchangeError::Timeout(_) => "timeout",
            ExchangeError::RateLimited => "rate_limit",
            ExchangeError::Server { .. } => "exchange_server",
            ExchangeError::Client { .. } | ExchangeError::Parse(_) => "exchange_client",
            ExchangeError::CircuitOpen { .. } => "circuit_open",
        }
    }

    /// 재시도 가능한 에러인지 확인.
    ///
    /// 회로 열림과 클라이언트 측 에러는 재시도 예산을 소모하지 않고
    /// 즉시 전파됩니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::RateLimited
                | ExchangeError::Server { .. }
                | ExchangeError::Disconnected(_)
                | ExchangeError::WebSocket(_)
        )
    }

    /// 회로 차단기 실패로 집계되는 에러인지 확인.
    ///
    /// 회로 열림 거부 자체는 실패로 집계하지 않습니다.
    pub fn counts_as_breaker_failure(&self) -> bool {
        self.is_retryable()
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_connect() {
            ExchangeError::Network(err.to_string())
        } else {
            ExchangeError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Parse(err.to_string())
    }
}

/// Result 타입 별칭.
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(ExchangeError::Network("x".into()).kind(), "network");
        assert_eq!(ExchangeError::Timeout("x".into()).kind(), "timeout");
        assert_eq!(ExchangeError::RateLimited.kind(), "rate_limit");
        assert_eq!(
            ExchangeError::Server { status: 502, message: "bad gateway".into() }.kind(),
            "exchange_server"
        );
        assert_eq!(
            ExchangeError::Client { code: -1121, message: "invalid symbol".into() }.kind(),
            "exchange_client"
        );
        assert_eq!(
            ExchangeError::CircuitOpen { name: "binance_ohlcv".into() }.kind(),
            "circuit_open"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ExchangeError::Network("x".into()).is_retryable());
        assert!(ExchangeError::Timeout("x".into()).is_retryable());
        assert!(ExchangeError::RateLimited.is_retryable());
        assert!(ExchangeError::Server { status: 500, message: String::new() }.is_retryable());

        assert!(!ExchangeError::Client { code: 400, message: String::new() }.is_retryable());
        assert!(!ExchangeError::Parse("bad json".into()).is_retryable());
        assert!(!ExchangeError::CircuitOpen { name: "x".into() }.is_retryable());
    }

    #[test]
    fn test_circuit_open_not_a_breaker_failure() {
        assert!(!ExchangeError::CircuitOpen { name: "x".into() }.counts_as_breaker_failure());
        assert!(ExchangeError::RateLimited.counts_as_breaker_failure());
    }
}
