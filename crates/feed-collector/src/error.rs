//! 수집기 에러 타입 및 종료 코드 매핑.

use feed_data::DataError;
use feed_exchange::ExchangeError;
use thiserror::Error;

/// 수집기 에러.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 설정 에러 (시작 시 치명적)
    #[error("Configuration error: {0}")]
    Config(String),

    /// 저장소 에러
    #[error("Storage error: {0}")]
    Storage(#[from] DataError),

    /// 거래소 에러
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// 사용자 취소
    #[error("Cancelled")]
    Cancelled,

    /// 태스크 실행 에러
    #[error("Task error: {0}")]
    Task(String),
}

impl CollectorError {
    /// CLI 종료 코드.
    ///
    /// 0 성공, 1 설정 에러, 2 저장소 에러, 3 거래소 연결 불가, 4 취소.
    pub fn exit_code(&self) -> i32 {
        match self {
            CollectorError::Config(_) => 1,
            CollectorError::Storage(DataError::Config(_)) => 1,
            CollectorError::Storage(_) => 2,
            CollectorError::Task(_) => 2,
            CollectorError::Exchange(_) => 3,
            CollectorError::Cancelled => 4,
        }
    }
}

/// Result 타입 별칭.
pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CollectorError::Config("x".into()).exit_code(), 1);
        assert_eq!(
            CollectorError::Storage(DataError::Query("x".into())).exit_code(),
            2
        );
        assert_eq!(
            CollectorError::Storage(DataError::Config("x".into())).exit_code(),
            1
        );
        assert_eq!(
            CollectorError::Exchange(ExchangeError::Network("x".into())).exit_code(),
            3
        );
        assert_eq!(CollectorError::Cancelled.exit_code(), 4);
    }
}
