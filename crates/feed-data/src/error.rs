//! 데이터 모듈 에러 타입.

use thiserror::Error;

/// 데이터 관련 에러.
#[derive(Debug, Error)]
pub enum DataError {
    /// 데이터베이스 연결 에러
    #[error("Connection error: {0}")]
    Connection(String),

    /// 쿼리 실행 에러
    #[error("Query error: {0}")]
    Query(String),

    /// 레코드를 찾을 수 없음
    #[error("Record not found: {0}")]
    NotFound(String),

    /// 중복 레코드
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// 직렬화/역직렬화 에러
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 캐시 에러
    #[error("Cache error: {0}")]
    Cache(String),

    /// 유효성 검사 실패로 배치가 거부됨
    #[error("Validation failed: {0}")]
    Validation(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Config(String),

    /// 연결 풀 소진
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// 저장 작업 타임아웃
    #[error("Storage timeout: {0}")]
    Timeout(String),
}

impl DataError {
    /// 에러 추적기용 안정적인 유형 문자열.
    pub fn kind(&self) -> &'static str {
        match self {
            DataError::Validation(_) => "validation",
            DataError::Config(_) => "config",
            DataError::Cache(_) => "cache",
            DataError::Timeout(_) => "timeout",
            _ => "storage",
        }
    }

    /// 저장 에러는 한 번만 재시도합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataError::Connection(_)
                | DataError::PoolExhausted
                | DataError::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DataError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => DataError::PoolExhausted,
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                // PostgreSQL 고유 제약 위반
                if code == "23505" || code == "1555" || code == "2067" {
                    DataError::Duplicate(db_err.message().to_string())
                } else {
                    DataError::Query(db_err.message().to_string())
                }
            }
            _ => DataError::Query(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for DataError {
    fn from(err: redis::RedisError) -> Self {
        DataError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DataError::Timeout(err.to_string())
        } else {
            DataError::Connection(err.to_string())
        }
    }
}

/// Result 타입 별칭.
pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(DataError::Query("x".into()).kind(), "storage");
        assert_eq!(DataError::Validation("x".into()).kind(), "validation");
        assert_eq!(DataError::Config("x".into()).kind(), "config");
    }

    #[test]
    fn test_retryable() {
        assert!(DataError::Connection("x".into()).is_retryable());
        assert!(DataError::PoolExhausted.is_retryable());
        assert!(!DataError::Validation("x".into()).is_retryable());
        assert!(!DataError::Duplicate("x".into()).is_retryable());
    }
}
