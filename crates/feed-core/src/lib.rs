//! # Feed Core
//!
//! 선물 시장 데이터 수집 시스템의 핵심 도메인 모델을 제공합니다.
//!
//! 이 크레이트는 시스템 전반에서 사용되는 기본 타입을 제공합니다:
//! - 시장 데이터 레코드 (캔들, 미결제약정, 펀딩비, 청산, 호가)
//! - 심볼 및 타임프레임 정의
//! - 에러 추적 및 알림
//! - 로깅 인프라

pub mod domain;
pub mod logging;
pub mod monitoring;
pub mod types;

pub use domain::*;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use monitoring::{
    AlertSink, ErrorRecord, ErrorSeverity, ErrorSummary, ErrorTracker, ErrorTrackerConfig,
    LogAlertSink,
};
pub use types::*;
