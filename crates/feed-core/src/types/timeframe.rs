//! 캔들 타임프레임 및 샘플링 주기 정의.
//!
//! OHLCV 캔들의 간격과 미결제약정/롱숏 비율의 샘플링 주기를
//! 동일한 타입으로 표현합니다 (거래소 API가 같은 간격 문자열을 공유).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 캔들 타임프레임.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    /// 1분봉
    M1,
    /// 5분봉
    M5,
    /// 15분봉
    M15,
    /// 30분봉
    M30,
    /// 1시간봉
    H1,
    /// 2시간봉
    H2,
    /// 4시간봉
    H4,
    /// 8시간봉 (펀딩 주기와 동일)
    H8,
    /// 12시간봉
    H12,
    /// 일봉
    D1,
    /// 주봉
    W1,
}

impl Timeframe {
    /// 이 타임프레임의 기간을 반환합니다.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H2 => 2 * 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::H8 => 8 * 60 * 60,
            Timeframe::H12 => 12 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
            Timeframe::W1 => 7 * 24 * 60 * 60,
        })
    }

    /// 밀리초 단위 기간. 백필 커서 계산에 사용합니다.
    pub fn as_millis(&self) -> i64 {
        self.duration().as_millis() as i64
    }

    /// 초 단위 기간.
    pub fn as_secs(&self) -> u64 {
        self.duration().as_secs()
    }

    /// 바이낸스 간격 문자열로 변환합니다.
    pub fn to_interval(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    /// 바이낸스 간격 문자열에서 파싱합니다.
    pub fn from_interval(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "30m" => Some(Timeframe::M30),
            "1h" => Some(Timeframe::H1),
            "2h" => Some(Timeframe::H2),
            "4h" => Some(Timeframe::H4),
            "8h" => Some(Timeframe::H8),
            "12h" => Some(Timeframe::H12),
            "1d" => Some(Timeframe::D1),
            "1w" => Some(Timeframe::W1),
            _ => None,
        }
    }

    /// 미결제약정/롱숏 비율 샘플링 주기로 유효한지 확인합니다.
    ///
    /// 거래소의 futures/data 계열 엔드포인트는 분봉 일부와 시간봉만 허용합니다.
    pub fn is_sampling_period(&self) -> bool {
        matches!(
            self,
            Timeframe::M5
                | Timeframe::M15
                | Timeframe::M30
                | Timeframe::H1
                | Timeframe::H2
                | Timeframe::H4
                | Timeframe::H8
                | Timeframe::H12
                | Timeframe::D1
        )
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_interval())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_interval(s).ok_or_else(|| format!("Invalid timeframe: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations() {
        assert_eq!(Timeframe::M5.as_secs(), 300);
        assert_eq!(Timeframe::H1.as_millis(), 3_600_000);
        assert_eq!(Timeframe::D1.as_secs(), 86_400);
    }

    #[test]
    fn test_interval_round_trip() {
        for tf in [Timeframe::M1, Timeframe::M5, Timeframe::H4, Timeframe::D1] {
            assert_eq!(Timeframe::from_interval(tf.to_interval()), Some(tf));
        }
        assert_eq!(Timeframe::from_interval("7m"), None);
    }

    #[test]
    fn test_sampling_periods() {
        assert!(Timeframe::M5.is_sampling_period());
        assert!(Timeframe::H4.is_sampling_period());
        assert!(!Timeframe::M1.is_sampling_period());
        assert!(!Timeframe::W1.is_sampling_period());
    }
}
