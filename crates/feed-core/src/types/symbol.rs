//! 선물 거래 심볼 정의.
//!
//! 거래소는 `"SOLUSDT"` 형식을, 설정과 로그는 `"SOL/USDT"` 형식을 사용하므로
//! 두 형식 간 정규화를 이 타입 한 곳에서 처리합니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// USD-M 선물에서 흔한 호가 자산. 접미사 매칭으로 심볼을 분해할 때 사용합니다.
const KNOWN_QUOTES: [&str; 5] = ["USDT", "USDC", "BUSD", "BTC", "ETH"];

/// 선물 거래 심볼.
///
/// 기준 자산과 호가 자산의 쌍으로 구성됩니다 (예: SOL/USDT).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    /// 기준 자산 (예: SOL)
    pub base: String,
    /// 호가 자산 (예: USDT)
    pub quote: String,
}

impl Symbol {
    /// 새 심볼을 생성합니다.
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// `"SOL/USDT"` 또는 `"SOLUSDT"` 형식 문자열에서 심볼을 파싱합니다.
    ///
    /// 구분자가 없는 형식은 알려진 호가 자산 접미사로 분해하고,
    /// 분해에 실패하면 USDT 호가로 간주합니다.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if let Some((base, quote)) = trimmed.split_once('/') {
            return Self::new(base, quote);
        }

        let upper = trimmed.to_uppercase();
        for quote in KNOWN_QUOTES {
            if let Some(base) = upper.strip_suffix(quote) {
                if !base.is_empty() {
                    return Self::new(base, quote);
                }
            }
        }

        Self::new(upper, "USDT")
    }

    /// 거래소 형식 문자열을 반환합니다 (예: `"SOLUSDT"`).
    pub fn to_exchange(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// WebSocket 스트림 이름용 소문자 형식을 반환합니다 (예: `"solusdt"`).
    pub fn to_stream(&self) -> String {
        self.to_exchange().to_lowercase()
    }

    /// 문서 저장소 경로 키를 반환합니다 (예: `"SOL_USDT"`).
    ///
    /// 경로 구분자 `/`는 키에 쓸 수 없으므로 `_`로 치환합니다.
    pub fn path_key(&self) -> String {
        format!("{}_{}", self.base, self.quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Symbol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
