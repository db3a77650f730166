//! 데이터 품질 검사.
//!
//! 저장 전에 배치에 적용되는 순수 무상태 검사입니다. 각 검사는
//! 통과/실패 불리언을 반환하며, 치명적 검사에 실패한 배치는 거부되고
//! (에러 기록, 저장 안 함) 비치명적 검사 실패는 로그만 남기고 저장합니다.
//!
//! 치명적: 필수 필드 누락, OHLC 관계 위반, 배치 내 중복 키,
//! 0 이하 가격, 음수 미결제약정.
//! 비치명적: 시간 연속성 간격, 10% 초과 가격 변동, 50% 초과 OI 변동,
//! 펀딩비 정상 범위 이탈.

use feed_core::{Candle, FundingRate, OpenInterest, Timeframe};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::warn;

/// 검사 결과 보고서.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// (검사 이름, 통과 여부)
    pub checks: Vec<(&'static str, bool)>,
    /// 실패한 치명적 검사 이름
    fatal_failures: Vec<&'static str>,
}

impl ValidationReport {
    fn record(&mut self, name: &'static str, passed: bool, fatal: bool) {
        self.checks.push((name, passed));
        if !passed {
            warn!(check = name, fatal = fatal, "validation check failed");
            if fatal {
                self.fatal_failures.push(name);
            }
        }
    }

    /// 모든 검사 통과 여부.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|(_, ok)| *ok)
    }

    /// 배치를 거부해야 하는지 여부.
    pub fn is_fatal(&self) -> bool {
        !self.fatal_failures.is_empty()
    }

    /// 실패한 치명적 검사 목록.
    pub fn fatal_failures(&self) -> &[&'static str] {
        &self.fatal_failures
    }

    /// 사람이 읽을 수 있는 요약.
    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|(_, ok)| *ok).count();
        let failed: Vec<&str> = self
            .checks
            .iter()
            .filter(|(_, ok)| !*ok)
            .map(|(name, _)| *name)
            .collect();

        if failed.is_empty() {
            format!("{}/{} checks passed", passed, self.checks.len())
        } else {
            format!(
                "{}/{} checks passed (failed: {})",
                passed,
                self.checks.len(),
                failed.join(", ")
            )
        }
    }
}

/// 가격 변동 한도 (10%).
fn spike_threshold() -> Decimal {
    Decimal::from_str("0.10").unwrap_or_default()
}

/// OI 변동 한도 (50%).
fn oi_change_threshold() -> Decimal {
    Decimal::from_str("0.50").unwrap_or_default()
}

/// 펀딩비 정상 범위 (±0.5%).
fn funding_band() -> Decimal {
    Decimal::from_str("0.005").unwrap_or_default()
}

/// 데이터 품질 검사기.
pub struct DataValidator;

impl DataValidator {
    /// OHLCV 배치 검사.
    pub fn validate_candles(timeframe: Timeframe, candles: &[Candle]) -> ValidationReport {
        let mut report = ValidationReport::default();
        if candles.is_empty() {
            return report;
        }

        // 거래소 응답에서 채워지는 확장 필드가 비어 있으면 수집 결함
        report.record(
            "no_nulls",
            candles.iter().all(|c| {
                c.quote_volume.is_some()
                    && c.num_trades.is_some()
                    && c.taker_buy_base.is_some()
                    && c.taker_buy_quote.is_some()
            }),
            true,
        );

        report.record(
            "valid_ohlc",
            candles.iter().all(|c| c.is_valid_ohlc()),
            true,
        );

        let mut seen = HashSet::new();
        let no_duplicates = candles.iter().all(|c| seen.insert(c.open_time));
        report.record("no_duplicates", no_duplicates, true);

        report.record(
            "positive_prices",
            candles.iter().all(|c| {
                c.open > Decimal::ZERO
                    && c.high > Decimal::ZERO
                    && c.low > Decimal::ZERO
                    && c.close > Decimal::ZERO
            }),
            true,
        );

        // 연속된 캔들 간 간격이 1.5배를 넘으면 수집 공백으로 간주
        let max_gap_ms = timeframe.as_millis() * 3 / 2;
        let continuous = candles.windows(2).all(|pair| {
            (pair[1].open_time - pair[0].open_time).num_milliseconds() <= max_gap_ms
        });
        report.record("continuous_time", continuous, false);

        let threshold = spike_threshold();
        let no_spikes = candles.windows(2).all(|pair| {
            let prev = pair[0].close;
            if prev.is_zero() {
                return true;
            }
            ((pair[1].close - prev) / prev).abs() < threshold
        });
        report.record("no_extreme_spikes", no_spikes, false);

        report
    }

    /// 미결제약정 배치 검사.
    pub fn validate_open_interest(rows: &[OpenInterest]) -> ValidationReport {
        let mut report = ValidationReport::default();
        if rows.is_empty() {
            return report;
        }

        report.record(
            "positive_oi",
            rows.iter().all(|r| r.open_interest >= Decimal::ZERO),
            true,
        );

        let mut seen = HashSet::new();
        let no_duplicates = rows.iter().all(|r| seen.insert(r.time));
        report.record("no_duplicates", no_duplicates, true);

        let threshold = oi_change_threshold();
        let reasonable = rows.windows(2).all(|pair| {
            let prev = pair[0].open_interest;
            if prev.is_zero() {
                return true;
            }
            ((pair[1].open_interest - prev) / prev).abs() < threshold
        });
        report.record("reasonable_changes", reasonable, false);

        report
    }

    /// 펀딩비 배치 검사.
    pub fn validate_funding_rates(rows: &[FundingRate]) -> ValidationReport {
        let mut report = ValidationReport::default();
        if rows.is_empty() {
            return report;
        }

        let mut seen = HashSet::new();
        let no_duplicates = rows.iter().all(|r| seen.insert(r.funding_time));
        report.record("no_duplicates", no_duplicates, true);

        let band = funding_band();
        let reasonable = rows
            .iter()
            .all(|r| r.funding_rate >= -band && r.funding_rate <= band);
        report.record("reasonable_rates", reasonable, false);

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn base_time() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn candle_at(minutes: i64, open: &str, high: &str, low: &str, close: &str) -> Candle {
        let t = base_time() + Duration::minutes(minutes);
        Candle {
            open_time: t,
            open: dec(open),
            high: dec(high),
            low: dec(low),
            close: dec(close),
            volume: dec("100"),
            close_time: t + Duration::minutes(5),
            quote_volume: Some(dec("1000")),
            num_trades: Some(10),
            taker_buy_base: Some(dec("50")),
            taker_buy_quote: Some(dec("500")),
            is_closed: true,
        }
    }

    #[test]
    fn test_valid_batch_passes() {
        let candles = vec![
            candle_at(0, "10", "11", "9.5", "10.5"),
            candle_at(5, "10.5", "11.2", "10.1", "11.0"),
            candle_at(10, "11.0", "11.5", "10.8", "11.2"),
        ];
        let report = DataValidator::validate_candles(Timeframe::M5, &candles);
        assert!(report.passed());
        assert!(!report.is_fatal());
    }

    #[test]
    fn test_bad_ohlc_is_fatal() {
        // open=10, high=5, low=6, close=7 - 고가가 시가보다 낮음
        let candles = vec![candle_at(0, "10", "5", "6", "7")];
        let report = DataValidator::validate_candles(Timeframe::M5, &candles);

        assert!(report.is_fatal());
        assert!(report.fatal_failures().contains(&"valid_ohlc"));
    }

    #[test]
    fn test_missing_required_field_is_fatal() {
        let mut candle = candle_at(0, "10", "11", "9.5", "10.5");
        candle.quote_volume = None;

        let report = DataValidator::validate_candles(Timeframe::M5, &[candle]);
        assert!(report.is_fatal());
        assert!(report.fatal_failures().contains(&"no_nulls"));
    }

    #[test]
    fn test_zero_price_fails_positive_prices_check() {
        // open=0, low=0이면 OHLC 관계는 유지되지만 가격 양수 검사는 실패
        let candles = vec![candle_at(0, "0", "11", "0", "10.5")];
        let report = DataValidator::validate_candles(Timeframe::M5, &candles);

        assert!(report.is_fatal());
        assert!(report.fatal_failures().contains(&"positive_prices"));
        assert!(report
            .checks
            .iter()
            .any(|(name, ok)| *name == "valid_ohlc" && *ok));
    }

    #[test]
    fn test_duplicate_key_is_fatal() {
        let candles = vec![
            candle_at(0, "10", "11", "9.5", "10.5"),
            candle_at(0, "10", "11", "9.5", "10.6"),
        ];
        let report = DataValidator::validate_candles(Timeframe::M5, &candles);
        assert!(report.is_fatal());
        assert!(report.fatal_failures().contains(&"no_duplicates"));
    }

    #[test]
    fn test_time_gap_is_not_fatal() {
        // 5분봉인데 20분 간격
        let candles = vec![
            candle_at(0, "10", "11", "9.5", "10.5"),
            candle_at(20, "10.5", "11.2", "10.1", "11.0"),
        ];
        let report = DataValidator::validate_candles(Timeframe::M5, &candles);
        assert!(!report.passed());
        assert!(!report.is_fatal());
        assert!(report
            .checks
            .iter()
            .any(|(name, ok)| *name == "continuous_time" && !ok));
    }

    #[test]
    fn test_price_spike_is_not_fatal() {
        // 종가 10 → 12 (+20%)
        let candles = vec![
            candle_at(0, "10", "11", "9.5", "10"),
            candle_at(5, "10", "12.5", "10", "12"),
        ];
        let report = DataValidator::validate_candles(Timeframe::M5, &candles);
        assert!(!report.passed());
        assert!(!report.is_fatal());
    }

    #[test]
    fn test_negative_oi_is_fatal() {
        let rows = vec![OpenInterest {
            time: base_time(),
            open_interest: dec("-5"),
            open_interest_value: None,
        }];
        let report = DataValidator::validate_open_interest(&rows);
        assert!(report.is_fatal());
        assert!(report.fatal_failures().contains(&"positive_oi"));
    }

    #[test]
    fn test_oi_jump_is_not_fatal() {
        let rows = vec![
            OpenInterest {
                time: base_time(),
                open_interest: dec("1000"),
                open_interest_value: None,
            },
            OpenInterest {
                time: base_time() + Duration::minutes(5),
                open_interest: dec("1600"),
                open_interest_value: None,
            },
        ];
        let report = DataValidator::validate_open_interest(&rows);
        assert!(!report.passed());
        assert!(!report.is_fatal());
    }

    #[test]
    fn test_funding_rate_band() {
        let rows = vec![FundingRate {
            funding_time: base_time(),
            funding_rate: dec("0.01"), // 1% - 범위 밖
            mark_price: None,
        }];
        let report = DataValidator::validate_funding_rates(&rows);
        assert!(!report.passed());
        assert!(!report.is_fatal());
    }

    #[test]
    fn test_empty_batch_passes() {
        let report = DataValidator::validate_candles(Timeframe::M5, &[]);
        assert!(report.passed());
        assert!(!report.is_fatal());
    }

    #[test]
    fn test_report_summary() {
        let candles = vec![candle_at(0, "10", "5", "6", "7")];
        let report = DataValidator::validate_candles(Timeframe::M5, &candles);
        assert!(report.summary().contains("valid_ohlc"));
    }
}
