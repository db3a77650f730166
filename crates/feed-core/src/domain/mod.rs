//! 도메인 레코드 타입.

pub mod market_data;

pub use market_data::*;
