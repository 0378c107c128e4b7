//! Bar: one OHLCV candle for a symbol.

use super::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OHLCV bar for a single symbol at a single timestamp.
///
/// The extra volume columns follow the exchange kline layout: quote volume,
/// trade count, and the taker-buy share of base and quote volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub quote_volume: f64,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub taker_buy_volume: f64,
    #[serde(default)]
    pub taker_buy_quote_volume: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum BarError {
    #[error("bar {symbol}@{timestamp}: non-finite {field}")]
    NonFinite {
        symbol: String,
        timestamp: Timestamp,
        field: &'static str,
    },

    #[error("bar {symbol}@{timestamp}: close must be positive, got {close}")]
    NonPositiveClose {
        symbol: String,
        timestamp: Timestamp,
        close: f64,
    },

    #[error("bar {symbol}@{timestamp}: high {high} below low {low}")]
    HighBelowLow {
        symbol: String,
        timestamp: Timestamp,
        high: f64,
        low: f64,
    },
}

impl Bar {
    /// Construction-time validation. The kernel only ever fills against `close`,
    /// so a positive finite close is the hard requirement.
    pub fn validate(&self) -> Result<(), BarError> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(BarError::NonFinite {
                    symbol: self.symbol.clone(),
                    timestamp: self.timestamp,
                    field,
                });
            }
        }
        if self.close <= 0.0 {
            return Err(BarError::NonPositiveClose {
                symbol: self.symbol.clone(),
                timestamp: self.timestamp,
                close: self.close,
            });
        }
        if self.high < self.low {
            return Err(BarError::HighBelowLow {
                symbol: self.symbol.clone(),
                timestamp: self.timestamp,
                high: self.high,
                low: self.low,
            });
        }
        Ok(())
    }

    /// Bar with all OHLC set to `close` and zero volume.
    pub fn flat(symbol: impl Into<String>, timestamp: Timestamp, close: f64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
            quote_volume: 0.0,
            count: 0,
            taker_buy_volume: 0.0,
            taker_buy_quote_volume: 0.0,
        }
    }
}
