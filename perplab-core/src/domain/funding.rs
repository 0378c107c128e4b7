use super::Timestamp;
use serde::{Deserialize, Serialize};

/// Funding-rate print for a perpetual symbol.
///
/// `symbol` is the owning trading symbol, not the `Funding_`-prefixed stream name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingTick {
    pub symbol: String,
    pub timestamp: Timestamp,
    pub funding_rate: f64,
}

impl FundingTick {
    pub fn new(symbol: impl Into<String>, timestamp: Timestamp, funding_rate: f64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            funding_rate,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.funding_rate.is_finite()
    }
}
