//! Account: one margin sub-account per traded symbol.

use super::position::PositionPair;
use super::Timestamp;
use serde::{Deserialize, Serialize};

/// Per-symbol margin account.
///
/// Every margin figure is recomputed from the owning [`PositionPair`] by
/// [`Account::recompute`]; none of them can be set directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub symbol: String,
    pub init_balance: f64,
    timestamp: Option<Timestamp>,
    margin_balance: f64,
    margin_position: f64,
    margin_frozen: f64,
    margin_available: f64,
    profit_real: f64,
    profit_unreal: f64,
    leverage: f64,
}

impl Account {
    pub fn new(symbol: impl Into<String>, init_balance: f64) -> Self {
        Self {
            symbol: symbol.into(),
            init_balance,
            timestamp: None,
            margin_balance: init_balance,
            margin_position: 0.0,
            margin_frozen: 0.0,
            margin_available: init_balance,
            profit_real: 0.0,
            profit_unreal: 0.0,
            leverage: 1.0,
        }
    }

    /// Rebuild the account from both legs of its symbol.
    pub fn recompute(&mut self, pair: &PositionPair) {
        self.timestamp = match (pair.long.timestamp, pair.short.timestamp) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.margin_position = pair.long.volume() + pair.short.volume();
        self.margin_frozen = pair.long.margin_frozen + pair.short.margin_frozen;
        self.profit_real = pair.long.profit_real + pair.short.profit_real;
        self.profit_unreal = pair.long.profit_unreal + pair.short.profit_unreal;
        self.margin_balance = self.init_balance + self.profit_real + self.profit_unreal;
        self.margin_available =
            self.margin_balance - self.profit_unreal - self.margin_position - self.margin_frozen;
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Initial balance plus realized and unrealized PnL.
    pub fn margin_balance(&self) -> f64 {
        self.margin_balance
    }

    /// Long plus short volume.
    pub fn margin_position(&self) -> f64 {
        self.margin_position
    }

    pub fn margin_frozen(&self) -> f64 {
        self.margin_frozen
    }

    /// Margin free for new orders.
    pub fn margin_available(&self) -> f64 {
        self.margin_available
    }

    pub fn profit_real(&self) -> f64 {
        self.profit_real
    }

    pub fn profit_unreal(&self) -> f64 {
        self.profit_unreal
    }

    pub fn leverage(&self) -> f64 {
        self.leverage
    }
}
