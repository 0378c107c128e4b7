//! Order intents emitted by strategies.

use super::ids::OrderId;
use super::position::PositionSide;
use super::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderOffset {
    Open,
    Close,
}

/// Order type. Decides which fee rate applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Fee-schedule column an order type is charged under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    Taker,
    Maker,
}

impl OrderType {
    pub fn liquidity(self) -> Liquidity {
        match self {
            OrderType::Market => Liquidity::Taker,
            OrderType::Limit => Liquidity::Maker,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

impl fmt::Display for OrderOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderOffset::Open => write!(f, "open"),
            OrderOffset::Close => write!(f, "close"),
        }
    }
}

/// Which position leg a side/offset pair acts on.
///
/// Buy+Open and Sell+Close touch the long leg; Sell+Open and Buy+Close the short leg.
pub fn position_side(side: OrderSide, offset: OrderOffset) -> PositionSide {
    match (side, offset) {
        (OrderSide::Buy, OrderOffset::Open) | (OrderSide::Sell, OrderOffset::Close) => {
            PositionSide::Long
        }
        (OrderSide::Sell, OrderOffset::Open) | (OrderSide::Buy, OrderOffset::Close) => {
            PositionSide::Short
        }
    }
}

/// A strategy's request to trade, consumed exactly once by the matching engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: OrderId,
    /// Simulation clock at submission.
    pub timestamp: Timestamp,
    pub symbol: String,
    pub side: OrderSide,
    pub offset: OrderOffset,
    /// Price the strategy quoted. Market fills ignore it and use the bar close.
    pub price: f64,
    /// Requested size in contracts.
    pub contracts: f64,
    pub order_type: OrderType,
    /// Timestamp of the bar for `symbol` the strategy saw when it submitted.
    pub context_bar: Option<Timestamp>,
}

impl OrderIntent {
    pub fn position_side(&self) -> PositionSide {
        position_side(self.side, self.offset)
    }
}
