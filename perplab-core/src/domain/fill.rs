use crate::domain::ids::OrderId;
use crate::domain::order::{position_side, OrderOffset, OrderSide, OrderType};
use crate::domain::position::PositionSide;
use crate::domain::Timestamp;
use serde::{Deserialize, Serialize};

/// Outcome of a match. There is no partial-fill state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FillStatus {
    AllTraded,
    Error { reason: String },
}

/// Fill record (order-back) produced by the matching engine.
///
/// Volumes are in the run's trade unit; `*_contracts` fields are raw contract counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub timestamp: Timestamp,
    pub symbol: String,
    pub side: OrderSide,
    pub offset: OrderOffset,
    pub order_type: OrderType,
    pub requested_contracts: f64,
    pub requested_volume: f64,
    pub traded_contracts: f64,
    pub traded_volume: f64,
    pub avg_price: f64,
    /// Fee in trade unit.
    pub fee: f64,
    /// Close of the bar the order matched against.
    pub last_price: f64,
    pub status: FillStatus,
}

impl Fill {
    pub fn position_side(&self) -> PositionSide {
        position_side(self.side, self.offset)
    }

    pub fn is_traded(&self) -> bool {
        self.status == FillStatus::AllTraded
    }
}
