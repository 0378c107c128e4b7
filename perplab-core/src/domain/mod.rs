//! Domain types for the perpetual-futures kernel

pub mod account;
pub mod bar;
pub mod fill;
pub mod funding;
pub mod ids;
pub mod instrument;
pub mod order;
pub mod position;

pub use account::Account;
pub use bar::{Bar, BarError};
pub use fill::{Fill, FillStatus};
pub use funding::FundingTick;
pub use ids::OrderId;
pub use instrument::{
    ContractError, ContractType, Exchange, Instrument, InstrumentId, QuoteClass, Settlement,
    TradeUnit, Valuation,
};
pub use order::{Liquidity, OrderIntent, OrderOffset, OrderSide, OrderType};
pub use position::{Direction, Position, PositionPair, PositionSide};

/// Symbol type alias
pub type Symbol = String;

/// Simulation timestamp. Exchange data is UTC, stored without an offset.
pub type Timestamp = chrono::NaiveDateTime;

/// Tolerance below which a contract count is treated as zero.
pub const CONTRACT_EPSILON: f64 = 1e-10;
