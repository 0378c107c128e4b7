//! Strategy contract: the boundary between the kernel and trading logic.
//!
//! Strategies are driven entirely by callbacks. They never touch the ledger
//! directly: positions and accounts arrive as read-only maps, and orders go out
//! through the [`StrategyContext`] passed to each callback. Intents queued on the
//! context are published by the kernel once the callback returns.

use crate::data::StopReason;
use crate::domain::{
    Account, Bar, Fill, FundingTick, OrderId, OrderIntent, OrderOffset, OrderSide, OrderType,
    PositionPair, Timestamp, Valuation,
};
use crate::engine::TradingWindow;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Free-form strategy parameters, as read from the run configuration.
pub type StrategyParams = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StrategyError {
    #[error("unknown strategy '{0}'")]
    Unknown(String),

    #[error("missing parameter '{0}'")]
    MissingParam(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },
}

/// Numeric parameter with a fallback when absent.
pub fn param_f64(params: &StrategyParams, name: &str, default: f64) -> Result<f64, StrategyError> {
    match params.get(name) {
        None => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| StrategyError::InvalidParam {
            name: name.to_string(),
            reason: format!("expected a number, got {value}"),
        }),
    }
}

/// String parameter that must be present.
pub fn param_str<'p>(params: &'p StrategyParams, name: &str) -> Result<&'p str, StrategyError> {
    let value = params
        .get(name)
        .ok_or_else(|| StrategyError::MissingParam(name.to_string()))?;
    value.as_str().ok_or_else(|| StrategyError::InvalidParam {
        name: name.to_string(),
        reason: format!("expected a string, got {value}"),
    })
}

/// Trading logic driven by kernel callbacks.
///
/// Only `name` and `on_bar` are required. Callback order within one market batch:
/// `on_position`/`on_account` (after the ledger marks), then `on_funding` if the batch
/// carries funding, then `on_bar` if it carries bars. After each fill the ledger
/// update is delivered first, then `on_order`.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// One-time setup before the first event.
    fn on_init(&mut self, _params: &StrategyParams) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, bars: &BTreeMap<String, Bar>);

    fn on_funding(
        &mut self,
        _ctx: &mut StrategyContext<'_>,
        _funding: &BTreeMap<String, FundingTick>,
    ) {
    }

    /// Called after every successful match.
    fn on_order(&mut self, _ctx: &mut StrategyContext<'_>, _fill: &Fill) {}

    fn on_position(
        &mut self,
        _ctx: &mut StrategyContext<'_>,
        _positions: &BTreeMap<String, PositionPair>,
    ) {
    }

    fn on_account(&mut self, _ctx: &mut StrategyContext<'_>, _accounts: &BTreeMap<String, Account>) {}

    /// Called once when the run terminates.
    fn on_stop(&mut self, _reason: &StopReason) {}
}

/// Per-callback view of the kernel handed to a strategy.
pub struct StrategyContext<'a> {
    now: Option<Timestamp>,
    window: &'a TradingWindow,
    last_bars: &'a BTreeMap<String, Bar>,
    valuations: &'a BTreeMap<String, Valuation>,
    min_unit: f64,
    next_order_id: &'a mut OrderId,
    intents: Vec<OrderIntent>,
    refused: u64,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        now: Option<Timestamp>,
        window: &'a TradingWindow,
        last_bars: &'a BTreeMap<String, Bar>,
        valuations: &'a BTreeMap<String, Valuation>,
        min_unit: f64,
        next_order_id: &'a mut OrderId,
    ) -> Self {
        Self {
            now,
            window,
            last_bars,
            valuations,
            min_unit,
            next_order_id,
            intents: Vec::new(),
            refused: 0,
        }
    }

    /// Simulation time of the event being delivered.
    pub fn now(&self) -> Option<Timestamp> {
        self.now
    }

    pub fn window(&self) -> &TradingWindow {
        self.window
    }

    /// Whether `send_order` would currently accept an order.
    pub fn is_trading(&self) -> bool {
        self.now.is_some_and(|now| self.window.contains(now))
    }

    pub fn last_bar(&self, symbol: &str) -> Option<&Bar> {
        self.last_bars.get(symbol)
    }

    pub fn last_bars(&self) -> &BTreeMap<String, Bar> {
        self.last_bars
    }

    pub fn valuation(&self, symbol: &str) -> Option<&Valuation> {
        self.valuations.get(symbol)
    }

    pub fn min_unit(&self) -> f64 {
        self.min_unit
    }

    /// Intents queued so far in this callback.
    pub fn pending(&self) -> &[OrderIntent] {
        &self.intents
    }

    /// Queue an order. Returns `None` when the clock is outside the trading window,
    /// the symbol is not traded, or the size is below the minimum unit.
    pub fn send_order(
        &mut self,
        symbol: &str,
        price: f64,
        contracts: f64,
        side: OrderSide,
        order_type: OrderType,
        offset: OrderOffset,
    ) -> Option<OrderIntent> {
        let Some(now) = self.now.filter(|now| self.window.contains(*now)) else {
            debug!(symbol, now = ?self.now, "order outside trading window refused");
            self.refused += 1;
            return None;
        };
        if !self.valuations.contains_key(symbol) {
            debug!(symbol, "order for untraded symbol refused");
            self.refused += 1;
            return None;
        }
        if !(contracts.is_finite() && contracts > 0.0 && contracts >= self.min_unit) {
            debug!(symbol, contracts, min_unit = self.min_unit, "order below minimum unit refused");
            self.refused += 1;
            return None;
        }

        let id = *self.next_order_id;
        *self.next_order_id = id.next();
        let intent = OrderIntent {
            id,
            timestamp: now,
            symbol: symbol.to_string(),
            side,
            offset,
            price,
            contracts,
            order_type,
            context_bar: self.last_bars.get(symbol).map(|bar| bar.timestamp),
        };
        self.intents.push(intent.clone());
        Some(intent)
    }

    fn market(
        &mut self,
        symbol: &str,
        contracts: f64,
        side: OrderSide,
        offset: OrderOffset,
    ) -> Option<OrderIntent> {
        let price = self.last_bar(symbol).map_or(0.0, |bar| bar.close);
        self.send_order(symbol, price, contracts, side, OrderType::Market, offset)
    }

    /// Market order opening or growing the long leg.
    pub fn buy(&mut self, symbol: &str, contracts: f64) -> Option<OrderIntent> {
        self.market(symbol, contracts, OrderSide::Buy, OrderOffset::Open)
    }

    /// Market order reducing the long leg.
    pub fn sell(&mut self, symbol: &str, contracts: f64) -> Option<OrderIntent> {
        self.market(symbol, contracts, OrderSide::Sell, OrderOffset::Close)
    }

    /// Market order opening or growing the short leg.
    pub fn short(&mut self, symbol: &str, contracts: f64) -> Option<OrderIntent> {
        self.market(symbol, contracts, OrderSide::Sell, OrderOffset::Open)
    }

    /// Market order reducing the short leg.
    pub fn cover(&mut self, symbol: &str, contracts: f64) -> Option<OrderIntent> {
        self.market(symbol, contracts, OrderSide::Buy, OrderOffset::Close)
    }

    /// Queued intents and the number of refused orders.
    pub fn into_intents(self) -> (Vec<OrderIntent>, u64) {
        (self.intents, self.refused)
    }
}
