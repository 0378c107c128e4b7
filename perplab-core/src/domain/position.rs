//! Position: one leg (long or short) of a symbol's hedge-mode book.
//!
//! Each symbol carries both legs at once. A leg moves between two states:
//! `Net` (no contracts, no cost basis) and open (`Long`/`Short`, contracts > 0).
//!
//! The fields that define the state (`contracts`, `frozen`, `avg_price`, `direction`)
//! are private and only change through the transition methods below. `volume` and
//! `available` are derived on read.
//!
//! PnL bookkeeping, all in trade unit:
//! - `profit_real`: cumulative realized PnL (fees, closes, funding).
//! - `profit_unreal`: mark-to-market of the open contracts against `avg_price`.
//! - `trip_real` / `trip_unreal`: the same figures for the current round trip only;
//!   zeroed when the leg goes flat.
//! - `hedge_pnl`, `position_pnl`, `funding_pnl`: the current step's PnL split by cause
//!   (fees, price movement since the previous mark, funding). A step begins at each
//!   mark-to-market.

use super::fill::Fill;
use super::instrument::Valuation;
use super::{Timestamp, CONTRACT_EPSILON};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which leg of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for long, −1 for short. Applied to long-leg PnL formulas.
    pub fn sign(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction tag of a leg. `Net` whenever the leg holds no contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Net,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub valuation: Valuation,
    direction: Direction,
    contracts: f64,
    frozen: f64,
    avg_price: f64,
    /// Latest mark (bar close or fill reference price).
    pub mark_price: f64,
    pub timestamp: Option<Timestamp>,
    /// Traded volume since the last mark-to-market.
    pub trade_volume: f64,
    /// Cumulative traded volume over the run.
    pub turnover: f64,
    pub fee_paid: f64,
    pub margin_frozen: f64,
    pub profit_real: f64,
    pub profit_unreal: f64,
    pub profit_total: f64,
    pub trip_real: f64,
    pub trip_unreal: f64,
    pub hedge_pnl: f64,
    pub position_pnl: f64,
    pub funding_pnl: f64,
    pub total_pnl: f64,
    /// Timestamp of the last mark-to-market; funding at another time opens a new step.
    last_mark: Option<Timestamp>,
}

impl Position {
    pub fn new(symbol: impl Into<String>, side: PositionSide, valuation: Valuation) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            valuation,
            direction: Direction::Net,
            contracts: 0.0,
            frozen: 0.0,
            avg_price: 0.0,
            mark_price: 0.0,
            timestamp: None,
            trade_volume: 0.0,
            turnover: 0.0,
            fee_paid: 0.0,
            margin_frozen: 0.0,
            profit_real: 0.0,
            profit_unreal: 0.0,
            profit_total: 0.0,
            trip_real: 0.0,
            trip_unreal: 0.0,
            hedge_pnl: 0.0,
            position_pnl: 0.0,
            funding_pnl: 0.0,
            total_pnl: 0.0,
            last_mark: None,
        }
    }

    pub fn contracts(&self) -> f64 {
        self.contracts
    }

    pub fn frozen(&self) -> f64 {
        self.frozen
    }

    /// Contracts not reserved by pending closes.
    pub fn available(&self) -> f64 {
        self.contracts - self.frozen
    }

    pub fn avg_price(&self) -> f64 {
        self.avg_price
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Exposure in trade unit, valued at the entry price.
    pub fn volume(&self) -> f64 {
        self.valuation.value(self.contracts, self.avg_price)
    }

    pub fn is_flat(&self) -> bool {
        self.contracts <= CONTRACT_EPSILON
    }

    fn open_direction(&self) -> Direction {
        match self.side {
            PositionSide::Long => Direction::Long,
            PositionSide::Short => Direction::Short,
        }
    }

    /// Signed PnL of the open contracts from `reference` to `price`.
    fn leg_pnl(&self, price: f64, reference: f64, contracts: f64) -> f64 {
        self.side.sign() * self.valuation.pnl(price, reference, contracts)
    }

    fn refresh_totals(&mut self) {
        self.total_pnl = self.position_pnl + self.hedge_pnl + self.funding_pnl;
        self.profit_total = self.profit_real + self.profit_unreal;
    }

    fn reset_if_flat(&mut self) {
        if self.is_flat() {
            self.contracts = 0.0;
            self.frozen = 0.0;
            self.avg_price = 0.0;
            self.direction = Direction::Net;
            self.profit_unreal = 0.0;
            self.trip_real = 0.0;
            self.trip_unreal = 0.0;
        }
    }

    /// Apply an opening fill: grow the leg and re-average the entry price.
    pub fn apply_open(&mut self, fill: &Fill) {
        self.mark_price = fill.last_price;
        self.timestamp = Some(fill.timestamp);
        self.direction = self.open_direction();
        self.trade_volume += fill.traded_volume;
        self.turnover += fill.traded_volume;
        self.fee_paid += fill.fee;
        self.avg_price = Valuation::weighted_avg_price(
            self.avg_price,
            self.contracts,
            fill.avg_price,
            fill.traded_contracts,
        );
        self.contracts += fill.traded_contracts;

        self.profit_unreal = self.leg_pnl(self.mark_price, self.avg_price, self.contracts);
        self.trip_unreal = self.profit_unreal;
        self.profit_real -= fill.fee;
        self.trip_real -= fill.fee;
        self.hedge_pnl -= fill.fee;
        self.refresh_totals();
    }

    /// Apply a closing fill. Returns the contracts actually closed, which is the
    /// fill size capped at the open contracts. Volume and fee count only the
    /// closed share of an oversized fill.
    pub fn apply_close(&mut self, fill: &Fill) -> f64 {
        let closed = fill.traded_contracts.min(self.contracts);
        let share = if fill.traded_contracts > 0.0 {
            closed / fill.traded_contracts
        } else {
            0.0
        };
        let volume = fill.traded_volume * share;
        let fee = fill.fee * share;
        self.mark_price = fill.last_price;
        self.timestamp = Some(fill.timestamp);
        self.trade_volume += volume;
        self.turnover += volume;
        self.fee_paid += fee;
        self.contracts -= closed;

        let realized = self.leg_pnl(fill.avg_price, self.avg_price, closed) - fee;
        self.profit_real += realized;
        self.trip_real += realized;
        self.hedge_pnl -= fee;
        self.profit_unreal = self.leg_pnl(self.mark_price, self.avg_price, self.contracts);
        self.trip_unreal = self.profit_unreal;

        self.reset_if_flat();
        self.refresh_totals();
        closed
    }

    /// Mark to a new close. Opens a new PnL step.
    pub fn mark_to_market(&mut self, price: f64, timestamp: Timestamp) {
        let previous = self.mark_price;
        self.trade_volume = 0.0;
        self.hedge_pnl = 0.0;
        self.funding_pnl = 0.0;
        self.position_pnl = if self.is_flat() {
            0.0
        } else {
            self.leg_pnl(price, previous, self.contracts)
        };
        if self.avg_price != 0.0 {
            self.profit_unreal = self.leg_pnl(price, self.avg_price, self.contracts);
            self.trip_unreal = self.profit_unreal;
        }
        if !self.is_flat() {
            self.timestamp = Some(timestamp);
        }
        self.mark_price = price;
        self.last_mark = Some(timestamp);
        self.refresh_totals();
    }

    /// Settle one funding print against the leg's volume. Longs pay a positive
    /// rate and shorts receive it. Returns the signed amount credited to the leg.
    pub fn settle_funding(&mut self, rate: f64, timestamp: Timestamp) -> f64 {
        if self.last_mark != Some(timestamp) {
            self.hedge_pnl = 0.0;
            self.position_pnl = 0.0;
        }
        let credited = -self.side.sign() * rate * self.volume();
        self.funding_pnl = credited;
        self.profit_real += credited;
        self.trip_real += credited;
        self.timestamp = Some(timestamp);
        self.refresh_totals();
        credited
    }
}

/// Both legs of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPair {
    pub long: Position,
    pub short: Position,
}

impl PositionPair {
    pub fn new(symbol: &str, valuation: Valuation) -> Self {
        Self {
            long: Position::new(symbol, PositionSide::Long, valuation),
            short: Position::new(symbol, PositionSide::Short, valuation),
        }
    }

    pub fn leg(&self, side: PositionSide) -> &Position {
        match side {
            PositionSide::Long => &self.long,
            PositionSide::Short => &self.short,
        }
    }

    pub fn leg_mut(&mut self, side: PositionSide) -> &mut Position {
        match side {
            PositionSide::Long => &mut self.long,
            PositionSide::Short => &mut self.short,
        }
    }

    pub fn legs(&self) -> [&Position; 2] {
        [&self.long, &self.short]
    }

    /// Net contracts, long minus short.
    pub fn net_contracts(&self) -> f64 {
        self.long.contracts() - self.short.contracts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fill::FillStatus;
    use crate::domain::ids::OrderId;
    use crate::domain::instrument::{Instrument, TradeUnit};
    use crate::domain::order::{OrderOffset, OrderSide, OrderType};
    use chrono::NaiveDate;

    const SYMBOL: &str = "BinanceU_BTCUSDT_perp";

    fn at(minute: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(0, minute, 0)
            .unwrap()
    }

    fn valuation(unit: TradeUnit) -> Valuation {
        Instrument::parse(SYMBOL).unwrap().valuation(unit).unwrap()
    }

    fn fill(side: OrderSide, offset: OrderOffset, contracts: f64, price: f64, fee: f64) -> Fill {
        let v = valuation(TradeUnit::Coin);
        Fill {
            order_id: OrderId(1),
            timestamp: at(1),
            symbol: SYMBOL.into(),
            side,
            offset,
            order_type: OrderType::Market,
            requested_contracts: contracts,
            requested_volume: v.value(contracts, price),
            traded_contracts: contracts,
            traded_volume: v.value(contracts, price),
            avg_price: price,
            fee,
            last_price: price,
            status: FillStatus::AllTraded,
        }
    }

    #[test]
    fn new_leg_is_net_and_empty() {
        let pos = Position::new(SYMBOL, PositionSide::Long, valuation(TradeUnit::Coin));
        assert_eq!(pos.direction(), Direction::Net);
        assert_eq!(pos.contracts(), 0.0);
        assert_eq!(pos.volume(), 0.0);
        assert_eq!(pos.available(), 0.0);
    }

    #[test]
    fn open_then_close_long_realizes_coin_return() {
        let mut pos = Position::new(SYMBOL, PositionSide::Long, valuation(TradeUnit::Coin));
        pos.apply_open(&fill(OrderSide::Buy, OrderOffset::Open, 0.5, 100.5, 0.0));
        assert_eq!(pos.mark_price, 100.5);
        assert_eq!(pos.avg_price(), 100.5);
        assert_eq!(pos.volume(), 0.5);
        assert_eq!(pos.trade_volume, 0.5);
        assert_eq!(pos.direction(), Direction::Long);

        let closed = pos.apply_close(&fill(OrderSide::Sell, OrderOffset::Close, 0.5, 103.5, 0.0));
        assert_eq!(closed, 0.5);
        assert_eq!(pos.mark_price, 103.5);
        assert_eq!(pos.avg_price(), 0.0);
        assert_eq!(pos.volume(), 0.0);
        assert_eq!(pos.trade_volume, 1.0);
        assert_eq!(pos.turnover, 1.0);
        assert_eq!(pos.direction(), Direction::Net);
        assert!((pos.profit_real - 0.014925373134328358).abs() < 1e-15);
        assert_eq!(pos.trip_real, 0.0);
    }

    #[test]
    fn short_leg_profits_when_price_falls() {
        let mut pos = Position::new(SYMBOL, PositionSide::Short, valuation(TradeUnit::Usd));
        let mut open = fill(OrderSide::Sell, OrderOffset::Open, 2.0, 100.0, 0.0);
        open.traded_volume = 200.0;
        open.requested_volume = 200.0;
        pos.apply_open(&open);
        pos.mark_to_market(90.0, at(2));
        assert!((pos.profit_unreal - 20.0).abs() < 1e-10);
        assert!((pos.position_pnl - 20.0).abs() < 1e-10);
        assert_eq!(pos.direction(), Direction::Short);
    }

    #[test]
    fn opening_fee_is_realized_loss() {
        let mut pos = Position::new(SYMBOL, PositionSide::Long, valuation(TradeUnit::Coin));
        pos.apply_open(&fill(OrderSide::Buy, OrderOffset::Open, 1.0, 100.0, 0.0004));
        assert!((pos.profit_real + 0.0004).abs() < 1e-12);
        assert!((pos.hedge_pnl + 0.0004).abs() < 1e-12);
        assert!((pos.total_pnl + 0.0004).abs() < 1e-12);
        assert!((pos.fee_paid - 0.0004).abs() < 1e-12);
    }

    #[test]
    fn oversized_close_is_capped_at_open_contracts() {
        let mut pos = Position::new(SYMBOL, PositionSide::Long, valuation(TradeUnit::Coin));
        pos.apply_open(&fill(OrderSide::Buy, OrderOffset::Open, 1.0, 100.0, 0.0));
        let closed = pos.apply_close(&fill(OrderSide::Sell, OrderOffset::Close, 3.0, 100.0, 0.0));
        assert_eq!(closed, 1.0);
        assert_eq!(pos.contracts(), 0.0);
        assert_eq!(pos.available(), 0.0);
    }

    #[test]
    fn oversized_close_books_only_the_closed_share() {
        let mut pos = Position::new(SYMBOL, PositionSide::Long, valuation(TradeUnit::Coin));
        pos.apply_open(&fill(OrderSide::Buy, OrderOffset::Open, 1.0, 100.0, 0.0));
        // Four contracts requested against one open: a quarter of the fill lands.
        pos.apply_close(&fill(OrderSide::Sell, OrderOffset::Close, 4.0, 100.0, 0.0008));
        assert!((pos.fee_paid - 0.0002).abs() < 1e-15);
        assert!((pos.trade_volume - 2.0).abs() < 1e-12);
        assert!((pos.turnover - 2.0).abs() < 1e-12);
        assert!((pos.profit_real + 0.0002).abs() < 1e-15);
        assert!((pos.hedge_pnl + 0.0002).abs() < 1e-15);
    }

    #[test]
    fn funding_without_mark_opens_new_step() {
        let mut pos = Position::new(SYMBOL, PositionSide::Long, valuation(TradeUnit::Usd));
        let mut open = fill(OrderSide::Buy, OrderOffset::Open, 1.0, 100.0, 0.0);
        open.traded_volume = 100.0;
        pos.apply_open(&open);
        pos.mark_to_market(101.0, at(2));
        assert!(pos.position_pnl != 0.0);
        let credited = pos.settle_funding(0.001, at(3));
        assert!((credited + 0.1).abs() < 1e-12);
        assert_eq!(pos.position_pnl, 0.0);
        assert!((pos.total_pnl + 0.1).abs() < 1e-12);
    }

    #[test]
    fn funding_at_mark_time_keeps_price_move() {
        let mut pos = Position::new(SYMBOL, PositionSide::Long, valuation(TradeUnit::Usd));
        let mut open = fill(OrderSide::Buy, OrderOffset::Open, 1.0, 100.0, 0.0);
        open.traded_volume = 100.0;
        pos.apply_open(&open);
        pos.mark_to_market(101.0, at(2));
        pos.settle_funding(0.001, at(2));
        assert!((pos.total_pnl - (1.0 - 0.1)).abs() < 1e-12);
    }
}
