//! Matching engine: fills order intents against the latest bar per symbol.
//!
//! Policy:
//! - An intent is matched only if its timestamp is at or after the last bar seen for
//!   its symbol. Otherwise it is dropped: no fill, no retry.
//! - Fill price is the bar close moved against the order by the slippage fraction.
//! - Orders fill completely or not at all.

use super::config::Universe;
use super::fees::FeeRates;
use crate::data::MarketBatch;
use crate::domain::{Bar, Fill, FillStatus, OrderId, OrderIntent, OrderSide, Valuation};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    #[error("matching engine is closed")]
    Closed,

    #[error("order {id}: unknown symbol '{symbol}'")]
    UnknownSymbol { id: OrderId, symbol: String },

    #[error("order {id}: no bar seen yet for '{symbol}'")]
    NoBar { id: OrderId, symbol: String },

    #[error("order {id}: size {contracts} must be positive and finite")]
    InvalidSize { id: OrderId, contracts: f64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub received: u64,
    pub filled: u64,
    /// Dropped by the timing policy.
    pub dropped_late: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Copy)]
struct MatchTerms {
    valuation: Valuation,
    fees: FeeRates,
}

#[derive(Debug, Clone)]
pub struct MatchingEngine {
    terms: BTreeMap<String, MatchTerms>,
    slippage: f64,
    last_bars: BTreeMap<String, Bar>,
    stats: MatchStats,
    closed: bool,
}

impl MatchingEngine {
    pub fn new(universe: &Universe, slippage: f64) -> Self {
        let terms = universe
            .iter()
            .map(|(symbol, t)| {
                (
                    symbol.clone(),
                    MatchTerms {
                        valuation: t.valuation,
                        fees: t.fees,
                    },
                )
            })
            .collect();
        Self {
            terms,
            slippage,
            last_bars: BTreeMap::new(),
            stats: MatchStats::default(),
            closed: false,
        }
    }

    /// Remember the bars of a market batch. Funding records are ignored.
    pub fn on_market(&mut self, batch: &MarketBatch) {
        if self.closed {
            return;
        }
        for (symbol, bar) in &batch.bars {
            self.last_bars.insert(symbol.clone(), bar.clone());
        }
    }

    pub fn last_bar(&self, symbol: &str) -> Option<&Bar> {
        self.last_bars.get(symbol)
    }

    pub fn last_bars(&self) -> &BTreeMap<String, Bar> {
        &self.last_bars
    }

    pub fn stats(&self) -> MatchStats {
        self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Refuse further orders. Repeated calls are no-ops.
    pub fn close(&mut self) {
        if !self.closed {
            debug!(stats = ?self.stats, "matching engine closed");
            self.closed = true;
        }
    }

    fn fill_price(&self, close: f64, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => close * (1.0 + self.slippage),
            OrderSide::Sell => close * (1.0 - self.slippage),
        }
    }

    /// Match one intent.
    ///
    /// `Ok(None)` means the timing policy dropped the order. Errors are logged and
    /// counted here; callers only need to decide whether to publish the fill.
    pub fn match_order(&mut self, intent: &OrderIntent) -> Result<Option<Fill>, MatchError> {
        self.stats.received += 1;
        let result = self.try_match(intent);
        match &result {
            Ok(Some(_)) => self.stats.filled += 1,
            Ok(None) => {
                self.stats.dropped_late += 1;
                debug!(
                    id = %intent.id,
                    symbol = %intent.symbol,
                    timestamp = %intent.timestamp,
                    "order older than last bar dropped"
                );
            }
            Err(err) => {
                self.stats.errors += 1;
                warn!(error = %err, "matching error");
            }
        }
        result
    }

    fn try_match(&self, intent: &OrderIntent) -> Result<Option<Fill>, MatchError> {
        if self.closed {
            return Err(MatchError::Closed);
        }
        let terms = self
            .terms
            .get(&intent.symbol)
            .ok_or_else(|| MatchError::UnknownSymbol {
                id: intent.id,
                symbol: intent.symbol.clone(),
            })?;
        if !(intent.contracts.is_finite() && intent.contracts > 0.0) {
            return Err(MatchError::InvalidSize {
                id: intent.id,
                contracts: intent.contracts,
            });
        }
        let bar = self
            .last_bars
            .get(&intent.symbol)
            .ok_or_else(|| MatchError::NoBar {
                id: intent.id,
                symbol: intent.symbol.clone(),
            })?;
        if intent.timestamp < bar.timestamp {
            return Ok(None);
        }

        let price = self.fill_price(bar.close, intent.side);
        let contracts = intent.contracts;
        let volume = terms.valuation.value(contracts, price);
        let rate = terms.fees.rate(intent.order_type.liquidity());
        let fee = terms.valuation.value(rate * contracts, price);

        Ok(Some(Fill {
            order_id: intent.id,
            timestamp: intent.timestamp,
            symbol: intent.symbol.clone(),
            side: intent.side,
            offset: intent.offset,
            order_type: intent.order_type,
            requested_contracts: contracts,
            requested_volume: volume,
            traded_contracts: contracts,
            traded_volume: volume,
            avg_price: price,
            fee,
            last_price: bar.close,
            status: FillStatus::AllTraded,
        }))
    }
}
