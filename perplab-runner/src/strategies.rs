//! Sample strategies and the name-based factory the run config uses.
//!
//! - `buy_and_hold`: opens a long in every traded symbol on its first tradable bar.
//! - `funding_carry`: holds a short in one perp while the last funding print is above a
//!   threshold, so the short leg collects funding, and covers once it drops below.

use std::collections::{BTreeMap, BTreeSet};

use perplab_core::data::StopReason;
use perplab_core::domain::{Bar, FundingTick, PositionPair};
use perplab_core::strategy::{param_f64, param_str};
use perplab_core::{Strategy, StrategyContext, StrategyError, StrategyParams};
use tracing::{debug, info};

/// Names accepted by [`create_strategy`].
pub const STRATEGY_NAMES: [&str; 2] = ["buy_and_hold", "funding_carry"];

// ─── Factory ─────────────────────────────────────────────────────────

/// Create a strategy by name. Parameters are applied by `Strategy::on_init`.
pub fn create_strategy(name: &str) -> Result<Box<dyn Strategy>, StrategyError> {
    match name {
        "buy_and_hold" => Ok(Box::new(BuyAndHold::default())),
        "funding_carry" => Ok(Box::new(FundingCarry::default())),
        other => Err(StrategyError::Unknown(other.to_string())),
    }
}

fn positive(name: &str, value: f64) -> Result<f64, StrategyError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(StrategyError::InvalidParam {
            name: name.to_string(),
            reason: format!("must be positive, got {value}"),
        })
    }
}

// ─── Buy and hold ────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BuyAndHold {
    contracts: f64,
    entered: BTreeSet<String>,
}

impl Default for BuyAndHold {
    fn default() -> Self {
        Self {
            contracts: 1.0,
            entered: BTreeSet::new(),
        }
    }
}

impl BuyAndHold {
    pub fn entered(&self) -> &BTreeSet<String> {
        &self.entered
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn on_init(&mut self, params: &StrategyParams) -> Result<(), StrategyError> {
        self.contracts = positive("contracts", param_f64(params, "contracts", 1.0)?)?;
        Ok(())
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, bars: &BTreeMap<String, Bar>) {
        if !ctx.is_trading() {
            return;
        }
        for symbol in bars.keys() {
            if self.entered.contains(symbol) {
                continue;
            }
            if ctx.buy(symbol, self.contracts).is_some() {
                self.entered.insert(symbol.clone());
            }
        }
    }
}

// ─── Funding carry ───────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FundingCarry {
    symbol: String,
    threshold: f64,
    contracts: f64,
    last_rate: Option<f64>,
    /// Short contracts held, as last reported by the ledger.
    held: f64,
    entries: u64,
    exits: u64,
}

impl FundingCarry {
    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn exits(&self) -> u64 {
        self.exits
    }
}

impl Strategy for FundingCarry {
    fn name(&self) -> &str {
        "funding_carry"
    }

    fn on_init(&mut self, params: &StrategyParams) -> Result<(), StrategyError> {
        self.symbol = param_str(params, "symbol")?.to_string();
        self.threshold = param_f64(params, "threshold", 0.0001)?;
        self.contracts = positive("contracts", param_f64(params, "contracts", 1.0)?)?;
        Ok(())
    }

    fn on_funding(
        &mut self,
        _ctx: &mut StrategyContext<'_>,
        funding: &BTreeMap<String, FundingTick>,
    ) {
        if let Some(tick) = funding.get(&self.symbol) {
            self.last_rate = Some(tick.funding_rate);
        }
    }

    fn on_position(
        &mut self,
        _ctx: &mut StrategyContext<'_>,
        positions: &BTreeMap<String, PositionPair>,
    ) {
        if let Some(pair) = positions.get(&self.symbol) {
            self.held = pair.short.contracts();
        }
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, bars: &BTreeMap<String, Bar>) {
        if !bars.contains_key(&self.symbol) {
            return;
        }
        let Some(rate) = self.last_rate else {
            return;
        };
        if self.held == 0.0 && rate > self.threshold {
            if ctx.short(&self.symbol, self.contracts).is_some() {
                debug!(symbol = %self.symbol, rate, "carry entered");
                self.entries += 1;
            }
        } else if self.held > 0.0 && rate < self.threshold {
            if ctx.cover(&self.symbol, self.held).is_some() {
                debug!(symbol = %self.symbol, rate, "carry exited");
                self.exits += 1;
            }
        }
    }

    fn on_stop(&mut self, reason: &StopReason) {
        info!(
            symbol = %self.symbol,
            entries = self.entries,
            exits = self.exits,
            held = self.held,
            ?reason,
            "funding carry stopped"
        );
    }
}
