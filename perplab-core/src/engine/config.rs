//! Engine configuration and the pre-flight validation pass.
//!
//! `EngineConfig::validate` resolves every configured symbol into an
//! [`InstrumentTerms`] (contract terms, valuation, fee rates, funding settlement
//! times, starting balance). Anything the replay would otherwise discover mid-run,
//! such as an unsupported trade unit or a symbol the fee schedule does not cover,
//! is rejected here before the first event is published.

use super::fees::{FeeRates, FeeSchedule};
use crate::data::ExhaustionPolicy;
use crate::domain::{ContractError, Exchange, Instrument, Timestamp, TradeUnit, Valuation};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("no instruments configured")]
    EmptyUniverse,

    #[error("instrument '{0}' is configured twice")]
    DuplicateInstrument(String),

    #[error("fee schedule has no {exchange} rates covering '{symbol}'")]
    MissingFees { symbol: String, exchange: Exchange },

    #[error("fee rates for '{symbol}' are not finite")]
    InvalidFees { symbol: String },

    #[error("time window out of order: lookback {lookback}, start {start}, end {end}")]
    WindowOrder {
        lookback: Timestamp,
        start: Timestamp,
        end: Timestamp,
    },

    #[error("slippage {0} must be in [0, 1)")]
    Slippage(f64),

    #[error("minimum unit {0} must be finite and non-negative")]
    MinUnit(f64),

    #[error("initial balance {balance} for '{symbol}' must be finite and non-negative")]
    Balance { symbol: String, balance: f64 },
}

/// One entry of the symbol universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    /// Overrides the built-in multiplier table.
    #[serde(default)]
    pub multiplier: Option<f64>,
    /// Overrides `EngineConfig::initial_balance` for this symbol's account.
    #[serde(default)]
    pub initial_balance: Option<f64>,
}

impl InstrumentConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            multiplier: None,
            initial_balance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub trade_unit: TradeUnit,
    /// Fractional price degradation applied at fill time.
    #[serde(default)]
    pub slippage: f64,
    /// Smallest order size, in contracts, the kernel accepts.
    #[serde(default)]
    pub min_unit: f64,
    #[serde(default)]
    pub fees: FeeSchedule,
    /// Funding settlement times of day. Defaults to each exchange's schedule.
    #[serde(default)]
    pub settlement_times: Option<Vec<NaiveTime>>,
    pub instruments: Vec<InstrumentConfig>,
    pub lookback_time: Timestamp,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub initial_balance: f64,
    #[serde(default)]
    pub exhaustion: ExhaustionPolicy,
    /// Cap on the bus history log. `None`, the default, keeps every event
    /// in publication order; a cap drops the oldest entries first.
    #[serde(default)]
    pub history_limit: Option<usize>,
}

impl EngineConfig {
    pub fn new(
        trade_unit: TradeUnit,
        lookback_time: Timestamp,
        start_time: Timestamp,
        end_time: Timestamp,
    ) -> Self {
        Self {
            trade_unit,
            slippage: 0.0,
            min_unit: 0.0,
            fees: FeeSchedule::new(),
            settlement_times: None,
            instruments: Vec::new(),
            lookback_time,
            start_time,
            end_time,
            initial_balance: 0.0,
            exhaustion: ExhaustionPolicy::default(),
            history_limit: None,
        }
    }

    pub fn with_instrument(mut self, symbol: impl Into<String>) -> Self {
        self.instruments.push(InstrumentConfig::new(symbol));
        self
    }

    pub fn with_instrument_config(mut self, instrument: InstrumentConfig) -> Self {
        self.instruments.push(instrument);
        self
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_slippage(mut self, slippage: f64) -> Self {
        self.slippage = slippage;
        self
    }

    pub fn with_min_unit(mut self, min_unit: f64) -> Self {
        self.min_unit = min_unit;
        self
    }

    pub fn with_initial_balance(mut self, balance: f64) -> Self {
        self.initial_balance = balance;
        self
    }

    pub fn with_settlement_times(mut self, times: Vec<NaiveTime>) -> Self {
        self.settlement_times = Some(times);
        self
    }

    pub fn with_exhaustion(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion = policy;
        self
    }

    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    /// Pre-flight pass. Resolves the universe or returns the first problem found.
    pub fn validate(&self) -> Result<Universe, ConfigError> {
        if !(self.lookback_time <= self.start_time && self.start_time <= self.end_time) {
            return Err(ConfigError::WindowOrder {
                lookback: self.lookback_time,
                start: self.start_time,
                end: self.end_time,
            });
        }
        if !(self.slippage.is_finite() && (0.0..1.0).contains(&self.slippage)) {
            return Err(ConfigError::Slippage(self.slippage));
        }
        if !(self.min_unit.is_finite() && self.min_unit >= 0.0) {
            return Err(ConfigError::MinUnit(self.min_unit));
        }
        if self.instruments.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }

        let mut terms = BTreeMap::new();
        for entry in &self.instruments {
            if terms.contains_key(&entry.symbol) {
                return Err(ConfigError::DuplicateInstrument(entry.symbol.clone()));
            }
            let resolved = self.resolve(entry)?;
            terms.insert(entry.symbol.clone(), resolved);
        }
        Ok(Universe { terms })
    }

    fn resolve(&self, entry: &InstrumentConfig) -> Result<InstrumentTerms, ConfigError> {
        let instrument = match entry.multiplier {
            Some(m) => Instrument::with_multiplier(&entry.symbol, m)?,
            None => Instrument::parse(&entry.symbol)?,
        };
        let valuation = instrument.valuation(self.trade_unit)?;

        let fees = self
            .fees
            .rates(&instrument.id)
            .ok_or_else(|| ConfigError::MissingFees {
                symbol: entry.symbol.clone(),
                exchange: instrument.id.exchange,
            })?;
        if !fees.is_valid() {
            return Err(ConfigError::InvalidFees {
                symbol: entry.symbol.clone(),
            });
        }

        let initial_balance = entry.initial_balance.unwrap_or(self.initial_balance);
        if !(initial_balance.is_finite() && initial_balance >= 0.0) {
            return Err(ConfigError::Balance {
                symbol: entry.symbol.clone(),
                balance: initial_balance,
            });
        }

        let settlement_times = self
            .settlement_times
            .clone()
            .unwrap_or_else(|| instrument.id.exchange.default_settlement_times());

        Ok(InstrumentTerms {
            instrument,
            valuation,
            fees,
            settlement_times,
            initial_balance,
        })
    }
}

/// Validated contract terms of one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentTerms {
    pub instrument: Instrument,
    pub valuation: Valuation,
    pub fees: FeeRates,
    pub settlement_times: Vec<NaiveTime>,
    pub initial_balance: f64,
}

impl InstrumentTerms {
    pub fn is_settlement_time(&self, ts: Timestamp) -> bool {
        self.settlement_times.contains(&ts.time())
    }
}

/// Every symbol the run may trade, keyed by symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Universe {
    terms: BTreeMap<String, InstrumentTerms>,
}

impl Universe {
    pub fn get(&self, symbol: &str) -> Option<&InstrumentTerms> {
        self.terms.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.terms.contains_key(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InstrumentTerms)> {
        self.terms.iter()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Valuation per symbol, for strategies that size orders.
    pub fn valuations(&self) -> BTreeMap<String, Valuation> {
        self.terms
            .iter()
            .map(|(symbol, t)| (symbol.clone(), t.valuation))
            .collect()
    }
}
