//! Instruments, trade units, and contract math.
//!
//! A symbol is `<EXCHANGE>_<PAIR>_<TYPE>`, e.g. `BinanceU_BTCUSDT_perp`. The pair's
//! quote suffix decides the settlement convention: `USDT`/`USDC` pairs are linear
//! (margined and settled in the quote), `USD` pairs are inverse (margined and settled
//! in the base coin).
//!
//! Every volume and PnL figure in the ledger is expressed in the run's [`TradeUnit`].
//! [`Valuation`] bundles the multiplier, settlement convention, and trade unit of one
//! instrument and owns all conversions, so the ledger never branches on exchange.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix that marks a funding stream name, e.g. `Funding_BinanceU_BTCUSDT_perp`.
pub const FUNDING_PREFIX: &str = "Funding_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// Binance USDⓈ-margined futures.
    BinanceU,
    /// Binance coin-margined futures.
    BinanceC,
    BybitU,
    BybitC,
    Bitmex,
    HuobiSwap,
    OkexSwap,
}

impl Exchange {
    pub const ALL: [Exchange; 7] = [
        Exchange::BinanceU,
        Exchange::BinanceC,
        Exchange::BybitU,
        Exchange::BybitC,
        Exchange::Bitmex,
        Exchange::HuobiSwap,
        Exchange::OkexSwap,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Exchange::BinanceU => "BinanceU",
            Exchange::BinanceC => "BinanceC",
            Exchange::BybitU => "BybitU",
            Exchange::BybitC => "BybitC",
            Exchange::Bitmex => "Bitmex",
            Exchange::HuobiSwap => "HuobiSwap",
            Exchange::OkexSwap => "OkexSwap",
        }
    }

    /// Times of day at which the exchange settles funding.
    pub fn default_settlement_times(self) -> Vec<NaiveTime> {
        let hours: [u32; 3] = match self {
            Exchange::Bitmex => [4, 12, 20],
            _ => [0, 8, 16],
        };
        hours
            .iter()
            .filter_map(|h| NaiveTime::from_hms_opt(*h, 0, 0))
            .collect()
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Exchange::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ContractError::UnknownExchange(s.to_string()))
    }
}

/// Quote-asset class of a pair. Keys the futures section of the fee schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteClass {
    Usdt,
    Usdc,
    Usd,
}

impl QuoteClass {
    /// Split a pair into base asset and quote class. `USDT`/`USDC` are tried before `USD`.
    pub fn split_pair(pair: &str) -> Option<(&str, QuoteClass)> {
        let upper = pair.to_ascii_uppercase();
        let (suffix, class) = if upper.ends_with("USDT") {
            ("USDT", QuoteClass::Usdt)
        } else if upper.ends_with("USDC") {
            ("USDC", QuoteClass::Usdc)
        } else if upper.ends_with("USD") {
            ("USD", QuoteClass::Usd)
        } else {
            return None;
        };
        let base = &pair[..pair.len() - suffix.len()];
        if base.is_empty() {
            None
        } else {
            Some((base, class))
        }
    }

    pub fn settlement(self) -> Settlement {
        match self {
            QuoteClass::Usdt | QuoteClass::Usdc => Settlement::Linear,
            QuoteClass::Usd => Settlement::Inverse,
        }
    }
}

/// Contract settlement convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Settlement {
    /// Quote-margined; PnL is linear in price.
    Linear,
    /// Coin-margined; PnL is linear in 1/price.
    Inverse,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractType {
    Perpetual,
    Spot,
    /// Dated delivery contract, tagged as in the symbol (e.g. `quarter`).
    Delivery(String),
}

impl ContractType {
    fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "perp" | "swap" | "perpetual" => ContractType::Perpetual,
            "spot" => ContractType::Spot,
            _ => ContractType::Delivery(tag.to_string()),
        }
    }

    fn tag(&self) -> &str {
        match self {
            ContractType::Perpetual => "perp",
            ContractType::Spot => "spot",
            ContractType::Delivery(tag) => tag,
        }
    }
}

/// Parsed `<EXCHANGE>_<PAIR>_<TYPE>` symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentId {
    pub exchange: Exchange,
    pub pair: String,
    pub base: String,
    pub quote: QuoteClass,
    pub contract_type: ContractType,
}

impl InstrumentId {
    pub fn is_spot(&self) -> bool {
        self.contract_type == ContractType::Spot
    }

    /// Bitmex quotes bitcoin as XBT.
    pub fn is_btc_based(&self) -> bool {
        let base = self.base.to_ascii_uppercase();
        base == "BTC" || base == "XBT"
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.exchange, self.pair, self.contract_type.tag())
    }
}

impl FromStr for InstrumentId {
    type Err = ContractError;

    fn from_str(symbol: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = symbol.split('_').collect();
        let [exchange, pair, tag] = parts.as_slice() else {
            return Err(ContractError::MalformedSymbol(symbol.to_string()));
        };
        let exchange: Exchange = exchange.parse()?;
        let (base, quote) = QuoteClass::split_pair(pair)
            .ok_or_else(|| ContractError::UnknownQuote(symbol.to_string()))?;
        if tag.is_empty() {
            return Err(ContractError::MalformedSymbol(symbol.to_string()));
        }
        Ok(Self {
            exchange,
            pair: pair.to_string(),
            base: base.to_string(),
            quote,
            contract_type: ContractType::parse(tag),
        })
    }
}

/// Strip the funding prefix from a stream name, returning the owning trading symbol.
pub fn owning_symbol(stream: &str) -> &str {
    stream.strip_prefix(FUNDING_PREFIX).unwrap_or(stream)
}

/// Unit in which volume and PnL are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeUnit {
    Btc,
    Contracts,
    Usd,
    Coin,
}

impl fmt::Display for TradeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeUnit::Btc => "BTC",
            TradeUnit::Contracts => "CONTRACTS",
            TradeUnit::Usd => "USD",
            TradeUnit::Coin => "COIN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContractError {
    #[error("malformed symbol '{0}' (expected <EXCHANGE>_<PAIR>_<TYPE>)")]
    MalformedSymbol(String),

    #[error("unknown exchange '{0}'")]
    UnknownExchange(String),

    #[error("symbol '{0}' has no recognised quote asset (USDT, USDC, USD)")]
    UnknownQuote(String),

    #[error("no contract multiplier known for {exchange} {pair}; set one in the config")]
    UnknownMultiplier { exchange: Exchange, pair: String },

    #[error("invalid contract multiplier {multiplier} for '{symbol}'")]
    InvalidMultiplier { symbol: String, multiplier: f64 },

    #[error("trade unit {unit} is not supported for {settlement:?} instrument '{symbol}'")]
    UnsupportedTradeUnit {
        symbol: String,
        unit: TradeUnit,
        settlement: Settlement,
    },
}

/// Contract multiplier from the built-in exchange tables.
pub fn default_multiplier(id: &InstrumentId) -> Result<f64, ContractError> {
    if id.is_spot() {
        return Ok(1.0);
    }
    let pair = id.pair.to_ascii_uppercase();
    let unknown = || ContractError::UnknownMultiplier {
        exchange: id.exchange,
        pair: id.pair.clone(),
    };
    let btc_usd = id.quote == QuoteClass::Usd && id.is_btc_based();
    match id.exchange {
        Exchange::BinanceU | Exchange::BybitU | Exchange::BybitC => Ok(1.0),
        Exchange::BinanceC => Ok(if btc_usd { 100.0 } else { 10.0 }),
        Exchange::Bitmex => {
            if id.is_btc_based() || id.quote != QuoteClass::Usd {
                Ok(1.0)
            } else {
                Err(unknown())
            }
        }
        Exchange::HuobiSwap => match id.quote {
            QuoteClass::Usd => Ok(if btc_usd { 100.0 } else { 10.0 }),
            _ => match pair.as_str() {
                "BTCUSDT" => Ok(0.001),
                "ETHUSDT" | "BCHUSDT" | "BSVUSDT" => Ok(0.01),
                _ => Err(unknown()),
            },
        },
        Exchange::OkexSwap => match id.quote {
            QuoteClass::Usd => Ok(if btc_usd { 100.0 } else { 10.0 }),
            _ => match pair.as_str() {
                "BTCUSDT" | "ETCUSDT" => Ok(0.01),
                "ETHUSDT" | "BCHUSDT" => Ok(0.1),
                "LTCUSDT" | "BSVUSDT" => Ok(1.0),
                "EOSUSDT" => Ok(10.0),
                "XRPUSDT" => Ok(100.0),
                "TRXUSDT" => Ok(1000.0),
                _ => Err(unknown()),
            },
        },
    }
}

/// A tradable symbol with its contract terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub id: InstrumentId,
    pub multiplier: f64,
    pub settlement: Settlement,
}

impl Instrument {
    /// Parse a symbol and look up its multiplier in the built-in tables.
    pub fn parse(symbol: &str) -> Result<Self, ContractError> {
        let id: InstrumentId = symbol.parse()?;
        let multiplier = default_multiplier(&id)?;
        Ok(Self {
            symbol: symbol.to_string(),
            settlement: id.quote.settlement(),
            id,
            multiplier,
        })
    }

    /// Parse a symbol with an explicit multiplier, bypassing the tables.
    pub fn with_multiplier(symbol: &str, multiplier: f64) -> Result<Self, ContractError> {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(ContractError::InvalidMultiplier {
                symbol: symbol.to_string(),
                multiplier,
            });
        }
        let id: InstrumentId = symbol.parse()?;
        Ok(Self {
            symbol: symbol.to_string(),
            settlement: id.quote.settlement(),
            id,
            multiplier,
        })
    }

    pub fn valuation(&self, unit: TradeUnit) -> Result<Valuation, ContractError> {
        Valuation::for_instrument(self, unit)
    }
}

/// Conversion rules between contracts, prices, and the trade unit for one instrument.
///
/// Formulas, with `q` contracts, multiplier `m`, price `p`, reference price `r`:
///
/// | settlement | unit | value | long PnL from r to p |
/// |---|---|---|---|
/// | linear | USD | q·m·p | q·m·(p−r) |
/// | linear | COIN | q·m | q·m·(p−r)/r |
/// | inverse | USD | q·m | q·m·(1/r−1/p)·p |
/// | inverse | COIN, BTC | q·m/p | q·m·(1/r−1/p) |
/// | inverse | CONTRACTS | q | q·m·(1/r−1/p) |
///
/// Linear instruments accept only USD and COIN; BTC requires a bitcoin base.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub multiplier: f64,
    pub settlement: Settlement,
    pub unit: TradeUnit,
}

impl Valuation {
    /// Build the valuation for an instrument, rejecting unsupported unit combinations.
    pub fn for_instrument(instrument: &Instrument, unit: TradeUnit) -> Result<Self, ContractError> {
        let unsupported = || ContractError::UnsupportedTradeUnit {
            symbol: instrument.symbol.clone(),
            unit,
            settlement: instrument.settlement,
        };
        match (instrument.settlement, unit) {
            (Settlement::Linear, TradeUnit::Usd | TradeUnit::Coin) => {}
            (Settlement::Linear, TradeUnit::Contracts | TradeUnit::Btc) => return Err(unsupported()),
            (Settlement::Inverse, TradeUnit::Btc) if !instrument.id.is_btc_based() => {
                return Err(unsupported())
            }
            (Settlement::Inverse, _) => {}
        }
        Ok(Self {
            multiplier: instrument.multiplier,
            settlement: instrument.settlement,
            unit,
        })
    }

    /// Exposure of `contracts` at `price`, in trade unit.
    pub fn value(&self, contracts: f64, price: f64) -> f64 {
        if contracts == 0.0 {
            return 0.0;
        }
        let notional = contracts * self.multiplier;
        match (self.settlement, self.unit) {
            (Settlement::Linear, TradeUnit::Usd) => notional * price,
            (Settlement::Linear, _) => notional,
            (Settlement::Inverse, TradeUnit::Usd) => notional,
            (Settlement::Inverse, TradeUnit::Contracts) => contracts,
            (Settlement::Inverse, _) => {
                if price > 0.0 {
                    notional / price
                } else {
                    0.0
                }
            }
        }
    }

    /// PnL of a long holding of `contracts` moved from `reference` to `price`.
    /// Short legs negate it.
    pub fn pnl(&self, price: f64, reference: f64, contracts: f64) -> f64 {
        if contracts == 0.0 || price <= 0.0 || reference <= 0.0 {
            return 0.0;
        }
        let notional = contracts * self.multiplier;
        match (self.settlement, self.unit) {
            (Settlement::Linear, TradeUnit::Usd) => notional * (price - reference),
            (Settlement::Linear, _) => notional * (price - reference) / reference,
            (Settlement::Inverse, TradeUnit::Usd) => {
                notional * (1.0 / reference - 1.0 / price) * price
            }
            (Settlement::Inverse, _) => notional * (1.0 / reference - 1.0 / price),
        }
    }

    /// Contracts needed to hold `value` (trade unit) at `price`.
    pub fn contracts_for_value(&self, value: f64, price: f64) -> f64 {
        match (self.settlement, self.unit) {
            (Settlement::Linear, TradeUnit::Usd) if price > 0.0 => {
                value / (self.multiplier * price)
            }
            (Settlement::Linear, TradeUnit::Usd) => 0.0,
            (Settlement::Linear, _) => value / self.multiplier,
            (Settlement::Inverse, TradeUnit::Usd) => value / self.multiplier,
            (Settlement::Inverse, TradeUnit::Contracts) => value,
            (Settlement::Inverse, _) => value * price / self.multiplier,
        }
    }

    /// Contract-weighted average of an existing entry price and a new fill.
    pub fn weighted_avg_price(
        avg_price: f64,
        contracts: f64,
        fill_price: f64,
        fill_contracts: f64,
    ) -> f64 {
        let total = contracts + fill_contracts;
        if total <= 0.0 {
            return 0.0;
        }
        (avg_price * contracts + fill_price * fill_contracts) / total
    }
}
