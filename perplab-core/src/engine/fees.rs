//! Fee schedule: maker/taker rates per exchange and quote class.
//!
//! Futures rates are keyed by the pair's quote class (`usdt`, `usdc`, `usd`); spot
//! instruments use a single spot entry per exchange. Market orders pay the taker rate,
//! limit orders the maker rate.

use crate::domain::{Exchange, InstrumentId, Liquidity, OrderType, QuoteClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeRates {
    pub maker: f64,
    pub taker: f64,
}

impl FeeRates {
    pub fn new(maker: f64, taker: f64) -> Self {
        Self { maker, taker }
    }

    pub fn rate(&self, liquidity: Liquidity) -> f64 {
        match liquidity {
            Liquidity::Maker => self.maker,
            Liquidity::Taker => self.taker,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.maker.is_finite() && self.taker.is_finite()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeFees {
    #[serde(default)]
    pub spot: Option<FeeRates>,
    #[serde(default)]
    pub future: BTreeMap<QuoteClass, FeeRates>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeSchedule {
    exchanges: BTreeMap<Exchange, ExchangeFees>,
}

impl FeeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same rates for every exchange and quote class. Handy for tests and synthetic runs.
    pub fn flat(rates: FeeRates) -> Self {
        let mut schedule = Self::new();
        for exchange in Exchange::ALL {
            let entry = schedule.exchanges.entry(exchange).or_default();
            entry.spot = Some(rates);
            for quote in [QuoteClass::Usdt, QuoteClass::Usdc, QuoteClass::Usd] {
                entry.future.insert(quote, rates);
            }
        }
        schedule
    }

    pub fn with_rates(mut self, exchange: Exchange, quote: QuoteClass, rates: FeeRates) -> Self {
        self.exchanges
            .entry(exchange)
            .or_default()
            .future
            .insert(quote, rates);
        self
    }

    pub fn with_spot_rates(mut self, exchange: Exchange, rates: FeeRates) -> Self {
        self.exchanges.entry(exchange).or_default().spot = Some(rates);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn rates(&self, id: &InstrumentId) -> Option<FeeRates> {
        let fees = self.exchanges.get(&id.exchange)?;
        if id.is_spot() {
            fees.spot
        } else {
            fees.future.get(&id.quote).copied()
        }
    }

    /// Fee rate for an order type on `id`, or `None` if the schedule does not cover it.
    pub fn rate(&self, id: &InstrumentId, order_type: OrderType) -> Option<f64> {
        self.rates(id).map(|r| r.rate(order_type.liquidity()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Exchange, &ExchangeFees)> {
        self.exchanges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(symbol: &str) -> InstrumentId {
        symbol.parse().unwrap()
    }

    #[test]
    fn market_orders_pay_taker() {
        let schedule = FeeSchedule::new().with_rates(
            Exchange::BinanceU,
            QuoteClass::Usdt,
            FeeRates::new(0.0002, 0.0004),
        );
        let btc = id("BinanceU_BTCUSDT_perp");
        assert_eq!(schedule.rate(&btc, OrderType::Market), Some(0.0004));
        assert_eq!(schedule.rate(&btc, OrderType::Limit), Some(0.0002));
    }

    #[test]
    fn missing_quote_class_is_uncovered() {
        let schedule = FeeSchedule::new().with_rates(
            Exchange::BinanceU,
            QuoteClass::Usdt,
            FeeRates::new(0.0002, 0.0004),
        );
        assert!(schedule.rates(&id("BinanceU_BTCUSDC_perp")).is_none());
        assert!(schedule.rates(&id("BinanceC_BTCUSD_perp")).is_none());
    }

    #[test]
    fn spot_uses_spot_rates() {
        let schedule = FeeSchedule::new()
            .with_rates(Exchange::BinanceU, QuoteClass::Usdt, FeeRates::new(0.0002, 0.0004))
            .with_spot_rates(Exchange::BinanceU, FeeRates::new(0.001, 0.001));
        let spot = id("BinanceU_BTCUSDT_spot");
        assert_eq!(schedule.rate(&spot, OrderType::Market), Some(0.001));
    }

    #[test]
    fn flat_schedule_covers_everything() {
        let schedule = FeeSchedule::flat(FeeRates::new(0.0, 0.0));
        for symbol in ["Bitmex_XBTUSD_perp", "OkexSwap_ETHUSDT_perp", "HuobiSwap_BTCUSD_perp"] {
            assert_eq!(schedule.rate(&id(symbol), OrderType::Market), Some(0.0));
        }
    }

    #[test]
    fn deserializes_from_nested_table() {
        let json = r#"{
            "BinanceU": { "future": { "usdt": { "maker": 0.0002, "taker": 0.0004 } } },
            "BinanceC": { "future": { "usd": { "maker": 0.0001, "taker": 0.0005 } } }
        }"#;
        let schedule: FeeSchedule = serde_json::from_str(json).unwrap();
        assert_eq!(
            schedule.rate(&id("BinanceC_BTCUSD_perp"), OrderType::Market),
            Some(0.0005)
        );
    }
}
