//! Deterministic synthetic market data.
//!
//! Random walks seeded from the BLAKE3 hash of the symbol, so the same symbol and
//! window always produce the same stream. Useful for smoke runs and benchmarks
//! without exchange data on disk.

use chrono::{Duration, NaiveTime};
use perplab_core::domain::{Bar, FundingTick, Instrument, Timestamp};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const START_PRICE: f64 = 100.0;

/// Time range and spacing of a generated stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticSpec {
    pub start: Timestamp,
    /// Inclusive.
    pub end: Timestamp,
    pub interval: Duration,
}

impl SyntheticSpec {
    pub fn new(start: Timestamp, end: Timestamp, interval: Duration) -> Self {
        Self {
            start,
            end,
            interval,
        }
    }
}

fn rng_for(tag: &str, symbol: &str) -> StdRng {
    let seed = blake3::hash(format!("{tag}:{symbol}").as_bytes());
    StdRng::from_seed(*seed.as_bytes())
}

/// Random-walk bars every `spec.interval` from `spec.start` through `spec.end`.
pub fn synthetic_bars(symbol: &str, spec: &SyntheticSpec) -> Vec<Bar> {
    if spec.interval <= Duration::zero() {
        return Vec::new();
    }
    let mut rng = rng_for("bars", symbol);
    let mut bars = Vec::new();
    let mut price = START_PRICE;
    let mut ts = spec.start;

    while ts <= spec.end {
        let step: f64 = rng.gen_range(-0.004..0.004);
        let open = price;
        let close = price * (1.0 + step);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.002));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.002));
        let volume: f64 = rng.gen_range(10.0..1_000.0);
        let taker_share: f64 = rng.gen_range(0.3..0.7);

        bars.push(Bar {
            symbol: symbol.to_string(),
            timestamp: ts,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: volume * close,
            count: rng.gen_range(10..500u64),
            taker_buy_volume: volume * taker_share,
            taker_buy_quote_volume: volume * taker_share * close,
        });

        price = close;
        match ts.checked_add_signed(spec.interval) {
            Some(next) => ts = next,
            None => break,
        }
    }
    bars
}

/// Settlement times for a symbol: the override if given, else its exchange's schedule.
pub fn settlement_times(symbol: &str, overrides: Option<&[NaiveTime]>) -> Vec<NaiveTime> {
    if let Some(times) = overrides {
        return times.to_vec();
    }
    match Instrument::parse(symbol) {
        Ok(instrument) => instrument.id.exchange.default_settlement_times(),
        Err(_) => [0, 8, 16]
            .into_iter()
            .filter_map(|h| NaiveTime::from_hms_opt(h, 0, 0))
            .collect(),
    }
}

/// One funding print per settlement time within `[start, end]`.
pub fn synthetic_funding(
    symbol: &str,
    start: Timestamp,
    end: Timestamp,
    times: &[NaiveTime],
) -> Vec<FundingTick> {
    let mut times = times.to_vec();
    times.sort();
    let mut rng = rng_for("funding", symbol);
    let mut ticks = Vec::new();
    let mut date = start.date();

    while date <= end.date() {
        for time in &times {
            let ts = date.and_time(*time);
            if ts < start || ts > end {
                continue;
            }
            let rate: f64 = rng.gen_range(-0.0003..0.0008);
            ticks.push(FundingTick::new(symbol, ts, rate));
        }
        let Some(next) = date.succ_opt() else {
            break;
        };
        date = next;
    }
    ticks
}
