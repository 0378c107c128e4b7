//! Ledger: sole owner of the position and account maps.
//!
//! Consumes fills, bar closes and funding prints. Every change to a leg is followed
//! by a recompute of the owning symbol's account and a journal snapshot, so the
//! account identity holds after each update.
//!
//! Within one market batch bars are applied before funding: a funding print that
//! shares the bar's timestamp is settled against the freshly marked leg.

use super::config::Universe;
use super::journal::{Journal, SnapshotSource};
use crate::data::MarketBatch;
use crate::domain::{
    Account, Bar, Fill, FillStatus, FundingTick, OrderId, OrderOffset, PositionPair,
    PositionSide, CONTRACT_EPSILON,
};
use chrono::NaiveTime;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("ledger is finalized")]
    Finalized,

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("fill for order {id} not traded: {reason}")]
    NotTraded { id: OrderId, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub fills_applied: u64,
    pub fills_rejected: u64,
    /// Close fills larger than the open leg, clamped to it.
    pub clamped_closes: u64,
    pub marks: u64,
    pub funding_settled: u64,
    /// Funding prints outside the settlement schedule.
    pub funding_skipped: u64,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    positions: BTreeMap<String, PositionPair>,
    accounts: BTreeMap<String, Account>,
    settlement_times: BTreeMap<String, Vec<NaiveTime>>,
    journal: Journal,
    stats: LedgerStats,
    finalized: bool,
}

impl Ledger {
    /// One position pair and one account per symbol, with `init` snapshots.
    pub fn new(universe: &Universe) -> Self {
        let mut ledger = Self {
            positions: BTreeMap::new(),
            accounts: BTreeMap::new(),
            settlement_times: BTreeMap::new(),
            journal: Journal::new(),
            stats: LedgerStats::default(),
            finalized: false,
        };
        for (symbol, terms) in universe.iter() {
            let pair = PositionPair::new(symbol, terms.valuation);
            let account = Account::new(symbol.clone(), terms.initial_balance);
            for leg in pair.legs() {
                ledger.journal.record_position(leg, SnapshotSource::Init);
            }
            ledger.journal.record_account(&account, SnapshotSource::Init);
            ledger.positions.insert(symbol.clone(), pair);
            ledger.accounts.insert(symbol.clone(), account);
            ledger
                .settlement_times
                .insert(symbol.clone(), terms.settlement_times.clone());
        }
        ledger
    }

    pub fn positions(&self) -> &BTreeMap<String, PositionPair> {
        &self.positions
    }

    pub fn accounts(&self) -> &BTreeMap<String, Account> {
        &self.accounts
    }

    pub fn position(&self, symbol: &str) -> Option<&PositionPair> {
        self.positions.get(symbol)
    }

    pub fn account(&self, symbol: &str) -> Option<&Account> {
        self.accounts.get(symbol)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn into_journal(self) -> Journal {
        self.journal
    }

    pub fn stats(&self) -> LedgerStats {
        self.stats
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn refresh_account(&mut self, symbol: &str, source: SnapshotSource) {
        if let (Some(pair), Some(account)) =
            (self.positions.get(symbol), self.accounts.get_mut(symbol))
        {
            account.recompute(pair);
            self.journal.record_account(account, source);
        }
    }

    /// Apply one fill to the leg it targets.
    pub fn apply_fill(&mut self, fill: &Fill) -> Result<(), LedgerError> {
        if self.finalized {
            return Err(LedgerError::Finalized);
        }
        if let FillStatus::Error { reason } = &fill.status {
            self.stats.fills_rejected += 1;
            error!(
                id = %fill.order_id,
                symbol = %fill.symbol,
                %reason,
                "fill not traded, ledger update skipped"
            );
            return Err(LedgerError::NotTraded {
                id: fill.order_id,
                reason: reason.clone(),
            });
        }
        let Some(pair) = self.positions.get_mut(&fill.symbol) else {
            self.stats.fills_rejected += 1;
            return Err(LedgerError::UnknownSymbol(fill.symbol.clone()));
        };

        let leg = pair.leg_mut(fill.position_side());
        match fill.offset {
            OrderOffset::Open => leg.apply_open(fill),
            OrderOffset::Close => {
                let open = leg.contracts();
                let closed = leg.apply_close(fill);
                if fill.traded_contracts > open + CONTRACT_EPSILON {
                    self.stats.clamped_closes += 1;
                    warn!(
                        id = %fill.order_id,
                        symbol = %fill.symbol,
                        side = %leg.side,
                        requested = fill.traded_contracts,
                        closed,
                        "close larger than open leg, clamped"
                    );
                }
            }
        }
        self.journal.record_position(leg, SnapshotSource::Order);
        self.stats.fills_applied += 1;
        let symbol = fill.symbol.clone();
        self.refresh_account(&symbol, SnapshotSource::Order);
        Ok(())
    }

    /// Mark every leg of the given symbols to its bar close. Returns the number of
    /// symbols with an open leg.
    pub fn mark_to_market(&mut self, bars: &BTreeMap<String, Bar>) -> usize {
        let mut open_symbols = 0;
        for (symbol, bar) in bars {
            let Some(pair) = self.positions.get_mut(symbol) else {
                continue;
            };
            let mut any_open = false;
            for side in [PositionSide::Long, PositionSide::Short] {
                let leg = pair.leg_mut(side);
                leg.mark_to_market(bar.close, bar.timestamp);
                if !leg.is_flat() {
                    any_open = true;
                    self.journal.record_position(leg, SnapshotSource::Pnl);
                }
            }
            self.stats.marks += 1;
            if any_open {
                open_symbols += 1;
                self.refresh_account(symbol, SnapshotSource::Pnl);
            }
        }
        open_symbols
    }

    /// Settle funding prints that fall on a settlement time. Returns the number of
    /// symbols with at least one leg settled.
    pub fn settle_funding(&mut self, ticks: &BTreeMap<String, FundingTick>) -> usize {
        let mut settled_symbols = 0;
        for (symbol, tick) in ticks {
            let on_schedule = self
                .settlement_times
                .get(symbol)
                .is_some_and(|times| times.contains(&tick.timestamp.time()));
            let Some(pair) = self.positions.get_mut(symbol) else {
                continue;
            };
            if !on_schedule {
                self.stats.funding_skipped += 1;
                continue;
            }
            let mut any = false;
            for side in [PositionSide::Long, PositionSide::Short] {
                let leg = pair.leg_mut(side);
                if leg.volume() == 0.0 {
                    continue;
                }
                leg.settle_funding(tick.funding_rate, tick.timestamp);
                self.journal.record_position(leg, SnapshotSource::Funding);
                any = true;
            }
            if any {
                self.stats.funding_settled += 1;
                settled_symbols += 1;
                self.refresh_account(symbol, SnapshotSource::Funding);
            }
        }
        settled_symbols
    }

    /// Apply one synchronizer batch: bars first, then funding.
    pub fn on_market(&mut self, batch: &MarketBatch) -> Result<(), LedgerError> {
        if self.finalized {
            return Err(LedgerError::Finalized);
        }
        self.mark_to_market(&batch.bars);
        self.settle_funding(&batch.funding);
        Ok(())
    }

    /// Refuse further updates and log the snapshot summary. Returns false if the
    /// ledger was already finalized.
    pub fn finalize(&mut self) -> bool {
        if self.finalized {
            return false;
        }
        self.finalized = true;
        let counts = self.journal.position_counts();
        let count = |source| counts.get(&source).copied().unwrap_or(0);
        info!(
            init = count(SnapshotSource::Init),
            order = count(SnapshotSource::Order),
            pnl = count(SnapshotSource::Pnl),
            funding = count(SnapshotSource::Funding),
            fills = self.stats.fills_applied,
            rejected = self.stats.fills_rejected,
            "ledger finalized"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Direction, Exchange, OrderSide, OrderType, QuoteClass, Timestamp, TradeUnit,
    };
    use crate::engine::config::EngineConfig;
    use crate::engine::fees::{FeeRates, FeeSchedule};
    use chrono::NaiveDate;

    const X: &str = "BinanceU_BTCUSDT_perp";

    fn at(hour: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn ledger() -> Ledger {
        let universe = EngineConfig::new(TradeUnit::Usd, at(0), at(0), at(23))
            .with_fees(FeeSchedule::new().with_rates(
                Exchange::BinanceU,
                QuoteClass::Usdt,
                FeeRates::new(0.0, 0.0),
            ))
            .with_initial_balance(1_000.0)
            .with_instrument(X)
            .validate()
            .unwrap();
        Ledger::new(&universe)
    }

    fn fill(side: OrderSide, offset: OrderOffset, contracts: f64, price: f64, hour: u32) -> Fill {
        Fill {
            order_id: OrderId(1),
            timestamp: at(hour),
            symbol: X.into(),
            side,
            offset,
            order_type: OrderType::Market,
            requested_contracts: contracts,
            requested_volume: contracts * price,
            traded_contracts: contracts,
            traded_volume: contracts * price,
            avg_price: price,
            fee: 0.0,
            last_price: price,
            status: FillStatus::AllTraded,
        }
    }

    fn bars(hour: u32, close: f64) -> BTreeMap<String, Bar> {
        BTreeMap::from([(X.to_string(), Bar::flat(X, at(hour), close))])
    }

    #[test]
    fn init_snapshots_cover_both_legs_and_account() {
        let l = ledger();
        let journal = l.journal().symbol(X).unwrap();
        assert_eq!(journal.long.len(), 1);
        assert_eq!(journal.short.len(), 1);
        assert_eq!(journal.account.len(), 1);
        assert_eq!(l.account(X).unwrap().margin_available(), 1_000.0);
    }

    #[test]
    fn open_mark_close_long_linear() {
        let mut l = ledger();
        l.apply_fill(&fill(OrderSide::Buy, OrderOffset::Open, 1.0, 100.0, 1))
            .unwrap();
        let long = &l.position(X).unwrap().long;
        assert_eq!(long.avg_price(), 100.0);
        assert_eq!(long.contracts(), 1.0);

        assert_eq!(l.mark_to_market(&bars(2, 110.0)), 1);
        assert!((l.position(X).unwrap().long.profit_unreal - 10.0).abs() < 1e-10);

        l.apply_fill(&fill(OrderSide::Sell, OrderOffset::Close, 1.0, 110.0, 3))
            .unwrap();
        let long = &l.position(X).unwrap().long;
        assert!((long.profit_real - 10.0).abs() < 1e-10);
        assert_eq!(long.contracts(), 0.0);
        assert_eq!(long.avg_price(), 0.0);
        assert_eq!(long.direction(), Direction::Net);

        let account = l.account(X).unwrap();
        assert!((account.margin_balance() - 1_010.0).abs() < 1e-10);
        assert_eq!(account.margin_position(), 0.0);
    }

    #[test]
    fn flat_marks_leave_no_pnl_snapshot() {
        let mut l = ledger();
        assert_eq!(l.mark_to_market(&bars(1, 100.0)), 0);
        let journal = l.journal().symbol(X).unwrap();
        assert_eq!(journal.long.len(), 1);
        assert_eq!(l.stats().marks, 1);
    }

    #[test]
    fn funding_moves_realized_pnl_by_side() {
        let mut l = ledger();
        l.apply_fill(&fill(OrderSide::Buy, OrderOffset::Open, 1.0, 100.0, 1))
            .unwrap();
        l.apply_fill(&fill(OrderSide::Sell, OrderOffset::Open, 1.0, 100.0, 1))
            .unwrap();
        let ticks = BTreeMap::from([(X.to_string(), FundingTick::new(X, at(8), 0.001))]);
        assert_eq!(l.settle_funding(&ticks), 1);
        let pair = l.position(X).unwrap();
        assert!((pair.long.profit_real + 0.1).abs() < 1e-12);
        assert!((pair.short.profit_real - 0.1).abs() < 1e-12);
        assert_eq!(l.stats().funding_settled, 1);
    }

    #[test]
    fn funding_off_schedule_is_ignored() {
        let mut l = ledger();
        l.apply_fill(&fill(OrderSide::Buy, OrderOffset::Open, 1.0, 100.0, 1))
            .unwrap();
        let ticks = BTreeMap::from([(X.to_string(), FundingTick::new(X, at(9), 0.001))]);
        assert_eq!(l.settle_funding(&ticks), 0);
        assert_eq!(l.position(X).unwrap().long.profit_real, 0.0);
        assert_eq!(l.stats().funding_skipped, 1);
    }

    #[test]
    fn untraded_fill_is_rejected_without_change() {
        let mut l = ledger();
        let mut bad = fill(OrderSide::Buy, OrderOffset::Open, 1.0, 100.0, 1);
        bad.status = FillStatus::Error {
            reason: "rejected".into(),
        };
        let before = l.position(X).unwrap().clone();
        assert!(matches!(
            l.apply_fill(&bad),
            Err(LedgerError::NotTraded { .. })
        ));
        assert_eq!(l.position(X).unwrap(), &before);
        assert_eq!(l.stats().fills_rejected, 1);
    }

    #[test]
    fn oversized_close_is_clamped_and_counted() {
        let mut l = ledger();
        l.apply_fill(&fill(OrderSide::Sell, OrderOffset::Open, 1.0, 100.0, 1))
            .unwrap();
        l.apply_fill(&fill(OrderSide::Buy, OrderOffset::Close, 2.0, 90.0, 2))
            .unwrap();
        let short = l.position(X).unwrap().leg(PositionSide::Short);
        assert_eq!(short.contracts(), 0.0);
        assert!((short.profit_real - 10.0).abs() < 1e-10);
        assert_eq!(l.stats().clamped_closes, 1);
    }

    #[test]
    fn finalize_is_idempotent_and_blocks_updates() {
        let mut l = ledger();
        assert!(l.finalize());
        assert!(!l.finalize());
        assert_eq!(
            l.apply_fill(&fill(OrderSide::Buy, OrderOffset::Open, 1.0, 100.0, 1)),
            Err(LedgerError::Finalized)
        );
        assert_eq!(
            l.on_market(&MarketBatch::new(at(2))),
            Err(LedgerError::Finalized)
        );
    }
}
