//! Snapshot journal: the ordered position and account history the ledger leaves behind.
//!
//! Each snapshot carries a provenance tag: `init` at construction, `order` after a
//! fill, `pnl` after a mark-to-market of an open leg, `funding` after a settlement.

use crate::domain::{Account, Direction, Position, PositionSide, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    Init,
    Order,
    Pnl,
    Funding,
}

impl SnapshotSource {
    pub const ALL: [SnapshotSource; 4] = [
        SnapshotSource::Init,
        SnapshotSource::Order,
        SnapshotSource::Pnl,
        SnapshotSource::Funding,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotSource::Init => "init",
            SnapshotSource::Order => "order",
            SnapshotSource::Pnl => "pnl",
            SnapshotSource::Funding => "funding",
        }
    }
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat copy of a [`Position`], suitable for CSV rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub source: SnapshotSource,
    pub timestamp: Option<Timestamp>,
    pub symbol: String,
    pub side: PositionSide,
    pub direction: Direction,
    pub contracts: f64,
    pub volume: f64,
    pub available: f64,
    pub frozen: f64,
    pub avg_price: f64,
    pub mark_price: f64,
    pub margin_frozen: f64,
    pub trade_volume: f64,
    pub turnover: f64,
    pub fee_paid: f64,
    pub profit_real: f64,
    pub profit_unreal: f64,
    pub profit_total: f64,
    pub trip_real: f64,
    pub trip_unreal: f64,
    pub hedge_pnl: f64,
    pub position_pnl: f64,
    pub funding_pnl: f64,
    pub total_pnl: f64,
}

impl PositionSnapshot {
    pub fn capture(pos: &Position, source: SnapshotSource) -> Self {
        Self {
            source,
            timestamp: pos.timestamp,
            symbol: pos.symbol.clone(),
            side: pos.side,
            direction: pos.direction(),
            contracts: pos.contracts(),
            volume: pos.volume(),
            available: pos.available(),
            frozen: pos.frozen(),
            avg_price: pos.avg_price(),
            mark_price: pos.mark_price,
            margin_frozen: pos.margin_frozen,
            trade_volume: pos.trade_volume,
            turnover: pos.turnover,
            fee_paid: pos.fee_paid,
            profit_real: pos.profit_real,
            profit_unreal: pos.profit_unreal,
            profit_total: pos.profit_total,
            trip_real: pos.trip_real,
            trip_unreal: pos.trip_unreal,
            hedge_pnl: pos.hedge_pnl,
            position_pnl: pos.position_pnl,
            funding_pnl: pos.funding_pnl,
            total_pnl: pos.total_pnl,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub source: SnapshotSource,
    pub timestamp: Option<Timestamp>,
    pub symbol: String,
    pub init_balance: f64,
    pub margin_balance: f64,
    pub margin_position: f64,
    pub margin_frozen: f64,
    pub margin_available: f64,
    pub profit_real: f64,
    pub profit_unreal: f64,
    pub leverage: f64,
}

impl AccountSnapshot {
    pub fn capture(account: &Account, source: SnapshotSource) -> Self {
        Self {
            source,
            timestamp: account.timestamp(),
            symbol: account.symbol.clone(),
            init_balance: account.init_balance,
            margin_balance: account.margin_balance(),
            margin_position: account.margin_position(),
            margin_frozen: account.margin_frozen(),
            margin_available: account.margin_available(),
            profit_real: account.profit_real(),
            profit_unreal: account.profit_unreal(),
            leverage: account.leverage(),
        }
    }
}

/// Snapshot history of one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolJournal {
    pub long: Vec<PositionSnapshot>,
    pub short: Vec<PositionSnapshot>,
    pub account: Vec<AccountSnapshot>,
}

impl SymbolJournal {
    pub fn leg(&self, side: PositionSide) -> &[PositionSnapshot] {
        match side {
            PositionSide::Long => &self.long,
            PositionSide::Short => &self.short,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    symbols: BTreeMap<String, SymbolJournal>,
    position_counts: BTreeMap<SnapshotSource, u64>,
    account_counts: BTreeMap<SnapshotSource, u64>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_position(&mut self, pos: &Position, source: SnapshotSource) {
        let entry = self.symbols.entry(pos.symbol.clone()).or_default();
        let snapshot = PositionSnapshot::capture(pos, source);
        match pos.side {
            PositionSide::Long => entry.long.push(snapshot),
            PositionSide::Short => entry.short.push(snapshot),
        }
        *self.position_counts.entry(source).or_default() += 1;
    }

    pub fn record_account(&mut self, account: &Account, source: SnapshotSource) {
        self.symbols
            .entry(account.symbol.clone())
            .or_default()
            .account
            .push(AccountSnapshot::capture(account, source));
        *self.account_counts.entry(source).or_default() += 1;
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolJournal> {
        self.symbols.get(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SymbolJournal)> {
        self.symbols.iter()
    }

    /// Position snapshots recorded per source.
    pub fn position_counts(&self) -> &BTreeMap<SnapshotSource, u64> {
        &self.position_counts
    }

    pub fn account_counts(&self) -> &BTreeMap<SnapshotSource, u64> {
        &self.account_counts
    }

    pub fn into_symbols(self) -> BTreeMap<String, SymbolJournal> {
        self.symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Instrument, PositionPair, TradeUnit};

    #[test]
    fn records_by_leg_and_counts_sources() {
        let symbol = "BinanceU_BTCUSDT_perp";
        let valuation = Instrument::parse(symbol)
            .unwrap()
            .valuation(TradeUnit::Usd)
            .unwrap();
        let pair = PositionPair::new(symbol, valuation);
        let account = Account::new(symbol, 100.0);

        let mut journal = Journal::new();
        for leg in pair.legs() {
            journal.record_position(leg, SnapshotSource::Init);
        }
        journal.record_account(&account, SnapshotSource::Init);
        journal.record_position(&pair.short, SnapshotSource::Pnl);

        let entry = journal.symbol(symbol).unwrap();
        assert_eq!(entry.long.len(), 1);
        assert_eq!(entry.leg(PositionSide::Short).len(), 2);
        assert_eq!(entry.account[0].margin_available, 100.0);
        assert_eq!(journal.position_counts()[&SnapshotSource::Init], 2);
        assert_eq!(journal.position_counts()[&SnapshotSource::Pnl], 1);
        assert_eq!(journal.account_counts()[&SnapshotSource::Init], 1);
    }
}
