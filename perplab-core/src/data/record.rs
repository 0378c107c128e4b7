//! Stream records and the composite batch the synchronizer emits.

use crate::domain::{Bar, FundingTick, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Bar,
    Funding,
}

/// Identity of one input stream. A symbol may own a bar stream and a funding stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub symbol: String,
    pub kind: StreamKind,
}

impl StreamKey {
    pub fn bars(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: StreamKind::Bar,
        }
    }

    pub fn funding(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: StreamKind::Funding,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StreamKind::Bar => write!(f, "{}", self.symbol),
            StreamKind::Funding => write!(f, "Funding_{}", self.symbol),
        }
    }
}

/// One row pulled from a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketRecord {
    Bar(Bar),
    Funding(FundingTick),
}

impl MarketRecord {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            MarketRecord::Bar(bar) => bar.timestamp,
            MarketRecord::Funding(tick) => tick.timestamp,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            MarketRecord::Bar(bar) => &bar.symbol,
            MarketRecord::Funding(tick) => &tick.symbol,
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            MarketRecord::Bar(_) => StreamKind::Bar,
            MarketRecord::Funding(_) => StreamKind::Funding,
        }
    }

    pub fn key(&self) -> StreamKey {
        StreamKey {
            symbol: self.symbol().to_string(),
            kind: self.kind(),
        }
    }
}

/// Every record sharing one timestamp, keyed by symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBatch {
    pub timestamp: Timestamp,
    pub bars: BTreeMap<String, Bar>,
    pub funding: BTreeMap<String, FundingTick>,
}

impl MarketBatch {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            bars: BTreeMap::new(),
            funding: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, record: MarketRecord) {
        match record {
            MarketRecord::Bar(bar) => {
                self.bars.insert(bar.symbol.clone(), bar);
            }
            MarketRecord::Funding(tick) => {
                self.funding.insert(tick.symbol.clone(), tick);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len() + self.funding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty() && self.funding.is_empty()
    }

    /// Stream keys present in the batch.
    pub fn keys(&self) -> Vec<StreamKey> {
        self.bars
            .keys()
            .map(StreamKey::bars)
            .chain(self.funding.keys().map(StreamKey::funding))
            .collect()
    }
}
