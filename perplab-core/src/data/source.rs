//! Record sources feeding the synchronizer.
//!
//! A source is any iterator of `Result<MarketRecord, DataError>` in ascending
//! timestamp order. File parsing lives outside the kernel; the runner adapts CSV
//! readers into sources.

use super::record::MarketRecord;
use crate::domain::{Bar, FundingTick};
use std::collections::VecDeque;
use thiserror::Error;

/// Errors raised while pulling a record from a stream.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("malformed record in {stream}: {reason}")]
    Malformed { stream: String, reason: String },

    #[error("stream {stream} yielded a record for {found}")]
    ForeignRecord { stream: String, found: String },

    #[error("stream {stream} already registered")]
    DuplicateStream { stream: String },

    #[error("stream {stream} is out of order: {timestamp} after {previous}")]
    OutOfOrder {
        stream: String,
        timestamp: String,
        previous: String,
    },
}

/// Lazy, time-ordered producer of records for one stream.
pub type RecordSource = Box<dyn Iterator<Item = Result<MarketRecord, DataError>> + Send>;

/// In-memory source over pre-built records.
#[derive(Debug, Default)]
pub struct VecSource {
    records: VecDeque<Result<MarketRecord, DataError>>,
}

impl VecSource {
    pub fn from_bars(bars: Vec<Bar>) -> Self {
        Self {
            records: bars.into_iter().map(|b| Ok(MarketRecord::Bar(b))).collect(),
        }
    }

    pub fn from_funding(ticks: Vec<FundingTick>) -> Self {
        Self {
            records: ticks
                .into_iter()
                .map(|t| Ok(MarketRecord::Funding(t)))
                .collect(),
        }
    }

    pub fn from_results(records: Vec<Result<MarketRecord, DataError>>) -> Self {
        Self {
            records: records.into(),
        }
    }

    pub fn boxed(self) -> RecordSource {
        Box::new(self)
    }
}

impl Iterator for VecSource {
    type Item = Result<MarketRecord, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.pop_front()
    }
}
