//! Multi-stream time synchronizer.
//!
//! Each stream keeps at most one pending record. A step refills the empty slots,
//! takes the minimum pending timestamp, and emits every pending record at that
//! timestamp as one [`MarketBatch`]. Streams not in the batch keep their record for
//! the next step, so nothing is ever reordered across symbols.

use super::record::{MarketBatch, MarketRecord, StreamKey};
use super::source::{DataError, RecordSource};
use crate::domain::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What to do when a stream runs dry while others still have data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Drop the exhausted stream and keep going until every stream is exhausted.
    #[default]
    DrainAll,
    /// Terminate as soon as any stream is exhausted.
    StopOnFirst,
}

/// Why a run terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    AllStreamsExhausted,
    StreamExhausted { stream: StreamKey },
    Requested,
}

/// Replay window. Records before `lookback` are skipped; the first record after
/// `end` exhausts its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamWindow {
    pub lookback: Timestamp,
    pub end: Timestamp,
}

impl StreamWindow {
    pub fn new(lookback: Timestamp, end: Timestamp) -> Self {
        Self { lookback, end }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.lookback <= ts && ts <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    Active,
    Exhausted,
    /// Stopped defensively after bad or out-of-order data.
    Halted,
}

pub enum SyncStep {
    Batch(MarketBatch),
    Finished(StopReason),
}

struct Stream {
    source: RecordSource,
    pending: Option<MarketRecord>,
    status: StreamStatus,
    last_pulled: Option<Timestamp>,
    emitted: u64,
    skipped: u64,
}

impl Stream {
    fn new(source: RecordSource) -> Self {
        Self {
            source,
            pending: None,
            status: StreamStatus::Active,
            last_pulled: None,
            emitted: 0,
            skipped: 0,
        }
    }

    fn halt(&mut self, key: &StreamKey, reason: &dyn std::fmt::Display) {
        warn!(stream = %key, %reason, "stream halted");
        self.status = StreamStatus::Halted;
        self.pending = None;
    }

    fn pending_timestamp(&self) -> Option<Timestamp> {
        self.pending.as_ref().map(MarketRecord::timestamp)
    }

    /// Pull until a usable record is pending or the stream stops.
    fn refill(&mut self, key: &StreamKey, window: &StreamWindow) {
        while self.pending.is_none() && self.status == StreamStatus::Active {
            let record = match self.source.next() {
                None => {
                    debug!(stream = %key, emitted = self.emitted, "stream exhausted");
                    self.status = StreamStatus::Exhausted;
                    continue;
                }
                Some(Err(err)) => {
                    self.halt(key, &err);
                    continue;
                }
                Some(Ok(record)) => record,
            };

            if record.kind() != key.kind || record.symbol() != key.symbol {
                let err = DataError::ForeignRecord {
                    stream: key.to_string(),
                    found: record.key().to_string(),
                };
                self.halt(key, &err);
                continue;
            }
            let invalid = match &record {
                MarketRecord::Bar(bar) => bar.validate().err().map(|e| e.to_string()),
                MarketRecord::Funding(tick) => {
                    (!tick.is_valid()).then(|| format!("non-finite funding rate at {}", tick.timestamp))
                }
            };
            if let Some(reason) = invalid {
                let err = DataError::Malformed {
                    stream: key.to_string(),
                    reason,
                };
                self.halt(key, &err);
                continue;
            }

            let ts = record.timestamp();
            if let Some(previous) = self.last_pulled {
                if ts < previous {
                    let err = DataError::OutOfOrder {
                        stream: key.to_string(),
                        timestamp: ts.to_string(),
                        previous: previous.to_string(),
                    };
                    self.halt(key, &err);
                    continue;
                }
                if ts == previous {
                    warn!(stream = %key, timestamp = %ts, "duplicate timestamp skipped");
                    self.skipped += 1;
                    continue;
                }
            }
            self.last_pulled = Some(ts);

            if ts < window.lookback {
                self.skipped += 1;
                continue;
            }
            if ts > window.end {
                debug!(stream = %key, timestamp = %ts, "stream passed end of window");
                self.status = StreamStatus::Exhausted;
                continue;
            }
            self.pending = Some(record);
        }
    }
}

pub struct Synchronizer {
    streams: BTreeMap<StreamKey, Stream>,
    window: StreamWindow,
    policy: ExhaustionPolicy,
    last_batch: Option<Timestamp>,
    finished: Option<StopReason>,
    batches: u64,
}

impl Synchronizer {
    pub fn new(window: StreamWindow, policy: ExhaustionPolicy) -> Self {
        Self {
            streams: BTreeMap::new(),
            window,
            policy,
            last_batch: None,
            finished: None,
            batches: 0,
        }
    }

    pub fn add_stream(&mut self, key: StreamKey, source: RecordSource) -> Result<(), DataError> {
        if self.streams.contains_key(&key) {
            return Err(DataError::DuplicateStream {
                stream: key.to_string(),
            });
        }
        self.streams.insert(key, Stream::new(source));
        Ok(())
    }

    pub fn window(&self) -> &StreamWindow {
        &self.window
    }

    pub fn policy(&self) -> ExhaustionPolicy {
        self.policy
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Timestamp of the most recent batch.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last_batch
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn statuses(&self) -> Vec<(StreamKey, StreamStatus)> {
        self.streams
            .iter()
            .map(|(key, stream)| (key.clone(), stream.status))
            .collect()
    }

    /// Records skipped per stream (before the window, or duplicate timestamps).
    pub fn skipped(&self) -> u64 {
        self.streams.values().map(|s| s.skipped).sum()
    }

    fn finish(&mut self, reason: StopReason) -> SyncStep {
        info!(batches = self.batches, ?reason, "synchronizer finished");
        self.finished = Some(reason.clone());
        SyncStep::Finished(reason)
    }

    /// Advance by one batch.
    pub fn step(&mut self) -> SyncStep {
        if let Some(reason) = &self.finished {
            return SyncStep::Finished(reason.clone());
        }

        loop {
            let mut newly_exhausted = None;
            for (key, stream) in self.streams.iter_mut() {
                let was_active = stream.status == StreamStatus::Active;
                stream.refill(key, &self.window);
                if was_active
                    && stream.status == StreamStatus::Exhausted
                    && newly_exhausted.is_none()
                {
                    newly_exhausted = Some(key.clone());
                }
            }
            if self.policy == ExhaustionPolicy::StopOnFirst {
                if let Some(stream) = newly_exhausted {
                    return self.finish(StopReason::StreamExhausted { stream });
                }
            }

            let Some(min) = self
                .streams
                .values()
                .filter_map(Stream::pending_timestamp)
                .min()
            else {
                return self.finish(StopReason::AllStreamsExhausted);
            };

            if let Some(last) = self.last_batch {
                if min < last {
                    for (key, stream) in self.streams.iter_mut() {
                        if stream.pending_timestamp().is_some_and(|ts| ts < last) {
                            stream.halt(key, &"record behind the global clock");
                        }
                    }
                    continue;
                }
            }

            let mut batch = MarketBatch::new(min);
            for stream in self.streams.values_mut() {
                if stream.pending_timestamp() == Some(min) {
                    if let Some(record) = stream.pending.take() {
                        batch.insert(record);
                        stream.emitted += 1;
                    }
                }
            }
            self.last_batch = Some(min);
            self.batches += 1;
            return SyncStep::Batch(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::StreamKind;
    use crate::data::source::VecSource;
    use crate::domain::{Bar, FundingTick};
    use chrono::NaiveDate;

    fn t(hour: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn wide_window() -> StreamWindow {
        StreamWindow::new(t(0), t(23))
    }

    fn bars(symbol: &str, hours: &[u32]) -> VecSource {
        VecSource::from_bars(
            hours
                .iter()
                .map(|h| Bar::flat(symbol, t(*h), 100.0 + *h as f64))
                .collect(),
        )
    }

    fn drain(sync: &mut Synchronizer) -> (Vec<MarketBatch>, StopReason) {
        let mut out = Vec::new();
        loop {
            match sync.step() {
                SyncStep::Batch(b) => out.push(b),
                SyncStep::Finished(reason) => return (out, reason),
            }
        }
    }

    #[test]
    fn batches_by_minimum_timestamp_without_reordering() {
        let mut sync = Synchronizer::new(wide_window(), ExhaustionPolicy::DrainAll);
        sync.add_stream(StreamKey::bars("A"), bars("A", &[1, 2]).boxed())
            .unwrap();
        sync.add_stream(StreamKey::bars("B"), bars("B", &[3]).boxed())
            .unwrap();

        let (batches, reason) = drain(&mut sync);
        assert_eq!(reason, StopReason::AllStreamsExhausted);
        let shape: Vec<(Timestamp, Vec<String>)> = batches
            .iter()
            .map(|b| (b.timestamp, b.bars.keys().cloned().collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (t(1), vec!["A".to_string()]),
                (t(2), vec!["A".to_string()]),
                (t(3), vec!["B".to_string()]),
            ]
        );
    }

    #[test]
    fn equal_timestamps_share_a_batch() {
        let mut sync = Synchronizer::new(wide_window(), ExhaustionPolicy::DrainAll);
        sync.add_stream(StreamKey::bars("A"), bars("A", &[1, 2]).boxed())
            .unwrap();
        sync.add_stream(StreamKey::bars("B"), bars("B", &[2]).boxed())
            .unwrap();
        sync.add_stream(
            StreamKey::funding("A"),
            VecSource::from_funding(vec![FundingTick::new("A", t(2), 0.0001)]).boxed(),
        )
        .unwrap();

        let (batches, _) = drain(&mut sync);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].bars.len(), 2);
        assert_eq!(batches[1].funding.len(), 1);
        assert_eq!(batches[1].keys().len(), 3);
    }

    #[test]
    fn window_filters_records() {
        let window = StreamWindow::new(t(2), t(4));
        let mut sync = Synchronizer::new(window, ExhaustionPolicy::DrainAll);
        sync.add_stream(StreamKey::bars("A"), bars("A", &[1, 2, 3, 4, 5, 6]).boxed())
            .unwrap();
        let (batches, _) = drain(&mut sync);
        let hours: Vec<Timestamp> = batches.iter().map(|b| b.timestamp).collect();
        assert_eq!(hours, vec![t(2), t(3), t(4)]);
        assert_eq!(sync.skipped(), 1);
    }

    #[test]
    fn out_of_order_stream_is_halted_alone() {
        let mut sync = Synchronizer::new(wide_window(), ExhaustionPolicy::DrainAll);
        sync.add_stream(StreamKey::bars("A"), bars("A", &[1, 3, 2, 4]).boxed())
            .unwrap();
        sync.add_stream(StreamKey::bars("B"), bars("B", &[1, 2, 3, 4]).boxed())
            .unwrap();
        let (batches, reason) = drain(&mut sync);
        assert_eq!(reason, StopReason::AllStreamsExhausted);
        let a_count = batches.iter().filter(|b| b.bars.contains_key("A")).count();
        let b_count = batches.iter().filter(|b| b.bars.contains_key("B")).count();
        assert_eq!(a_count, 2);
        assert_eq!(b_count, 4);
        let statuses = sync.statuses();
        assert_eq!(statuses[0].1, StreamStatus::Halted);
        assert_eq!(statuses[1].1, StreamStatus::Exhausted);
    }

    #[test]
    fn malformed_record_halts_stream() {
        let mut bad = Bar::flat("A", t(2), 100.0);
        bad.close = f64::NAN;
        let source = VecSource::from_bars(vec![Bar::flat("A", t(1), 100.0), bad]);
        let mut sync = Synchronizer::new(wide_window(), ExhaustionPolicy::DrainAll);
        sync.add_stream(StreamKey::bars("A"), source.boxed()).unwrap();
        let (batches, _) = drain(&mut sync);
        assert_eq!(batches.len(), 1);
        assert_eq!(sync.statuses()[0].1, StreamStatus::Halted);
    }

    #[test]
    fn source_error_halts_stream() {
        let source = VecSource::from_results(vec![Err(DataError::Malformed {
            stream: "A".into(),
            reason: "bad row".into(),
        })]);
        let mut sync = Synchronizer::new(wide_window(), ExhaustionPolicy::DrainAll);
        sync.add_stream(StreamKey::bars("A"), source.boxed()).unwrap();
        let (batches, _) = drain(&mut sync);
        assert!(batches.is_empty());
        assert_eq!(sync.statuses()[0].1, StreamStatus::Halted);
    }

    #[test]
    fn foreign_symbol_halts_stream() {
        let mut sync = Synchronizer::new(wide_window(), ExhaustionPolicy::DrainAll);
        sync.add_stream(StreamKey::bars("A"), bars("B", &[1]).boxed())
            .unwrap();
        let (batches, _) = drain(&mut sync);
        assert!(batches.is_empty());
        assert_eq!(sync.statuses()[0].1, StreamStatus::Halted);
    }

    #[test]
    fn duplicate_timestamp_is_skipped() {
        let mut sync = Synchronizer::new(wide_window(), ExhaustionPolicy::DrainAll);
        sync.add_stream(StreamKey::bars("A"), bars("A", &[1, 1, 2]).boxed())
            .unwrap();
        let (batches, _) = drain(&mut sync);
        assert_eq!(batches.len(), 2);
        assert_eq!(sync.statuses()[0].1, StreamStatus::Exhausted);
    }

    #[test]
    fn stop_on_first_terminates_early() {
        let mut sync = Synchronizer::new(wide_window(), ExhaustionPolicy::StopOnFirst);
        sync.add_stream(StreamKey::bars("A"), bars("A", &[1]).boxed())
            .unwrap();
        sync.add_stream(StreamKey::bars("B"), bars("B", &[1, 2, 3]).boxed())
            .unwrap();
        let (batches, reason) = drain(&mut sync);
        assert_eq!(batches.len(), 1);
        assert_eq!(
            reason,
            StopReason::StreamExhausted {
                stream: StreamKey {
                    symbol: "A".into(),
                    kind: StreamKind::Bar
                }
            }
        );
    }

    #[test]
    fn finished_synchronizer_stays_finished() {
        let mut sync = Synchronizer::new(wide_window(), ExhaustionPolicy::DrainAll);
        assert!(matches!(
            sync.step(),
            SyncStep::Finished(StopReason::AllStreamsExhausted)
        ));
        assert!(sync.is_finished());
        assert!(matches!(sync.step(), SyncStep::Finished(_)));
    }

    #[test]
    fn duplicate_stream_is_rejected() {
        let mut sync = Synchronizer::new(wide_window(), ExhaustionPolicy::DrainAll);
        sync.add_stream(StreamKey::bars("A"), bars("A", &[1]).boxed())
            .unwrap();
        let err = sync
            .add_stream(StreamKey::bars("A"), bars("A", &[1]).boxed())
            .unwrap_err();
        assert!(matches!(err, DataError::DuplicateStream { .. }));
    }
}
