//! Market data streams and their time synchronization

pub mod record;
pub mod source;
pub mod synchronizer;

pub use record::{MarketBatch, MarketRecord, StreamKey, StreamKind};
pub use source::{DataError, RecordSource, VecSource};
pub use synchronizer::{
    ExhaustionPolicy, StopReason, StreamStatus, StreamWindow, SyncStep, Synchronizer,
};
