//! Simulation engine: configuration, matching, ledger, and the kernel that drives them.
//!
//! The kernel consumes synchronizer batches and publishes them on the event bus:
//!
//! 1. Market: matching engine records the bars, ledger marks and settles funding,
//!    strategy sees the batch
//! 2. Order: journaled, then matched against the last bar of its symbol
//! 3. Fill: applied by the ledger, then handed to the strategy
//! 4. Stop: every component finalizes once

pub mod clock;
pub mod config;
pub mod fees;
pub mod journal;
pub mod kernel;
pub mod ledger;
pub mod matching;

pub use clock::{SimClock, TradingWindow};
pub use config::{ConfigError, EngineConfig, InstrumentConfig, InstrumentTerms, Universe};
pub use fees::{ExchangeFees, FeeRates, FeeSchedule};
pub use journal::{AccountSnapshot, Journal, PositionSnapshot, SnapshotSource, SymbolJournal};
pub use kernel::{Kernel, KernelError, Route, RunReport, StreamReport};
pub use ledger::{Ledger, LedgerError, LedgerStats};
pub use matching::{MatchError, MatchStats, MatchingEngine};
