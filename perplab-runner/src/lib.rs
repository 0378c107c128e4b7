//! PerpLab Runner: run configuration, data loading, sample strategies, export.
//!
//! This crate builds on `perplab-core` to provide:
//! - TOML run configuration that converts into an `EngineConfig`
//! - CSV bar and funding stream loading, with a deterministic synthetic fallback
//! - Sample strategies (`buy_and_hold`, `funding_carry`) and a name-based factory
//! - Single-run orchestration with pre-flight validation
//! - Snapshot export to per-symbol CSV files with a JSON-lines fallback

pub mod config;
pub mod data_loader;
pub mod export;
pub mod runner;
pub mod strategies;
pub mod synthetic;

pub use config::{ConfigError, RunConfig, RunId, StreamConfig};
pub use data_loader::{
    load_bars_csv, load_funding_csv, open_bars_csv, open_funding_csv, parse_timestamp, CsvSource,
    LoadError,
};
pub use export::{export_run, ExportOutcome, StorageError};
pub use runner::{preflight, run_config, run_file, RunError, RunOutcome};
pub use strategies::{create_strategy, STRATEGY_NAMES};
pub use synthetic::{synthetic_bars, synthetic_funding, SyntheticSpec};
