//! Serializable run configuration (TOML).
//!
//! A run file names the date range, the streams to replay, the fee schedule, and the
//! strategy. It converts into an [`EngineConfig`] for the kernel:
//!
//! - lookback = `start_date - warmup_days` at midnight
//! - start = `start_date` at midnight
//! - end = `end_date + 1 day` at midnight, so the whole end date is traded
//!
//! ```toml
//! [run]
//! start_date = "2024-01-01"
//! end_date = "2024-01-31"
//! warmup_days = 3
//! trade_unit = "COIN"
//! initial_balance = 1.0
//!
//! [[streams]]
//! symbol = "BinanceU_BTCUSDT_perp"
//! kind = "bar"
//! path = "data/BinanceU_BTCUSDT_perp.csv"
//!
//! [[streams]]
//! symbol = "BinanceU_BTCUSDT_perp"
//! kind = "funding"
//! synthetic = true
//!
//! [strategy]
//! name = "funding_carry"
//! params = { symbol = "BinanceU_BTCUSDT_perp", threshold = 0.0001 }
//!
//! [fees.BinanceU.future.usdt]
//! maker = 0.0002
//! taker = 0.0004
//! ```

use chrono::{Duration, NaiveDate, NaiveTime};
use perplab_core::data::{ExhaustionPolicy, StreamKind};
use perplab_core::domain::{instrument::owning_symbol, Timestamp, TradeUnit};
use perplab_core::engine::{EngineConfig, FeeSchedule, InstrumentConfig};
use perplab_core::StrategyParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Unique identifier for a run (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse run config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("end_date {end} is before start_date {start}")]
    DateOrder { start: NaiveDate, end: NaiveDate },

    #[error("no streams configured")]
    NoStreams,

    #[error("stream {symbol} ({kind:?}) needs either a path or synthetic = true")]
    StreamSource { symbol: String, kind: StreamKind },

    #[error("stream {symbol} ({kind:?}) is configured twice")]
    DuplicateStream { symbol: String, kind: StreamKind },

    #[error("synthetic interval must be at least one minute, got {0}")]
    SyntheticInterval(i64),

    #[error("{field} = {value} puts the run window outside the supported date range")]
    OutOfRange { field: &'static str, value: String },

    #[error("failed to encode run config: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serializable configuration for a single run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub run: RunSection,

    pub streams: Vec<StreamConfig>,

    pub strategy: StrategySection,

    #[serde(default)]
    pub fees: FeeSchedule,

    /// Per-symbol contract multiplier or balance overrides.
    #[serde(default)]
    pub instruments: BTreeMap<String, InstrumentOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSection {
    /// First traded date (inclusive).
    pub start_date: NaiveDate,

    /// Last traded date (inclusive).
    pub end_date: NaiveDate,

    /// Days of data replayed before `start_date` with trading disabled.
    #[serde(default)]
    pub warmup_days: u32,

    pub trade_unit: TradeUnit,

    #[serde(default)]
    pub slippage: f64,

    #[serde(default)]
    pub min_unit: f64,

    /// Starting balance of each symbol's account, in trade unit.
    pub initial_balance: f64,

    #[serde(default)]
    pub exhaustion: ExhaustionPolicy,

    /// Overrides every exchange's funding settlement schedule.
    #[serde(default)]
    pub settlement_times: Option<Vec<NaiveTime>>,

    /// Bar spacing for synthetic streams.
    #[serde(default = "default_synthetic_interval")]
    pub synthetic_interval_minutes: i64,
}

fn default_synthetic_interval() -> i64 {
    60
}

/// One input stream: a CSV file, or generated data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    pub symbol: String,

    pub kind: StreamKind,

    /// CSV file, relative to the config file's directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub synthetic: bool,
}

impl StreamConfig {
    /// Symbol the stream trades against, with any `Funding_` prefix removed.
    pub fn owner(&self) -> &str {
        owning_symbol(&self.symbol)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategySection {
    pub name: String,

    #[serde(default)]
    pub params: StrategyParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstrumentOverride {
    #[serde(default)]
    pub multiplier: Option<f64>,

    #[serde(default)]
    pub initial_balance: Option<f64>,
}

impl RunConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Structural checks the engine-level validation cannot see.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.run.end_date < self.run.start_date {
            return Err(ConfigError::DateOrder {
                start: self.run.start_date,
                end: self.run.end_date,
            });
        }
        if self.streams.is_empty() {
            return Err(ConfigError::NoStreams);
        }
        self.synthetic_interval()?;
        self.checked_lookback_time()?;
        self.checked_end_time()?;
        let mut seen = std::collections::BTreeSet::new();
        for stream in &self.streams {
            if stream.path.is_none() && !stream.synthetic {
                return Err(ConfigError::StreamSource {
                    symbol: stream.symbol.clone(),
                    kind: stream.kind,
                });
            }
            if !seen.insert((stream.owner().to_string(), stream.kind)) {
                return Err(ConfigError::DuplicateStream {
                    symbol: stream.owner().to_string(),
                    kind: stream.kind,
                });
            }
        }
        Ok(())
    }

    /// Computes a deterministic hash ID for this configuration.
    ///
    /// Two runs with identical configs share a RunId.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    /// Bar spacing for synthetic streams.
    pub fn synthetic_interval(&self) -> Result<Duration, ConfigError> {
        let minutes = self.run.synthetic_interval_minutes;
        if minutes < 1 {
            return Err(ConfigError::SyntheticInterval(minutes));
        }
        // Must fit inside the representable date range.
        Duration::try_minutes(minutes)
            .filter(|d| Timestamp::MIN.checked_add_signed(*d).is_some())
            .ok_or_else(|| ConfigError::OutOfRange {
                field: "synthetic_interval_minutes",
                value: minutes.to_string(),
            })
    }

    fn checked_lookback_time(&self) -> Result<Timestamp, ConfigError> {
        Duration::try_days(i64::from(self.run.warmup_days))
            .and_then(|d| midnight(self.run.start_date).checked_sub_signed(d))
            .ok_or_else(|| ConfigError::OutOfRange {
                field: "warmup_days",
                value: self.run.warmup_days.to_string(),
            })
    }

    fn checked_end_time(&self) -> Result<Timestamp, ConfigError> {
        self.run
            .end_date
            .succ_opt()
            .map(midnight)
            .ok_or_else(|| ConfigError::OutOfRange {
                field: "end_date",
                value: self.run.end_date.to_string(),
            })
    }

    /// Clamped to the earliest representable time; `check` rejects configs that need it.
    pub fn lookback_time(&self) -> Timestamp {
        self.checked_lookback_time().unwrap_or(Timestamp::MIN)
    }

    pub fn start_time(&self) -> Timestamp {
        midnight(self.run.start_date)
    }

    /// Clamped to the latest representable time; `check` rejects configs that need it.
    pub fn end_time(&self) -> Timestamp {
        self.checked_end_time().unwrap_or(Timestamp::MAX)
    }

    /// Traded symbols in first-seen stream order.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::new();
        for stream in &self.streams {
            if !symbols.iter().any(|s| s == stream.owner()) {
                symbols.push(stream.owner().to_string());
            }
        }
        symbols
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        let run = &self.run;
        let mut config = EngineConfig::new(
            run.trade_unit,
            self.lookback_time(),
            self.start_time(),
            self.end_time(),
        )
        .with_fees(self.fees.clone())
        .with_slippage(run.slippage)
        .with_min_unit(run.min_unit)
        .with_initial_balance(run.initial_balance)
        .with_exhaustion(run.exhaustion);
        if let Some(times) = &run.settlement_times {
            config = config.with_settlement_times(times.clone());
        }
        for symbol in self.symbols() {
            let overrides = self.instruments.get(&symbol).cloned().unwrap_or_default();
            config = config.with_instrument_config(InstrumentConfig {
                symbol,
                multiplier: overrides.multiplier,
                initial_balance: overrides.initial_balance,
            });
        }
        config
    }
}

fn midnight(date: NaiveDate) -> Timestamp {
    date.and_time(NaiveTime::MIN)
}
