//! Run orchestration: wires a [`RunConfig`] into the kernel.
//!
//! Two entry points:
//! - `run_file()`: reads the TOML config and resolves stream paths against its directory. Used by the CLI.
//! - `run_config()`: takes an already parsed config and an explicit base directory.
//!
//! `preflight()` performs every check that needs no market data and is what
//! `perplab validate` runs.

use std::path::{Path, PathBuf};

use perplab_core::data::{RecordSource, StreamKey, StreamKind, VecSource};
use perplab_core::engine::{Ledger, Universe};
use perplab_core::events::TraceObserver;
use perplab_core::{Kernel, KernelError, RunReport, StrategyError};
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, RunConfig, RunId, StreamConfig};
use crate::data_loader::{open_bars_csv, open_funding_csv, LoadError};
use crate::strategies::create_strategy;
use crate::synthetic::{settlement_times, synthetic_bars, synthetic_funding, SyntheticSpec};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Load(#[from] LoadError),
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),
}

/// Everything a finished run leaves behind.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub config: RunConfig,
    pub report: RunReport,
    pub ledger: Ledger,
}

/// Validate the config without loading data. Returns the resolved universe.
pub fn preflight(config: &RunConfig) -> Result<Universe, RunError> {
    config.check()?;
    create_strategy(&config.strategy.name)?;
    let universe = config
        .to_engine_config()
        .validate()
        .map_err(KernelError::from)?;
    Ok(universe)
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Open one configured stream.
///
/// CSV files are read lazily, so only a missing file or header is an error here; bad
/// rows halt the stream during replay. Synthetic streams are generated up front.
pub fn load_stream(
    config: &RunConfig,
    stream: &StreamConfig,
    base_dir: &Path,
) -> Result<(StreamKey, RecordSource), RunError> {
    let symbol = stream.owner();
    let key = StreamKey {
        symbol: symbol.to_string(),
        kind: stream.kind,
    };
    let source = match (&stream.path, stream.kind) {
        (Some(path), StreamKind::Bar) => {
            let csv = open_bars_csv(&resolve(base_dir, path), symbol)?;
            info!(stream = %key, file = csv.origin(), "stream opened");
            csv.boxed()
        }
        (Some(path), StreamKind::Funding) => {
            let csv = open_funding_csv(&resolve(base_dir, path), symbol)?;
            info!(stream = %key, file = csv.origin(), "stream opened");
            csv.boxed()
        }
        (None, StreamKind::Bar) => {
            let spec = SyntheticSpec::new(
                config.lookback_time(),
                config.end_time(),
                config.synthetic_interval()?,
            );
            let bars = synthetic_bars(symbol, &spec);
            info!(stream = %key, records = bars.len(), "synthetic stream generated");
            VecSource::from_bars(bars).boxed()
        }
        (None, StreamKind::Funding) => {
            let times = settlement_times(symbol, config.run.settlement_times.as_deref());
            let ticks =
                synthetic_funding(symbol, config.lookback_time(), config.end_time(), &times);
            info!(stream = %key, records = ticks.len(), "synthetic stream generated");
            VecSource::from_funding(ticks).boxed()
        }
    };
    Ok((key, source))
}

/// Run a parsed config. Relative stream paths resolve against `base_dir`.
pub fn run_config(config: &RunConfig, base_dir: &Path) -> Result<RunOutcome, RunError> {
    let run_id = config.run_id()?;
    let universe = preflight(config)?;
    info!(
        run_id = %run_id,
        symbols = universe.len(),
        strategy = %config.strategy.name,
        "run configured"
    );

    let mut kernel = Kernel::new(&config.to_engine_config())?;
    for stream in &config.streams {
        let (key, source) = load_stream(config, stream, base_dir)?;
        kernel.add_stream(key, source)?;
    }
    let strategy = create_strategy(&config.strategy.name)?;
    kernel.attach_strategy(strategy, &config.strategy.params)?;
    kernel.add_observer(Box::new(TraceObserver));

    let report = kernel.run()?;
    info!(
        run_id = %run_id,
        batches = report.batches,
        fills = report.matching.filled,
        dropped = report.matching.dropped_late,
        ledger_errors = report.ledger_errors,
        "run complete"
    );
    Ok(RunOutcome {
        run_id,
        config: config.clone(),
        report,
        ledger: kernel.into_ledger(),
    })
}

/// Read a TOML config and run it.
pub fn run_file(path: &Path) -> Result<RunOutcome, RunError> {
    let config = RunConfig::from_file(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    run_config(&config, base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYNTHETIC: &str = r#"
[run]
start_date = "2024-02-01"
end_date = "2024-02-03"
warmup_days = 1
trade_unit = "USD"
initial_balance = 10000.0

[[streams]]
symbol = "BinanceU_BTCUSDT_perp"
kind = "bar"
synthetic = true

[[streams]]
symbol = "BinanceU_BTCUSDT_perp"
kind = "funding"
synthetic = true

[strategy]
name = "buy_and_hold"

[fees.BinanceU.future.usdt]
maker = 0.0002
taker = 0.0004
"#;

    #[test]
    fn synthetic_run_trades_once() {
        let config = RunConfig::from_toml(SYNTHETIC).unwrap();
        let outcome = run_config(&config, Path::new(".")).unwrap();

        assert_eq!(outcome.report.strategy.as_deref(), Some("buy_and_hold"));
        assert_eq!(outcome.report.matching.filled, 1);
        // Warmup day plus three traded days of hourly bars, both ends inclusive.
        assert_eq!(outcome.report.first_timestamp, Some(config.lookback_time()));
        assert_eq!(outcome.report.last_timestamp, Some(config.end_time()));
        assert!(outcome.report.ledger.funding_settled > 0);
        let long = &outcome.ledger.position("BinanceU_BTCUSDT_perp").unwrap().long;
        assert_eq!(long.contracts(), 1.0);
        assert!(outcome.ledger.is_finalized());
    }

    #[test]
    fn preflight_rejects_unknown_strategy_and_bad_unit() {
        let mut config = RunConfig::from_toml(SYNTHETIC).unwrap();
        config.strategy.name = "nope".into();
        assert!(matches!(preflight(&config), Err(RunError::Strategy(_))));

        let config = RunConfig::from_toml(&SYNTHETIC.replace("\"USD\"", "\"CONTRACTS\"")).unwrap();
        assert!(matches!(
            preflight(&config),
            Err(RunError::Kernel(KernelError::Config(_)))
        ));
    }

    #[test]
    fn missing_fee_coverage_fails_preflight() {
        let text = SYNTHETIC.replace("[fees.BinanceU.future.usdt]", "[fees.BinanceC.future.usd]");
        let config = RunConfig::from_toml(&text).unwrap();
        assert!(preflight(&config).is_err());
    }
}
