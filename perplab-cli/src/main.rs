//! PerpLab CLI: run, validate, and synthetic data commands.
//!
//! Commands:
//! - `run`: replay a TOML run config and export snapshots
//! - `validate`: check a run config without loading market data
//! - `synth`: write deterministic synthetic bar and funding CSVs for a symbol

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use perplab_core::RunReport;
use perplab_runner::data_loader::{write_bars_csv, write_funding_csv};
use perplab_runner::synthetic::settlement_times;
use perplab_runner::{
    export_run, preflight, run_file, synthetic_bars, synthetic_funding, RunConfig, SyntheticSpec,
};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "perplab",
    version,
    about = "PerpLab CLI: deterministic perpetual futures backtesting"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a run config and export its snapshots.
    Run {
        /// Path to a TOML run config.
        #[arg(long)]
        config: PathBuf,

        /// Directory for snapshot CSVs and report.json.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Check a run config: dates, streams, units, fees, strategy name.
    Validate {
        /// Path to a TOML run config.
        #[arg(long)]
        config: PathBuf,
    },
    /// Write synthetic bar and funding CSVs for one symbol.
    Synth {
        /// Exchange symbol, e.g. BinanceU_BTCUSDT_perp.
        #[arg(long)]
        symbol: String,

        /// First day (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// Last day (YYYY-MM-DD), inclusive.
        #[arg(long)]
        end: String,

        /// Bar spacing in minutes.
        #[arg(long, default_value_t = 60)]
        interval_minutes: i64,

        /// Output directory.
        #[arg(long, default_value = "data")]
        out: PathBuf,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Run { config, output_dir } => run_cmd(config, output_dir),
        Commands::Validate { config } => validate_cmd(config),
        Commands::Synth {
            symbol,
            start,
            end,
            interval_minutes,
            out,
        } => synth_cmd(&symbol, &start, &end, interval_minutes, out),
    }
}

fn run_cmd(config: PathBuf, output_dir: PathBuf) -> Result<()> {
    let outcome =
        run_file(&config).with_context(|| format!("run failed for {}", config.display()))?;
    print_summary(outcome.run_id.as_str(), &outcome.report);

    let exported = export_run(&outcome, &output_dir)?;
    if let Some(err) = &exported.degraded {
        warn!(error = %err, "CSV export failed, snapshots written as JSON lines");
    }
    println!(
        "Exported {} file(s) via {} to: {}",
        exported.files.len(),
        exported.sink,
        output_dir.display()
    );
    Ok(())
}

fn validate_cmd(config: PathBuf) -> Result<()> {
    let parsed = RunConfig::from_file(&config)?;
    let universe = preflight(&parsed)
        .with_context(|| format!("{} failed validation", config.display()))?;
    let run_id = parsed.run_id()?;

    println!("Config OK: {}", config.display());
    println!("Run id:   {run_id}");
    println!("Strategy: {}", parsed.strategy.name);
    println!();
    println!(
        "{:<28} {:<8} {:>10} {:>9} {:>9} {:>12}",
        "Symbol", "Settle", "Multiplier", "Maker", "Taker", "Balance"
    );
    println!("{}", "-".repeat(81));
    for (symbol, terms) in universe.iter() {
        println!(
            "{:<28} {:<8} {:>10} {:>9.5} {:>9.5} {:>12.2}",
            symbol,
            format!("{:?}", terms.valuation.settlement),
            terms.valuation.multiplier,
            terms.fees.maker,
            terms.fees.taker,
            terms.initial_balance
        );
    }
    Ok(())
}

fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid date '{raw}'"))
}

fn synth_cmd(symbol: &str, start: &str, end: &str, interval_minutes: i64, out: PathBuf) -> Result<()> {
    let start = parse_day(start)?;
    let end = parse_day(end)?;
    if end < start {
        bail!("--end {end} is before --start {start}");
    }
    if interval_minutes <= 0 {
        bail!("--interval-minutes must be positive");
    }

    let from = start.and_time(NaiveTime::MIN);
    let to = end
        .succ_opt()
        .with_context(|| format!("--end {end} is the last supported date"))?
        .and_time(NaiveTime::MIN);
    let interval = Duration::try_minutes(interval_minutes)
        .with_context(|| format!("--interval-minutes {interval_minutes} is out of range"))?;
    let spec = SyntheticSpec::new(from, to, interval);
    let bars = synthetic_bars(symbol, &spec);
    let funding = synthetic_funding(symbol, from, to, &settlement_times(symbol, None));

    std::fs::create_dir_all(&out)
        .with_context(|| format!("failed to create {}", out.display()))?;
    let bar_path = out.join(format!("{symbol}.csv"));
    let funding_path = out.join(format!("Funding_{symbol}.csv"));
    write_bars_csv(&bar_path, &bars)?;
    write_funding_csv(&funding_path, &funding)?;

    println!("Wrote {} bars to {}", bars.len(), bar_path.display());
    println!("Wrote {} funding prints to {}", funding.len(), funding_path.display());
    Ok(())
}

fn print_summary(run_id: &str, report: &RunReport) {
    println!();
    println!("=== Run Result ===");
    println!("Run id:         {run_id}");
    println!(
        "Strategy:       {}",
        report.strategy.as_deref().unwrap_or("(none)")
    );
    if let (Some(first), Some(last)) = (report.first_timestamp, report.last_timestamp) {
        println!("Period:         {first} to {last}");
    }
    println!("Batches:        {}", report.batches);
    println!("Events:         {}", report.events_published);
    if let Some(reason) = &report.stop_reason {
        println!("Stopped:        {reason:?}");
    }
    println!();
    println!("--- Orders ---");
    println!(
        "Submitted:      {} ({} refused by context)",
        report.orders_submitted, report.orders_refused
    );
    println!("Filled:         {}", report.matching.filled);
    println!("Dropped late:   {}", report.matching.dropped_late);
    println!();
    println!("--- Accounts ---");
    for (symbol, account) in &report.accounts {
        println!(
            "{:<28} balance {:>14.4}  real {:>12.4}  unreal {:>12.4}",
            symbol,
            account.margin_balance(),
            account.profit_real(),
            account.profit_unreal()
        );
    }
    println!();
    println!("Funding settled: {}", report.ledger.funding_settled);
    if report.ledger_errors > 0 {
        println!("WARNING: {} ledger update(s) rejected", report.ledger_errors);
    }
    for stream in &report.streams {
        println!("Stream {:<40} {:?}", stream.stream.to_string(), stream.status);
    }
    println!();
}
