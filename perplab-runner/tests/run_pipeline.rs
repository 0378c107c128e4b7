//! Integration tests for the runner: TOML config, CSV streams, kernel, export.
//!
//! Each test lays out a config file and its CSV streams in a temp directory,
//! runs it through `run_file`, and checks the report and exported artifacts.

use chrono::{Duration, NaiveDate};
use perplab_core::data::{StreamKind, StreamStatus};
use perplab_core::domain::Timestamp;
use perplab_runner::{export_run, run_file, RunConfig, RunError};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const X: &str = "BinanceU_BTCUSDT_perp";

// ── Fixtures ─────────────────────────────────────────────────────────

fn t(hours: i64) -> Timestamp {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::hours(hours)
}

fn bar_csv(hours: &[i64]) -> String {
    let mut csv = String::from("timestamp,open,high,low,close,volume\n");
    for h in hours {
        let close = 100.0 + *h as f64;
        writeln!(
            csv,
            "{},{close},{},{},{close},5",
            t(*h).format("%Y-%m-%d %H:%M:%S"),
            close + 0.5,
            close - 0.5
        )
        .unwrap();
    }
    csv
}

fn funding_csv(rows: &[(i64, f64)]) -> String {
    let mut csv = String::from("timestamp,fundingRate\n");
    for (h, rate) in rows {
        // Exchange exports use unix milliseconds.
        writeln!(csv, "{},{rate}", t(*h).and_utc().timestamp_millis()).unwrap();
    }
    csv
}

const CARRY_CONFIG: &str = r#"
[run]
start_date = "2024-01-01"
end_date = "2024-01-01"
trade_unit = "USD"
initial_balance = 10000.0

[[streams]]
symbol = "BinanceU_BTCUSDT_perp"
kind = "bar"
path = "data/btc.csv"

[[streams]]
symbol = "Funding_BinanceU_BTCUSDT_perp"
kind = "funding"
path = "data/btc_funding.csv"

[strategy]
name = "funding_carry"
params = { symbol = "BinanceU_BTCUSDT_perp", threshold = 0.0001 }

[fees.BinanceU.future.usdt]
maker = 0.0002
taker = 0.0004
"#;

fn write_carry_fixture(dir: &Path) -> PathBuf {
    std::fs::create_dir_all(dir.join("data")).unwrap();
    let hours: Vec<i64> = (0..=24).collect();
    std::fs::write(dir.join("data/btc.csv"), bar_csv(&hours)).unwrap();
    std::fs::write(
        dir.join("data/btc_funding.csv"),
        funding_csv(&[(8, 0.0005), (16, -0.0001), (24, 0.0003)]),
    )
    .unwrap();
    let config = dir.join("run.toml");
    std::fs::write(&config, CARRY_CONFIG).unwrap();
    config
}

// ── Funding carry end to end ─────────────────────────────────────────

#[test]
fn funding_carry_enters_exits_and_reenters() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_file(&write_carry_fixture(dir.path())).unwrap();
    let report = &outcome.report;

    // Short at 08:00, cover at 16:00, short again at midnight.
    assert_eq!(report.matching.filled, 3);
    assert_eq!(report.batches, 25);
    assert_eq!(report.first_timestamp, Some(t(0)));
    assert_eq!(report.last_timestamp, Some(t(24)));
    // Only the 16:00 print lands while a leg is open.
    assert_eq!(report.ledger.funding_settled, 1);
    assert_eq!(report.ledger_errors, 0);

    let pair = outcome.ledger.position(X).unwrap();
    assert_eq!(pair.short.contracts(), 1.0);
    assert_eq!(pair.long.contracts(), 0.0);
    // Taker fee on each of the three short-leg fills.
    assert!(pair.short.fee_paid > 0.0);
    let journal = outcome.ledger.journal().symbol(X).unwrap();
    let funding = journal
        .short
        .iter()
        .find(|s| s.source == perplab_core::engine::SnapshotSource::Funding)
        .unwrap();
    // Shorts pay when the rate is negative.
    assert!(funding.funding_pnl < 0.0);
    assert_eq!(funding.timestamp, Some(t(16)));
    assert!(report.streams.iter().all(|s| s.status == StreamStatus::Exhausted));
}

#[test]
fn export_writes_csv_per_symbol_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_file(&write_carry_fixture(dir.path())).unwrap();
    let out = dir.path().join("results");
    let exported = export_run(&outcome, &out).unwrap();

    assert_eq!(exported.sink, "csv");
    assert!(exported.degraded.is_none());
    for name in [
        format!("{X}_long.csv"),
        format!("{X}_short.csv"),
        format!("{X}_account.csv"),
        "report.json".to_string(),
    ] {
        assert!(out.join(&name).exists(), "missing {name}");
    }

    let short = std::fs::read_to_string(out.join(format!("{X}_short.csv"))).unwrap();
    let order_rows = short.lines().filter(|l| l.starts_with("order,")).count();
    assert_eq!(order_rows, 3);
    assert_eq!(short.lines().filter(|l| l.starts_with("funding,")).count(), 1);

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("report.json")).unwrap()).unwrap();
    assert_eq!(report["run_id"], outcome.run_id.as_str());
    assert_eq!(report["report"]["matching"]["filled"], 3);
    assert_eq!(report["config"]["strategy"]["name"], "funding_carry");
}

#[test]
fn repeated_runs_export_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_carry_fixture(dir.path());
    let first = run_file(&config).unwrap();
    let second = run_file(&config).unwrap();
    assert_eq!(first.run_id, second.run_id);
    assert_eq!(first.report, second.report);

    export_run(&first, &dir.path().join("a")).unwrap();
    export_run(&second, &dir.path().join("b")).unwrap();
    for name in [format!("{X}_long.csv"), format!("{X}_short.csv"), format!("{X}_account.csv")] {
        let a = std::fs::read(dir.path().join("a").join(&name)).unwrap();
        let b = std::fs::read(dir.path().join("b").join(&name)).unwrap();
        assert_eq!(a, b, "{name} differs between runs");
    }
}

// ── Bad input ────────────────────────────────────────────────────────

#[test]
fn out_of_order_file_halts_stream_but_run_completes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bars.csv"), bar_csv(&[0, 1, 3, 2, 4])).unwrap();
    let config = r#"
[run]
start_date = "2024-01-01"
end_date = "2024-01-01"
trade_unit = "USD"
initial_balance = 1000.0

[[streams]]
symbol = "BinanceU_BTCUSDT_perp"
kind = "bar"
path = "bars.csv"

[strategy]
name = "buy_and_hold"

[fees.BinanceU.future.usdt]
maker = 0.0
taker = 0.0
"#;
    let path = dir.path().join("run.toml");
    std::fs::write(&path, config).unwrap();

    let outcome = run_file(&path).unwrap();
    assert_eq!(outcome.report.batches, 3);
    assert_eq!(outcome.report.last_timestamp, Some(t(3)));
    assert_eq!(outcome.report.streams[0].status, StreamStatus::Halted);
    assert_eq!(outcome.report.matching.filled, 1);
}

#[test]
fn corrupt_funding_row_halts_only_that_stream() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_carry_fixture(dir.path());
    let funding = funding_csv(&[(8, 0.0005), (16, -0.0001), (24, 0.0003)])
        .replace("-0.0001", "notanumber");
    std::fs::write(dir.path().join("data/btc_funding.csv"), funding).unwrap();

    let outcome = run_file(&config).unwrap();
    let report = &outcome.report;
    let status = |kind: StreamKind| {
        report
            .streams
            .iter()
            .find(|s| s.stream.kind == kind)
            .map(|s| s.status)
            .unwrap()
    };
    assert_eq!(status(StreamKind::Funding), StreamStatus::Halted);
    assert_eq!(status(StreamKind::Bar), StreamStatus::Exhausted);
    // Bars keep flowing to the end of the file.
    assert_eq!(report.batches, 25);
    assert_eq!(report.last_timestamp, Some(t(24)));
    // The 08:00 print opens the short; the cover signal never arrives.
    assert_eq!(report.matching.filled, 1);
}

#[test]
fn missing_stream_file_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.toml");
    std::fs::write(&path, CARRY_CONFIG).unwrap();
    assert!(matches!(run_file(&path), Err(RunError::Load(_))));
}

#[test]
fn config_parses_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig::from_file(&write_carry_fixture(dir.path())).unwrap();
    assert_eq!(config.symbols(), vec![X.to_string()]);
    assert!(matches!(
        run_file(&dir.path().join("absent.toml")),
        Err(RunError::Config(_))
    ));
}
