//! Snapshot export: CSV files per symbol plus a run report.
//!
//! Layout of an export directory:
//! - `{symbol}_long.csv`, `{symbol}_short.csv`: position snapshots per leg, in order
//! - `{symbol}_account.csv`: account snapshots
//! - `report.json`: run id, config, and the kernel's run report
//!
//! If the CSV sink fails mid-export, the snapshots are written again to a single
//! `snapshots.jsonl` file. The CSV failure is kept on the [`ExportOutcome`] so the
//! caller can report it.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use perplab_core::engine::{AccountSnapshot, Journal, PositionSnapshot, SymbolJournal};
use perplab_core::RunReport;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{RunConfig, RunId};
use crate::runner::RunOutcome;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV write to {path} failed: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Destination for the snapshot journal.
pub trait SnapshotSink {
    fn name(&self) -> &'static str;

    fn write_symbol(&mut self, symbol: &str, journal: &SymbolJournal) -> Result<(), StorageError>;

    /// Flush and return the files written.
    fn finish(&mut self) -> Result<Vec<PathBuf>, StorageError>;
}

// ─── CSV sink ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CsvSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    fn write_rows<T: Serialize>(&mut self, file_name: String, rows: &[T]) -> Result<(), StorageError> {
        let path = self.dir.join(file_name);
        let csv_err = |source| StorageError::Csv {
            path: path.clone(),
            source,
        };
        let mut wtr = csv::Writer::from_path(&path).map_err(csv_err)?;
        for row in rows {
            wtr.serialize(row).map_err(csv_err)?;
        }
        wtr.flush().map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        self.written.push(path);
        Ok(())
    }
}

impl SnapshotSink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn write_symbol(&mut self, symbol: &str, journal: &SymbolJournal) -> Result<(), StorageError> {
        self.write_rows(format!("{symbol}_long.csv"), &journal.long)?;
        self.write_rows(format!("{symbol}_short.csv"), &journal.short)?;
        self.write_rows(format!("{symbol}_account.csv"), &journal.account)
    }

    fn finish(&mut self) -> Result<Vec<PathBuf>, StorageError> {
        Ok(std::mem::take(&mut self.written))
    }
}

// ─── JSON-lines sink ────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "lowercase")]
enum JsonLine<'a> {
    Position(&'a PositionSnapshot),
    Account(&'a AccountSnapshot),
}

/// Every snapshot of every symbol in one file, one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    fn io_err(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn write_line(&mut self, line: &JsonLine<'_>) -> Result<(), StorageError> {
        if self.writer.is_none() {
            let file = File::create(&self.path).map_err(|e| self.io_err(e))?;
            self.writer = Some(BufWriter::new(file));
        }
        let encoded = serde_json::to_string(line)?;
        let result = match self.writer.as_mut() {
            Some(writer) => writeln!(writer, "{encoded}"),
            None => Ok(()),
        };
        result.map_err(|e| self.io_err(e))
    }
}

impl SnapshotSink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn write_symbol(&mut self, _symbol: &str, journal: &SymbolJournal) -> Result<(), StorageError> {
        for snapshot in journal.long.iter().chain(&journal.short) {
            self.write_line(&JsonLine::Position(snapshot))?;
        }
        for snapshot in &journal.account {
            self.write_line(&JsonLine::Account(snapshot))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<PathBuf>, StorageError> {
        match self.writer.take() {
            Some(mut writer) => {
                writer.flush().map_err(|e| self.io_err(e))?;
                Ok(vec![self.path.clone()])
            }
            None => Ok(Vec::new()),
        }
    }
}

// ─── Export ─────────────────────────────────────────────────────────

/// Which sink ended up holding the snapshots.
#[derive(Debug)]
pub struct ExportOutcome {
    pub sink: &'static str,
    pub files: Vec<PathBuf>,
    /// Primary sink failure, if the fallback was used.
    pub degraded: Option<StorageError>,
}

fn write_journal(sink: &mut dyn SnapshotSink, journal: &Journal) -> Result<Vec<PathBuf>, StorageError> {
    for (symbol, entries) in journal.iter() {
        sink.write_symbol(symbol, entries)?;
    }
    sink.finish()
}

/// Write the journal to `primary`, degrading to `fallback` if it fails.
pub fn export_snapshots(
    journal: &Journal,
    primary: &mut dyn SnapshotSink,
    fallback: &mut dyn SnapshotSink,
) -> Result<ExportOutcome, StorageError> {
    match write_journal(primary, journal) {
        Ok(files) => Ok(ExportOutcome {
            sink: primary.name(),
            files,
            degraded: None,
        }),
        Err(err) => {
            warn!(
                error = %err,
                primary = primary.name(),
                fallback = fallback.name(),
                "snapshot sink failed, writing to fallback"
            );
            let files = write_journal(fallback, journal)?;
            Ok(ExportOutcome {
                sink: fallback.name(),
                files,
                degraded: Some(err),
            })
        }
    }
}

/// Contents of `report.json`.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub run_id: &'a RunId,
    pub config: &'a RunConfig,
    pub report: &'a RunReport,
}

/// Export a finished run into `dir`.
pub fn export_run(outcome: &RunOutcome, dir: &Path) -> Result<ExportOutcome> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let mut csv = CsvSink::new(dir);
    let mut jsonl = JsonLinesSink::new(dir.join("snapshots.jsonl"));
    let mut exported = export_snapshots(outcome.ledger.journal(), &mut csv, &mut jsonl)
        .context("failed to export snapshots")?;

    let summary = RunSummary {
        run_id: &outcome.run_id,
        config: &outcome.config,
        report: &outcome.report,
    };
    let json = serde_json::to_string_pretty(&summary).context("failed to serialize run report")?;
    let report_path = dir.join("report.json");
    std::fs::write(&report_path, json)
        .with_context(|| format!("failed to write {}", report_path.display()))?;
    exported.files.push(report_path);

    info!(
        dir = %dir.display(),
        sink = exported.sink,
        files = exported.files.len(),
        "run exported"
    );
    Ok(exported)
}
