//! CSV stream loading and writing.
//!
//! Bar files carry the exchange kline columns:
//! `timestamp,open,high,low,close,volume,quote_volume,count,taker_buy_volume,taker_buy_quote_volume`.
//! Only `timestamp` and the four prices are required; missing volume columns read as zero.
//! Funding files carry `timestamp,funding_rate` (`fundingRate` is accepted too).
//!
//! Timestamps are `YYYY-MM-DD HH:MM:SS` (or with a `T` separator), unix seconds, or unix
//! milliseconds. Runs read files lazily through [`CsvSource`]: a row that fails to parse
//! is handed to the synchronizer as a malformed record, which stops that stream without
//! failing the run. Ordering checks belong to the synchronizer too.

use chrono::DateTime;
use perplab_core::data::{DataError, MarketRecord, RecordSource};
use perplab_core::domain::{Bar, FundingTick, Timestamp};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {origin}: {source}")]
    Csv {
        origin: String,
        #[source]
        source: csv::Error,
    },

    #[error("{origin} is missing required column '{column}'")]
    MissingColumn { origin: String, column: String },

    #[error("{origin} line {line}: bad timestamp '{value}'")]
    Timestamp {
        origin: String,
        line: u64,
        value: String,
    },

    #[error("{origin} line {line}: bad value '{value}' in column '{column}'")]
    Field {
        origin: String,
        line: u64,
        column: String,
        value: String,
    },
}

/// Milliseconds above this magnitude; anything smaller is read as seconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Parse a timestamp in any of the accepted formats.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = Timestamp::parse_from_str(raw, format) {
            return Some(ts);
        }
    }
    let number: i64 = raw.parse().ok()?;
    let utc = if number.abs() >= MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(number)?
    } else {
        DateTime::from_timestamp(number, 0)?
    };
    Some(utc.naive_utc())
}

/// Column lookup for one CSV file.
struct Columns {
    origin: String,
    headers: csv::StringRecord,
}

impl Columns {
    fn index(&self, names: &[&str]) -> Option<usize> {
        names
            .iter()
            .find_map(|name| self.headers.iter().position(|h| h.trim() == *name))
    }

    fn require(&self, names: &[&str]) -> Result<usize, LoadError> {
        self.index(names).ok_or_else(|| LoadError::MissingColumn {
            origin: self.origin.clone(),
            column: names[0].to_string(),
        })
    }

    fn timestamp(&self, row: &csv::StringRecord, idx: usize, line: u64) -> Result<Timestamp, LoadError> {
        let value = row.get(idx).unwrap_or("");
        parse_timestamp(value).ok_or_else(|| LoadError::Timestamp {
            origin: self.origin.clone(),
            line,
            value: value.to_string(),
        })
    }

    fn number<T: std::str::FromStr + Default>(
        &self,
        row: &csv::StringRecord,
        idx: Option<usize>,
        column: &str,
        line: u64,
    ) -> Result<T, LoadError> {
        let Some(idx) = idx else {
            return Ok(T::default());
        };
        let value = row.get(idx).unwrap_or("").trim();
        if value.is_empty() {
            return Ok(T::default());
        }
        value.parse().map_err(|_| LoadError::Field {
            origin: self.origin.clone(),
            line,
            column: column.to_string(),
            value: value.to_string(),
        })
    }
}

/// Column positions for one file layout, resolved from the header row.
#[derive(Debug, Clone, Copy)]
enum Layout {
    Bars {
        ts: usize,
        open: usize,
        high: usize,
        low: usize,
        close: usize,
        volume: Option<usize>,
        quote_volume: Option<usize>,
        count: Option<usize>,
        taker_buy_volume: Option<usize>,
        taker_buy_quote_volume: Option<usize>,
    },
    Funding {
        ts: usize,
        rate: usize,
    },
}

/// Lazy record source over one CSV file.
///
/// Headers are checked when the source is opened. Rows are parsed one at a time as the
/// synchronizer pulls them; a bad row comes back as [`DataError::Malformed`], which
/// halts this stream only.
pub struct CsvSource<R: Read> {
    rows: csv::StringRecordsIntoIter<R>,
    cols: Columns,
    layout: Layout,
    symbol: String,
    line: u64,
}

impl<R: Read> CsvSource<R> {
    fn open(input: R, origin: &str) -> Result<(csv::Reader<R>, Columns), LoadError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
        let headers = rdr
            .headers()
            .map_err(|source| LoadError::Csv {
                origin: origin.to_string(),
                source,
            })?
            .clone();
        Ok((
            rdr,
            Columns {
                origin: origin.to_string(),
                headers,
            },
        ))
    }

    /// Bar rows for `symbol`. Fails if a required column is missing.
    pub fn bars(input: R, symbol: &str, origin: &str) -> Result<Self, LoadError> {
        let (rdr, cols) = Self::open(input, origin)?;
        let layout = Layout::Bars {
            ts: cols.require(&["timestamp", "open_time", "datetime"])?,
            open: cols.require(&["open"])?,
            high: cols.require(&["high"])?,
            low: cols.require(&["low"])?,
            close: cols.require(&["close"])?,
            volume: cols.index(&["volume"]),
            quote_volume: cols.index(&["quote_volume"]),
            count: cols.index(&["count"]),
            taker_buy_volume: cols.index(&["taker_buy_volume"]),
            taker_buy_quote_volume: cols.index(&["taker_buy_quote_volume"]),
        };
        Ok(Self::with_layout(rdr, cols, layout, symbol))
    }

    /// Funding rows for `symbol`. Fails if a required column is missing.
    pub fn funding(input: R, symbol: &str, origin: &str) -> Result<Self, LoadError> {
        let (rdr, cols) = Self::open(input, origin)?;
        let layout = Layout::Funding {
            ts: cols.require(&["timestamp", "fundingTime", "datetime"])?,
            rate: cols.require(&["funding_rate", "fundingRate"])?,
        };
        Ok(Self::with_layout(rdr, cols, layout, symbol))
    }

    fn with_layout(rdr: csv::Reader<R>, cols: Columns, layout: Layout, symbol: &str) -> Self {
        Self {
            rows: rdr.into_records(),
            cols,
            layout,
            symbol: symbol.to_string(),
            line: 1,
        }
    }

    pub fn origin(&self) -> &str {
        &self.cols.origin
    }

    fn parse(&self, row: &csv::StringRecord) -> Result<MarketRecord, LoadError> {
        let cols = &self.cols;
        let line = self.line;
        let record = match self.layout {
            Layout::Bars {
                ts,
                open,
                high,
                low,
                close,
                volume,
                quote_volume,
                count,
                taker_buy_volume,
                taker_buy_quote_volume,
            } => MarketRecord::Bar(Bar {
                symbol: self.symbol.clone(),
                timestamp: cols.timestamp(row, ts, line)?,
                open: cols.number(row, Some(open), "open", line)?,
                high: cols.number(row, Some(high), "high", line)?,
                low: cols.number(row, Some(low), "low", line)?,
                close: cols.number(row, Some(close), "close", line)?,
                volume: cols.number(row, volume, "volume", line)?,
                quote_volume: cols.number(row, quote_volume, "quote_volume", line)?,
                count: cols.number(row, count, "count", line)?,
                taker_buy_volume: cols.number(row, taker_buy_volume, "taker_buy_volume", line)?,
                taker_buy_quote_volume: cols.number(
                    row,
                    taker_buy_quote_volume,
                    "taker_buy_quote_volume",
                    line,
                )?,
            }),
            Layout::Funding { ts, rate } => MarketRecord::Funding(FundingTick::new(
                self.symbol.as_str(),
                cols.timestamp(row, ts, line)?,
                cols.number(row, Some(rate), "funding_rate", line)?,
            )),
        };
        Ok(record)
    }

    /// Next row with the loader's own error, for callers that want the whole file or nothing.
    pub fn next_row(&mut self) -> Option<Result<MarketRecord, LoadError>> {
        let row = self.rows.next()?;
        self.line += 1;
        Some(
            row.map_err(|source| LoadError::Csv {
                origin: self.cols.origin.clone(),
                source,
            })
            .and_then(|row| self.parse(&row)),
        )
    }

    pub fn boxed(self) -> RecordSource
    where
        R: Send + 'static,
    {
        Box::new(self)
    }
}

impl<R: Read> Iterator for CsvSource<R> {
    type Item = Result<MarketRecord, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.next_row()?;
        Some(row.map_err(|err| DataError::Malformed {
            stream: self.symbol.clone(),
            reason: err.to_string(),
        }))
    }
}

fn open(path: &Path) -> Result<std::fs::File, LoadError> {
    std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read every bar for `symbol`, failing on the first bad row.
pub fn read_bars<R: Read>(input: R, symbol: &str, origin: &str) -> Result<Vec<Bar>, LoadError> {
    let mut source = CsvSource::bars(input, symbol, origin)?;
    let mut bars = Vec::new();
    while let Some(row) = source.next_row() {
        if let MarketRecord::Bar(bar) = row? {
            bars.push(bar);
        }
    }
    Ok(bars)
}

/// Read every funding print for `symbol`, failing on the first bad row.
pub fn read_funding<R: Read>(
    input: R,
    symbol: &str,
    origin: &str,
) -> Result<Vec<FundingTick>, LoadError> {
    let mut source = CsvSource::funding(input, symbol, origin)?;
    let mut ticks = Vec::new();
    while let Some(row) = source.next_row() {
        if let MarketRecord::Funding(tick) = row? {
            ticks.push(tick);
        }
    }
    Ok(ticks)
}

pub fn load_bars_csv(path: &Path, symbol: &str) -> Result<Vec<Bar>, LoadError> {
    read_bars(open(path)?, symbol, &path.display().to_string())
}

pub fn load_funding_csv(path: &Path, symbol: &str) -> Result<Vec<FundingTick>, LoadError> {
    read_funding(open(path)?, symbol, &path.display().to_string())
}

/// Open a bar file as a lazy stream. Only open and header failures are errors here.
pub fn open_bars_csv(path: &Path, symbol: &str) -> Result<CsvSource<std::fs::File>, LoadError> {
    CsvSource::bars(open(path)?, symbol, &path.display().to_string())
}

/// Open a funding file as a lazy stream. Only open and header failures are errors here.
pub fn open_funding_csv(
    path: &Path,
    symbol: &str,
) -> Result<CsvSource<std::fs::File>, LoadError> {
    CsvSource::funding(open(path)?, symbol, &path.display().to_string())
}

fn writer(path: &Path) -> Result<csv::Writer<std::fs::File>, LoadError> {
    csv::Writer::from_path(path).map_err(|source| LoadError::Csv {
        origin: path.display().to_string(),
        source,
    })
}

/// Write bars in the loader's column layout.
pub fn write_bars_csv(path: &Path, bars: &[Bar]) -> Result<(), LoadError> {
    let origin = path.display().to_string();
    let csv_err = |source| LoadError::Csv {
        origin: origin.clone(),
        source,
    };
    let mut wtr = writer(path)?;
    wtr.write_record([
        "timestamp",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "quote_volume",
        "count",
        "taker_buy_volume",
        "taker_buy_quote_volume",
    ])
    .map_err(csv_err)?;
    for b in bars {
        wtr.write_record([
            b.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            b.open.to_string(),
            b.high.to_string(),
            b.low.to_string(),
            b.close.to_string(),
            b.volume.to_string(),
            b.quote_volume.to_string(),
            b.count.to_string(),
            b.taker_buy_volume.to_string(),
            b.taker_buy_quote_volume.to_string(),
        ])
        .map_err(csv_err)?;
    }
    wtr.flush().map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_funding_csv(path: &Path, ticks: &[FundingTick]) -> Result<(), LoadError> {
    let origin = path.display().to_string();
    let csv_err = |source| LoadError::Csv {
        origin: origin.clone(),
        source,
    };
    let mut wtr = writer(path)?;
    wtr.write_record(["timestamp", "funding_rate"]).map_err(csv_err)?;
    for t in ticks {
        wtr.write_record([
            t.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            t.funding_rate.to_string(),
        ])
        .map_err(csv_err)?;
    }
    wtr.flush().map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}
