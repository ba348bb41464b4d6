//! Export sink: durable storage for a finished result collection.
//!
//! [`ExportSink`] is the contract the orchestrator writes through;
//! [`CsvSink`] is the file-backed implementation.

use crate::error::{CapesError, Result};
use crate::model::{ResultCollection, ResultRecord};
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Column order of every exported row
pub const HEADER: [&str; 4] = ["Title", "Author", "Year", "URL"];

/// Rows written between automatic flushes
pub const FLUSH_EVERY: usize = 10;

/// Destination of harvested records.
///
/// Call order: `initialize`, `write_header`, any number of writes, `close`.
pub trait ExportSink: Send {
    /// Acquire the underlying resource
    fn initialize(&mut self) -> Result<()>;

    /// Write the column header. Repeated calls write it only once.
    fn write_header(&mut self) -> Result<()>;

    fn write_record(&mut self, record: &ResultRecord) -> Result<()>;

    /// Write every record in order, then flush
    fn write_records(&mut self, records: &[ResultRecord]) -> Result<()> {
        for record in records {
            self.write_record(record)?;
        }
        self.flush()
    }

    /// Write all records of `collection`, then flush
    fn write_collection(&mut self, collection: &ResultCollection) -> Result<()> {
        self.write_records(collection.results())
    }

    fn flush(&mut self) -> Result<()>;

    /// Flush and release the underlying resource
    fn close(&mut self) -> Result<()>;
}

/// Settings for [`CsvSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    /// Output file; `.csv` is appended when missing
    pub path: PathBuf,
    /// Field delimiter byte
    pub delimiter: u8,
    /// Whether `write_header` emits the column row
    pub include_header: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("results.csv"),
            delimiter: b',',
            include_header: true,
        }
    }
}

impl ExportConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Append `.ext` to `path` unless it already ends with that extension.
///
/// `results.txt` becomes `results.txt.csv`; the existing extension is kept.
pub fn ensure_extension(path: &Path, ext: &str) -> PathBuf {
    let has_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext));

    if has_ext {
        return path.to_path_buf();
    }

    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// CSV file sink
pub struct CsvSink {
    config: ExportConfig,
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    header_written: bool,
    rows: usize,
}

impl CsvSink {
    pub fn new(config: ExportConfig) -> Self {
        let path = ensure_extension(&config.path, "csv");
        Self {
            config,
            path,
            writer: None,
            header_written: false,
            rows: 0,
        }
    }

    /// Resolved output path (with extension)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far
    pub fn rows(&self) -> usize {
        self.rows
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| CapesError::export("CSV sink used before initialize"))
    }
}

impl ExportSink for CsvSink {
    fn initialize(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CapesError::export_with(format!("failed to create directory {:?}", parent), e)
            })?;
        }

        let writer = csv::WriterBuilder::new()
            .delimiter(self.config.delimiter)
            .has_headers(false)
            .from_path(&self.path)
            .map_err(|e| CapesError::export_with(format!("failed to create {:?}", self.path), e))?;

        debug!(path = ?self.path, "CSV sink initialized");
        self.writer = Some(writer);
        self.header_written = false;
        self.rows = 0;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        if !self.config.include_header || self.header_written {
            return Ok(());
        }
        self.writer()?.write_record(HEADER)?;
        self.header_written = true;
        Ok(())
    }

    fn write_record(&mut self, record: &ResultRecord) -> Result<()> {
        self.writer()?.write_record([
            record.title.as_str(),
            record.author.as_str(),
            record.year.as_str(),
            record.url.as_str(),
        ])?;
        self.rows += 1;

        if self.rows % FLUSH_EVERY == 0 {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!(path = ?self.path, rows = self.rows, "Results exported");
        }
        Ok(())
    }
}
