//! Append-only CSV emotion log.

use chrono::{DateTime, Local};
use emoscope_core::{EmotionLabel, EmotionVector};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column order is fixed; downstream consumers depend on it.
pub const CSV_HEADER: &str = "timestamp,dominant_emotion,angry,disgust,fear,happy,sad,surprise,neutral";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),
    #[error("sink already finished")]
    Finished,
}

/// One accepted detection.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    /// Smoothed label, or the raw dominant label when smoothing is off.
    pub label: EmotionLabel,
    pub emotions: EmotionVector,
}

impl LogRecord {
    pub fn now(label: EmotionLabel, emotions: EmotionVector) -> Self {
        Self {
            timestamp: Local::now(),
            label,
            emotions,
        }
    }

    /// Render as one CSV line without the trailing newline.
    pub fn to_csv_line(&self) -> String {
        let mut line = format!("{},{}", self.timestamp.format(TIMESTAMP_FORMAT), self.label);
        for p in self.emotions.as_array() {
            line.push(',');
            line.push_str(&format_probability(*p));
        }
        line
    }
}

/// Up to 6 decimals, trailing zeros trimmed.
fn format_probability(p: f32) -> String {
    let s = format!("{p:.6}");
    let s = s.trim_end_matches('0');
    let s = s.strip_suffix('.').unwrap_or(s);
    s.to_string()
}

/// Destination for log records.
pub trait RecordSink {
    fn append(&mut self, record: &LogRecord) -> Result<(), SinkError>;
    /// Flush and close. Appends after this fail.
    fn finish(&mut self) -> Result<(), SinkError>;
}

/// CSV file sink, truncated on open, flushed after every row.
pub struct CsvSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows: u64,
}

impl CsvSink {
    /// Create (or truncate) `path` and write the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let create_err = |source| SinkError::Create { path: path.clone(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(create_err)?;
        }
        let file = File::create(&path).map_err(create_err)?;

        let mut writer = BufWriter::new(file);
        writeln!(writer, "{CSV_HEADER}")?;
        writer.flush()?;

        tracing::info!(path = %path.display(), "emotion log opened");
        Ok(Self {
            path,
            writer: Some(writer),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Finished)?;
        // Whole line in one write, then flush, so an interrupted run keeps complete rows.
        let mut line = record.to_csv_line();
        line.push('\n');
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| SinkError::Write(e.into_error()))?;
        file.sync_all()?;
        tracing::info!(path = %self.path.display(), rows = self.rows, "emotion log closed");
        Ok(())
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.finish() {
                tracing::warn!(error = %e, "failed to finalize emotion log");
            }
        }
    }
}
