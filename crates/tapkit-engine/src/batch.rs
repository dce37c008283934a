//! Batch writer: records to newline-delimited JSON files plus BATCH messages.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tapkit_types::message::{BatchEncoding, BatchMessage};

fn default_records_per_file() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Directory batch files are written under.
    pub root: PathBuf,
    #[serde(default = "default_records_per_file")]
    pub records_per_file: u64,
}

struct OpenFile {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

/// Per-stream writer rolling over to a new file every `records_per_file` records.
pub struct BatchWriter {
    stream: String,
    root: PathBuf,
    records_per_file: u64,
    prefix: String,
    seq: u32,
    current: Option<OpenFile>,
}

fn file_stem(stream: &str) -> String {
    stream
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn file_url(path: &Path) -> io::Result<String> {
    let absolute = fs::canonicalize(path)?;
    Ok(format!("file://{}", absolute.display()))
}

impl BatchWriter {
    /// # Errors
    ///
    /// Returns an I/O error when the root directory cannot be created.
    pub fn new(config: &BatchConfig, stream: &str) -> io::Result<Self> {
        fs::create_dir_all(&config.root)?;
        Ok(Self {
            stream: stream.to_string(),
            root: config.root.clone(),
            records_per_file: config.records_per_file.max(1),
            prefix: Utc::now().format("%Y%m%dT%H%M%S%3f").to_string(),
            seq: 0,
            current: None,
        })
    }

    /// Whether records are buffered in a file not yet announced.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.current.as_ref().is_some_and(|f| f.records > 0)
    }

    /// Append one record. Returns a BATCH message when the file fills up.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn write(&mut self, record: &Map<String, Value>) -> io::Result<Option<BatchMessage>> {
        if self.current.is_none() {
            self.seq += 1;
            let path = self.root.join(format!(
                "{}-{}-{:05}.jsonl",
                file_stem(&self.stream),
                self.prefix,
                self.seq
            ));
            let file = File::create(&path)?;
            self.current = Some(OpenFile {
                path,
                writer: BufWriter::new(file),
                records: 0,
            });
        }
        let Some(open) = self.current.as_mut() else {
            return Ok(None);
        };
        serde_json::to_writer(&mut open.writer, record).map_err(io::Error::other)?;
        open.writer.write_all(b"\n")?;
        open.records += 1;
        if open.records >= self.records_per_file {
            return self.flush();
        }
        Ok(None)
    }

    /// Close the current file and describe it. `None` when nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn flush(&mut self) -> io::Result<Option<BatchMessage>> {
        let Some(mut open) = self.current.take() else {
            return Ok(None);
        };
        open.writer.flush()?;
        drop(open.writer);
        if open.records == 0 {
            fs::remove_file(&open.path)?;
            return Ok(None);
        }
        tracing::debug!(
            stream = self.stream,
            path = %open.path.display(),
            records = open.records,
            "Closed batch file"
        );
        Ok(Some(BatchMessage {
            stream: self.stream.clone(),
            encoding: BatchEncoding::default(),
            manifest: vec![file_url(&open.path)?],
        }))
    }
}
