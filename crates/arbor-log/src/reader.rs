//! Log directory reader.

use crate::record::LogRecord;
use arbor_common::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Extension of log files inside a log directory.
pub const LOG_FILE_EXTENSION: &str = "arborlog";

/// Returns the file name of the log file with the given sequence number.
pub fn log_file_name(seq: u64) -> String {
    format!("{:016}.{}", seq, LOG_FILE_EXTENSION)
}

/// Reads every record in a log directory.
///
/// Log files are named `<seq>.arborlog`; they are read in ascending
/// sequence order and their records concatenated. Files with other names
/// are ignored.
pub struct LogReader {
    files: BTreeMap<u64, PathBuf>,
}

impl LogReader {
    /// Indexes the log files in `log_dir`. A missing directory holds no logs.
    pub fn open(log_dir: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();

        if log_dir.exists() {
            for entry in std::fs::read_dir(log_dir)? {
                let entry = entry?;
                let path = entry.path();

                if path
                    .extension()
                    .map(|e| e == LOG_FILE_EXTENSION)
                    .unwrap_or(false)
                {
                    if let Some(stem) = path.file_stem() {
                        if let Ok(seq) = stem.to_string_lossy().parse::<u64>() {
                            files.insert(seq, path);
                        }
                    }
                }
            }
        }

        Ok(Self { files })
    }

    /// Returns the number of log files.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Returns the log file paths in read order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.values().map(|p| p.as_path())
    }

    /// Reads and verifies every record, in log order.
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        for (seq, path) in &self.files {
            let data = std::fs::read(path)?;
            let file_records = LogRecord::parse_all(&data)?;
            tracing::debug!(
                seq = *seq,
                records = file_records.len(),
                "read log file"
            );
            records.extend(file_records);
        }
        Ok(records)
    }
}
