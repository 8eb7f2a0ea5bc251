#![forbid(unsafe_code)]

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use nomorenoise_kernel_contracts::complaint::{ComplaintId, ComplaintRecord, ComplaintStatus};
use nomorenoise_kernel_contracts::MonotonicTimeNs;

use crate::complaints::StorageError;

const JOURNAL_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    Created {
        record: ComplaintRecord,
    },
    StatusUpdated {
        complaint_id: ComplaintId,
        status: ComplaintStatus,
        updated_at: MonotonicTimeNs,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct JournalLine {
    schema_version: u8,
    entry: JournalEntry,
}

/// Append-only JSONL file of committed complaint mutations.
#[derive(Debug, Clone)]
pub struct ComplaintJournal {
    path: PathBuf,
}

impl ComplaintJournal {
    /// Creates the file (and parent directory) when missing and returns every
    /// entry already in it, in file order.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Self, Vec<JournalEntry>), StorageError> {
        let journal = Self { path: path.into() };
        journal.ensure_ready()?;
        let entries = journal.read_entries()?;
        Ok((journal, entries))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_ready(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    StorageError::Journal(format!(
                        "failed to create complaint journal directory '{}': {}",
                        parent.display(),
                        err
                    ))
                })?;
            }
        }
        if !self.path.exists() {
            File::create(&self.path).map_err(|err| {
                StorageError::Journal(format!(
                    "failed to create complaint journal '{}': {}",
                    self.path.display(),
                    err
                ))
            })?;
        }
        Ok(())
    }

    fn read_entries(&self) -> Result<Vec<JournalEntry>, StorageError> {
        let file = File::open(&self.path).map_err(|err| {
            StorageError::Journal(format!(
                "failed to open complaint journal '{}': {}",
                self.path.display(),
                err
            ))
        })?;
        let mut entries = Vec::new();
        for (line_no, line_result) in BufReader::new(file).lines().enumerate() {
            let line = line_result.map_err(|err| {
                StorageError::Journal(format!(
                    "failed reading complaint journal '{}' at line {}: {}",
                    self.path.display(),
                    line_no + 1,
                    err
                ))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: JournalLine = serde_json::from_str(&line).map_err(|err| {
                StorageError::Journal(format!(
                    "failed parsing complaint journal '{}' at line {}: {}",
                    self.path.display(),
                    line_no + 1,
                    err
                ))
            })?;
            if parsed.schema_version != JOURNAL_SCHEMA_VERSION {
                return Err(StorageError::Journal(format!(
                    "unsupported complaint journal schema_version={} at line {}",
                    parsed.schema_version,
                    line_no + 1
                )));
            }
            entries.push(parsed.entry);
        }
        Ok(entries)
    }

    /// Appends one entry and syncs it to disk before returning.
    pub fn append(&self, entry: &JournalEntry) -> Result<(), StorageError> {
        let line = JournalLine {
            schema_version: JOURNAL_SCHEMA_VERSION,
            entry: entry.clone(),
        };
        let mut json = serde_json::to_string(&line).map_err(|err| {
            StorageError::Journal(format!("failed to encode complaint journal entry: {err}"))
        })?;
        json.push('\n');
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|err| {
                StorageError::Journal(format!(
                    "failed opening complaint journal '{}' for append: {}",
                    self.path.display(),
                    err
                ))
            })?;
        let committed_len = file.metadata().map(|meta| meta.len()).map_err(|err| {
            StorageError::Journal(format!(
                "failed reading complaint journal '{}' length: {}",
                self.path.display(),
                err
            ))
        })?;
        if let Err(err) = file.write_all(json.as_bytes()).and_then(|_| file.sync_data()) {
            // Drop any torn tail so the next append starts on a fresh line.
            if let Err(truncate_err) = file.set_len(committed_len) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "complaint journal tail could not be truncated"
                );
            }
            return Err(StorageError::Journal(format!(
                "failed writing complaint journal '{}': {}",
                self.path.display(),
                err
            )));
        }
        Ok(())
    }
}
