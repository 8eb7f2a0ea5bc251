#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use nomorenoise_kernel_contracts::complaint::{
    ComplaintId, ComplaintInput, ComplaintRecord, ComplaintScope, ComplaintStatus,
};
use nomorenoise_kernel_contracts::feed::ChangeEventKind;
use nomorenoise_kernel_contracts::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};
use sha2::{Digest, Sha256};

use crate::feed::ChangeFeed;
use crate::journal::{ComplaintJournal, JournalEntry};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
    #[error("{table} has no row for key {key}")]
    NotFound { table: &'static str, key: String },
    #[error("duplicate key {key} in {table}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("{table} is append-only")]
    AppendOnlyViolation { table: &'static str },
    #[error("{0}")]
    Journal(String),
}

/// One committed status change. The ledger is append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplaintStatusLedgerRow {
    pub schema_version: SchemaVersion,
    pub status_event_id: u64,
    pub complaint_id: ComplaintId,
    pub from_status: ComplaintStatus,
    pub to_status: ComplaintStatus,
    pub updated_at: MonotonicTimeNs,
}

fn complaint_id_for(seq: u64, created_at: MonotonicTimeNs, input: &ComplaintInput) -> String {
    // Not a security hash; only spreads ids so they do not look sequential.
    let mut hasher = Sha256::new();
    hasher.update(seq.to_be_bytes());
    hasher.update(created_at.0.to_be_bytes());
    hasher.update(input.owner_id.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(input.noise_type.as_bytes());
    hasher.update([0]);
    hasher.update(input.location.as_bytes());
    let digest = hasher.finalize();
    let mut suffix = String::with_capacity(12);
    for b in digest.iter().take(6) {
        suffix.push_str(&format!("{b:02x}"));
    }
    format!("cmp_{seq:010}_{suffix}")
}

/// Keyed complaint table. The only writer of complaint state.
///
/// Writes take `&mut self`; share it behind a mutex so creates and status updates
/// are serialized. Each successful write publishes exactly one feed event, after the
/// journal append and the in-memory commit.
#[derive(Debug)]
pub struct ComplaintStore {
    complaints: BTreeMap<ComplaintId, ComplaintRecord>,
    // (created_at, insertion seq) -> id. Iterated in reverse for newest-first reads.
    creation_index: BTreeMap<(MonotonicTimeNs, u64), ComplaintId>,
    status_ledger: Vec<ComplaintStatusLedgerRow>,
    next_complaint_seq: u64,
    next_status_event_id: u64,
    last_created_at: MonotonicTimeNs,
    feed: ChangeFeed,
    journal: Option<ComplaintJournal>,
}

impl ComplaintStore {
    pub fn new_in_memory() -> Self {
        Self::with_feed(ChangeFeed::new())
    }

    pub fn with_feed(feed: ChangeFeed) -> Self {
        Self {
            complaints: BTreeMap::new(),
            creation_index: BTreeMap::new(),
            status_ledger: Vec::new(),
            next_complaint_seq: 1,
            next_status_event_id: 1,
            last_created_at: MonotonicTimeNs(0),
            feed,
            journal: None,
        }
    }

    /// Opens a journal-backed store and replays the journal. Replay publishes nothing.
    pub fn open_with_journal(
        path: impl Into<PathBuf>,
        feed: ChangeFeed,
    ) -> Result<Self, StorageError> {
        let (journal, entries) = ComplaintJournal::open(path)?;
        let mut store = Self::with_feed(feed);
        let replayed = entries.len();
        for entry in entries {
            store.apply_journal_entry(entry)?;
        }
        tracing::info!(
            path = %journal.path().display(),
            replayed,
            complaints = store.complaints.len(),
            "complaint journal replayed"
        );
        store.journal = Some(journal);
        Ok(store)
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn len(&self) -> usize {
        self.complaints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.complaints.is_empty()
    }

    fn next_created_at(&self, now: MonotonicTimeNs) -> MonotonicTimeNs {
        if now.0 > self.last_created_at.0 {
            now
        } else {
            MonotonicTimeNs(self.last_created_at.0.saturating_add(1))
        }
    }

    fn commit_created(&mut self, seq: u64, record: ComplaintRecord) {
        self.last_created_at = record.created_at;
        self.next_complaint_seq = seq.saturating_add(1);
        self.creation_index
            .insert((record.created_at, seq), record.complaint_id.clone());
        self.complaints.insert(record.complaint_id.clone(), record);
    }

    fn commit_status(
        &mut self,
        complaint_id: &ComplaintId,
        status: ComplaintStatus,
        updated_at: MonotonicTimeNs,
    ) -> Result<ComplaintRecord, StorageError> {
        let Some(current) = self.complaints.get_mut(complaint_id) else {
            return Err(StorageError::NotFound {
                table: "complaints",
                key: complaint_id.as_str().to_string(),
            });
        };
        let from_status = current.status;
        current.status = status;
        let updated = current.clone();

        self.status_ledger.push(ComplaintStatusLedgerRow {
            schema_version: SchemaVersion(1),
            status_event_id: self.next_status_event_id,
            complaint_id: complaint_id.clone(),
            from_status,
            to_status: status,
            updated_at,
        });
        self.next_status_event_id = self.next_status_event_id.saturating_add(1);
        Ok(updated)
    }

    fn apply_journal_entry(&mut self, entry: JournalEntry) -> Result<(), StorageError> {
        match entry {
            JournalEntry::Created { record } => {
                record.validate()?;
                if self.complaints.contains_key(&record.complaint_id) {
                    return Err(StorageError::DuplicateKey {
                        table: "complaints",
                        key: record.complaint_id.as_str().to_string(),
                    });
                }
                let seq = self.next_complaint_seq;
                self.commit_created(seq, record);
            }
            JournalEntry::StatusUpdated {
                complaint_id,
                status,
                updated_at,
            } => {
                self.commit_status(&complaint_id, status, updated_at)?;
            }
        }
        Ok(())
    }

    pub fn create_complaint(
        &mut self,
        input: ComplaintInput,
        now: MonotonicTimeNs,
    ) -> Result<ComplaintId, StorageError> {
        input.validate()?;

        let seq = self.next_complaint_seq;
        let created_at = self.next_created_at(now);
        let complaint_id = ComplaintId::new(complaint_id_for(seq, created_at, &input))?;
        if self.complaints.contains_key(&complaint_id) {
            return Err(StorageError::DuplicateKey {
                table: "complaints",
                key: complaint_id.as_str().to_string(),
            });
        }
        let record = ComplaintRecord::from_input_v1(complaint_id.clone(), created_at, input)?;

        if let Some(journal) = &self.journal {
            journal.append(&JournalEntry::Created {
                record: record.clone(),
            })?;
        }
        self.commit_created(seq, record.clone());

        tracing::info!(
            complaint_id = %complaint_id,
            owner_id = %record.owner_id,
            intensity = record.intensity.as_str(),
            "complaint created"
        );
        self.feed.publish(ChangeEventKind::Created, record);
        Ok(complaint_id)
    }

    /// Replaces only `status`. Last write wins; no concurrency token.
    pub fn update_complaint_status(
        &mut self,
        complaint_id: &ComplaintId,
        status: ComplaintStatus,
        now: MonotonicTimeNs,
    ) -> Result<ComplaintRecord, StorageError> {
        if !self.complaints.contains_key(complaint_id) {
            return Err(StorageError::NotFound {
                table: "complaints",
                key: complaint_id.as_str().to_string(),
            });
        }

        if let Some(journal) = &self.journal {
            journal.append(&JournalEntry::StatusUpdated {
                complaint_id: complaint_id.clone(),
                status,
                updated_at: now,
            })?;
        }
        let updated = self.commit_status(complaint_id, status, now)?;

        tracing::info!(
            complaint_id = %complaint_id,
            status = status.as_str(),
            "complaint status updated"
        );
        self.feed.publish(ChangeEventKind::Updated, updated.clone());
        Ok(updated)
    }

    pub fn complaint(&self, complaint_id: &ComplaintId) -> Option<&ComplaintRecord> {
        self.complaints.get(complaint_id)
    }

    /// Newest first by `created_at`; equal timestamps fall back to insertion order.
    pub fn query_complaints(&self, scope: &ComplaintScope) -> Vec<ComplaintRecord> {
        self.creation_index
            .values()
            .rev()
            .filter_map(|id| self.complaints.get(id))
            .filter(|r| scope.includes(r))
            .cloned()
            .collect()
    }

    pub fn status_ledger(&self) -> &[ComplaintStatusLedgerRow] {
        &self.status_ledger
    }

    pub fn attempt_overwrite_status_ledger_row(
        &mut self,
        _status_event_id: u64,
    ) -> Result<(), StorageError> {
        Err(StorageError::AppendOnlyViolation {
            table: "complaint_status_ledger",
        })
    }
}

impl Default for ComplaintStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}
