#![forbid(unsafe_code)]

use nomorenoise_kernel_contracts::complaint::{
    ComplaintId, ComplaintInput, ComplaintRecord, ComplaintScope, ComplaintStatus,
};
use nomorenoise_kernel_contracts::MonotonicTimeNs;

use crate::complaints::{ComplaintStatusLedgerRow, ComplaintStore, StorageError};
use crate::feed::{FeedError, FeedSubscription};

/// Typed repository interface for complaint storage wiring.
pub trait ComplaintRepo {
    fn create_complaint_row(
        &mut self,
        input: ComplaintInput,
        now: MonotonicTimeNs,
    ) -> Result<ComplaintId, StorageError>;

    fn update_complaint_status_row(
        &mut self,
        complaint_id: &ComplaintId,
        status: ComplaintStatus,
        now: MonotonicTimeNs,
    ) -> Result<ComplaintRecord, StorageError>;

    fn complaint_row(&self, complaint_id: &ComplaintId) -> Option<&ComplaintRecord>;
    fn complaint_rows(&self, scope: &ComplaintScope) -> Vec<ComplaintRecord>;
    fn status_ledger_rows(&self) -> &[ComplaintStatusLedgerRow];

    fn subscribe_complaint_feed(&self, topic: &str) -> Result<FeedSubscription, FeedError>;
}

impl ComplaintRepo for ComplaintStore {
    fn create_complaint_row(
        &mut self,
        input: ComplaintInput,
        now: MonotonicTimeNs,
    ) -> Result<ComplaintId, StorageError> {
        self.create_complaint(input, now)
    }

    fn update_complaint_status_row(
        &mut self,
        complaint_id: &ComplaintId,
        status: ComplaintStatus,
        now: MonotonicTimeNs,
    ) -> Result<ComplaintRecord, StorageError> {
        self.update_complaint_status(complaint_id, status, now)
    }

    fn complaint_row(&self, complaint_id: &ComplaintId) -> Option<&ComplaintRecord> {
        self.complaint(complaint_id)
    }

    fn complaint_rows(&self, scope: &ComplaintScope) -> Vec<ComplaintRecord> {
        self.query_complaints(scope)
    }

    fn status_ledger_rows(&self) -> &[ComplaintStatusLedgerRow] {
        self.status_ledger()
    }

    fn subscribe_complaint_feed(&self, topic: &str) -> Result<FeedSubscription, FeedError> {
        self.feed().subscribe(topic)
    }
}
