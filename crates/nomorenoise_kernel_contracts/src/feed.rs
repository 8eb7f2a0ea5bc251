#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::complaint::{ComplaintId, ComplaintRecord};

/// The only topic the complaint feed publishes on.
pub const COMPLAINTS_TOPIC: &str = "complaints";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEventKind {
    Created,
    Updated,
    /// Part of the protocol so views can handle it; nothing emits it yet.
    Deleted,
}

impl ChangeEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeEventKind::Created => "created",
            ChangeEventKind::Updated => "updated",
            ChangeEventKind::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Feed-wide publish sequence, starting at 1.
    pub seq: u64,
    pub kind: ChangeEventKind,
    pub record: ComplaintRecord,
}

impl ChangeEvent {
    pub fn v1(seq: u64, kind: ChangeEventKind, record: ComplaintRecord) -> Self {
        Self { seq, kind, record }
    }

    pub fn complaint_id(&self) -> &ComplaintId {
        &self.record.complaint_id
    }
}
