#![forbid(unsafe_code)]

//! Client-side materialized view of the complaint table.
//!
//! Starts from a newest-first snapshot and folds feed events into it. Every
//! projection (status filter, counts) is computed from the current sequence on
//! read, so there is no second copy of state that could drift.

use std::collections::BTreeMap;

use nomorenoise_kernel_contracts::complaint::{
    ComplaintId, ComplaintRecord, ComplaintScope, ComplaintStatus, NoiseIntensity,
};
use nomorenoise_kernel_contracts::feed::{ChangeEvent, ChangeEventKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusCounts {
    pub submitted: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub total: usize,
}

impl StatusCounts {
    pub fn get(&self, status: ComplaintStatus) -> usize {
        match status {
            ComplaintStatus::Submitted => self.submitted,
            ComplaintStatus::InProgress => self.in_progress,
            ComplaintStatus::Resolved => self.resolved,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IntensityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl IntensityCounts {
    pub fn get(&self, intensity: NoiseIntensity) -> usize {
        match intensity {
            NoiseIntensity::Low => self.low,
            NoiseIntensity::Medium => self.medium,
            NoiseIntensity::High => self.high,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedView {
    scope: ComplaintScope,
    rows: Vec<ComplaintRecord>,
}

impl MaterializedView {
    /// `rows` must already be newest-first, as the store query returns them.
    pub fn from_snapshot(scope: ComplaintScope, rows: Vec<ComplaintRecord>) -> Self {
        let rows = rows.into_iter().filter(|r| scope.includes(r)).collect();
        Self { scope, rows }
    }

    pub fn scope(&self) -> &ComplaintScope {
        &self.scope
    }

    /// Replaces the whole sequence, e.g. after a periodic re-snapshot.
    pub fn reset(&mut self, rows: Vec<ComplaintRecord>) {
        let scope = &self.scope;
        self.rows = rows.into_iter().filter(|r| scope.includes(r)).collect();
    }

    fn position(&self, complaint_id: &ComplaintId) -> Option<usize> {
        self.rows.iter().position(|r| &r.complaint_id == complaint_id)
    }

    /// Folds one event into the view. Returns whether the sequence changed.
    ///
    /// Duplicate `Created` events and `Deleted` for unknown ids are no-ops. An
    /// `Updated` for an id the snapshot missed is inserted by `created_at`.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        if !self.scope.includes(&event.record) {
            return false;
        }
        let existing = self.position(event.complaint_id());
        match (event.kind, existing) {
            (ChangeEventKind::Created, Some(_)) => false,
            (ChangeEventKind::Created, None) => {
                self.rows.insert(0, event.record.clone());
                true
            }
            (ChangeEventKind::Updated, Some(idx)) => {
                if self.rows[idx] == event.record {
                    return false;
                }
                self.rows[idx] = event.record.clone();
                true
            }
            (ChangeEventKind::Updated, None) => {
                let at = self
                    .rows
                    .iter()
                    .position(|r| r.created_at < event.record.created_at)
                    .unwrap_or(self.rows.len());
                self.rows.insert(at, event.record.clone());
                true
            }
            (ChangeEventKind::Deleted, Some(idx)) => {
                self.rows.remove(idx);
                true
            }
            (ChangeEventKind::Deleted, None) => false,
        }
    }

    pub fn all(&self) -> &[ComplaintRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, complaint_id: &ComplaintId) -> Option<&ComplaintRecord> {
        self.rows.iter().find(|r| &r.complaint_id == complaint_id)
    }

    pub fn filtered(&self, status: ComplaintStatus) -> Vec<&ComplaintRecord> {
        self.rows.iter().filter(|r| r.status == status).collect()
    }

    pub fn filtered_by_intensity(&self, intensity: NoiseIntensity) -> Vec<&ComplaintRecord> {
        self.rows.iter().filter(|r| r.intensity == intensity).collect()
    }

    pub fn counts_by_status(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            total: self.rows.len(),
            ..StatusCounts::default()
        };
        for r in &self.rows {
            match r.status {
                ComplaintStatus::Submitted => counts.submitted += 1,
                ComplaintStatus::InProgress => counts.in_progress += 1,
                ComplaintStatus::Resolved => counts.resolved += 1,
            }
        }
        counts
    }

    pub fn counts_by_intensity(&self) -> IntensityCounts {
        let mut counts = IntensityCounts::default();
        for r in &self.rows {
            match r.intensity {
                NoiseIntensity::Low => counts.low += 1,
                NoiseIntensity::Medium => counts.medium += 1,
                NoiseIntensity::High => counts.high += 1,
            }
        }
        counts
    }

    pub fn counts_by_noise_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.rows {
            *counts.entry(r.noise_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Rows carrying coordinates, for map layers.
    pub fn located(&self) -> Vec<&ComplaintRecord> {
        self.rows
            .iter()
            .filter(|r| r.latitude.is_some() && r.longitude.is_some())
            .collect()
    }
}
