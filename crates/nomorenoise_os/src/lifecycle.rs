#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use nomorenoise_kernel_contracts::complaint::{
    ComplaintId, ComplaintInput, ComplaintRecord, ComplaintScope, ComplaintStatus, NoiseIntensity,
};
use nomorenoise_kernel_contracts::feed::COMPLAINTS_TOPIC;
use nomorenoise_kernel_contracts::{ContractViolation, MonotonicTimeNs};
use nomorenoise_storage::complaints::{ComplaintStore, StorageError};
use nomorenoise_storage::feed::{FeedError, FeedSubscription};
use nomorenoise_storage::repo::ComplaintRepo;

use crate::identity::{AdminSession, AuthError, Identity};

/// Every failure a lifecycle operation can surface. None are retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("validation failed: {0}")]
    Validation(#[from] ContractViolation),
    #[error("not authorized: {0}")]
    Auth(#[from] AuthError),
    #[error("complaint not found: {0}")]
    NotFound(String),
    #[error("complaint store unavailable: {0}")]
    Transport(String),
}

impl From<StorageError> for LifecycleError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ContractViolation(v) => LifecycleError::Validation(v),
            StorageError::NotFound { key, .. } => LifecycleError::NotFound(key),
            other => LifecycleError::Transport(other.to_string()),
        }
    }
}

impl From<FeedError> for LifecycleError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::UnknownTopic(_) => LifecycleError::Validation(ContractViolation::InvalidValue {
                field: "feed.topic",
                reason: "unknown topic",
            }),
            other => LifecycleError::Transport(other.to_string()),
        }
    }
}

/// Descriptive fields a citizen fills in. The owner comes from the identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplaintFields {
    pub noise_type: String,
    pub description: String,
    pub intensity: NoiseIntensity,
    pub location: String,
    pub contact: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Who is asking for a live view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewAccess {
    Admin(AdminSession),
    Owner(Identity),
}

impl ViewAccess {
    pub fn scope(&self) -> ComplaintScope {
        match self {
            ViewAccess::Admin(_) => ComplaintScope::All,
            ViewAccess::Owner(identity) => ComplaintScope::OwnedBy(identity.user_id.clone()),
        }
    }
}

pub fn system_time_now_ns() -> MonotonicTimeNs {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1);
    MonotonicTimeNs(u64::try_from(nanos).unwrap_or(u64::MAX).max(1))
}

/// The single authorization checkpoint in front of the complaint store.
///
/// Citizens may only create complaints they own; only an [`AdminSession`] may
/// change status. The store itself does no authorization.
#[derive(Debug)]
pub struct LifecycleController<R = ComplaintStore> {
    repo: Arc<Mutex<R>>,
}

impl<R> Clone for LifecycleController<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
        }
    }
}

impl<R: ComplaintRepo> LifecycleController<R> {
    pub fn new(repo: Arc<Mutex<R>>) -> Self {
        Self { repo }
    }

    fn repo(&self) -> Result<MutexGuard<'_, R>, LifecycleError> {
        self.repo
            .lock()
            .map_err(|_| LifecycleError::Transport("complaint store lock poisoned".to_string()))
    }

    pub fn submit(
        &self,
        identity: Option<&Identity>,
        fields: ComplaintFields,
    ) -> Result<ComplaintRecord, LifecycleError> {
        let Some(identity) = identity else {
            tracing::warn!("complaint submission without identity rejected");
            return Err(AuthError::MissingIdentity.into());
        };
        let input = ComplaintInput::v1(
            identity.user_id.clone(),
            fields.noise_type,
            fields.description,
            fields.intensity,
            fields.location,
            fields.contact,
            fields.latitude,
            fields.longitude,
        )?;

        let mut repo = self.repo()?;
        let complaint_id = repo.create_complaint_row(input, system_time_now_ns())?;
        repo.complaint_row(&complaint_id)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound(complaint_id.as_str().to_string()))
    }

    /// Any status may replace any other, including moving back to `submitted`.
    pub fn update_status(
        &self,
        admin: Option<&AdminSession>,
        complaint_id: &ComplaintId,
        status: ComplaintStatus,
    ) -> Result<ComplaintRecord, LifecycleError> {
        let Some(admin) = admin else {
            tracing::warn!(complaint_id = %complaint_id, "status update without admin session rejected");
            return Err(AuthError::MissingAdminCapability.into());
        };
        tracing::debug!(
            session_no = admin.session_no(),
            complaint_id = %complaint_id,
            status = status.as_str(),
            "admin status update"
        );
        let mut repo = self.repo()?;
        Ok(repo.update_complaint_status_row(complaint_id, status, system_time_now_ns())?)
    }

    pub fn my_complaints(
        &self,
        identity: Option<&Identity>,
    ) -> Result<Vec<ComplaintRecord>, LifecycleError> {
        let Some(identity) = identity else {
            return Err(AuthError::MissingIdentity.into());
        };
        let repo = self.repo()?;
        Ok(repo.complaint_rows(&ComplaintScope::OwnedBy(identity.user_id.clone())))
    }

    pub fn all_complaints(
        &self,
        admin: Option<&AdminSession>,
    ) -> Result<Vec<ComplaintRecord>, LifecycleError> {
        if admin.is_none() {
            return Err(AuthError::MissingAdminCapability.into());
        }
        let repo = self.repo()?;
        Ok(repo.complaint_rows(&ComplaintScope::All))
    }

    pub fn snapshot(&self, access: &ViewAccess) -> Result<Vec<ComplaintRecord>, LifecycleError> {
        match access {
            ViewAccess::Admin(session) => self.all_complaints(Some(session)),
            ViewAccess::Owner(identity) => self.my_complaints(Some(identity)),
        }
    }

    /// Opens a feed subscription "from now". Take the snapshot first.
    pub fn subscribe(&self, access: &ViewAccess) -> Result<FeedSubscription, LifecycleError> {
        let repo = self.repo()?;
        let subscription = repo.subscribe_complaint_feed(COMPLAINTS_TOPIC)?;
        tracing::debug!(
            subscription_id = %subscription.id(),
            admin = matches!(access, ViewAccess::Admin(_)),
            "complaint feed subscription opened"
        );
        Ok(subscription)
    }
}
