#![forbid(unsafe_code)]

//! Best-effort location prefill for the complaint form.
//!
//! A position source may be slow, denied, or absent. None of that blocks a
//! submission: the prefill either arrives within the timeout or the form stays
//! as the citizen left it.

use std::future::Future;
use std::time::Duration;

pub const DEFAULT_GEO_TIMEOUT_MS: u64 = 3_000;
pub const MIN_GEO_TIMEOUT_MS: u64 = 100;
pub const MAX_GEO_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeoError {
    #[error("position permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    Unavailable,
    #[error("position out of range: {0}")]
    OutOfRange(&'static str),
}

pub trait GeoLocator {
    fn locate(&self) -> impl Future<Output = Result<GeoFix, GeoError>> + Send;
}

/// A position the client already reported alongside its request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportedPosition {
    latitude: f64,
    longitude: f64,
}

impl ReportedPosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl GeoLocator for ReportedPosition {
    fn locate(&self) -> impl Future<Output = Result<GeoFix, GeoError>> + Send {
        let (latitude, longitude) = (self.latitude, self.longitude);
        async move {
            if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
                return Err(GeoError::OutOfRange("latitude"));
            }
            if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
                return Err(GeoError::OutOfRange("longitude"));
            }
            Ok(GeoFix {
                latitude,
                longitude,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationPrefill {
    pub latitude: f64,
    pub longitude: f64,
    pub location_text: String,
}

impl From<GeoFix> for LocationPrefill {
    fn from(fix: GeoFix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            location_text: format!("{:.6}, {:.6}", fix.latitude, fix.longitude),
        }
    }
}

/// Returns `None` on error or timeout; the caller leaves the location untouched.
pub async fn prefill_location<L: GeoLocator>(
    locator: &L,
    timeout: Duration,
) -> Option<LocationPrefill> {
    match tokio::time::timeout(timeout, locator.locate()).await {
        Ok(Ok(fix)) => Some(fix.into()),
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "location prefill skipped");
            None
        }
        Err(_) => {
            tracing::debug!(timeout_ms = timeout.as_millis() as u64, "location prefill timed out");
            None
        }
    }
}
