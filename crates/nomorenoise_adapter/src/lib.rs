#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use nomorenoise_kernel_contracts::complaint::{
    ComplaintId, ComplaintRecord, ComplaintScope, ComplaintStatus, NoiseIntensity,
};
use nomorenoise_kernel_contracts::ContractViolation;
use nomorenoise_os::geolocation::{
    prefill_location, ReportedPosition, DEFAULT_GEO_TIMEOUT_MS, MAX_GEO_TIMEOUT_MS,
    MIN_GEO_TIMEOUT_MS,
};
use nomorenoise_os::identity::{
    AdminGate, AdminSession, AuthError, Authenticator, Credentials, Identity,
    InMemoryIdentityProvider, DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USERNAME,
};
use nomorenoise_os::lifecycle::{ComplaintFields, LifecycleController, LifecycleError, ViewAccess};
use nomorenoise_os::view::{IntensityCounts, MaterializedView, StatusCounts};
use nomorenoise_storage::complaints::{ComplaintStore, StorageError};
use nomorenoise_storage::feed::{ChangeFeed, FeedSubscription, SubscriptionId};

pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid adapter config: {0}")]
    Config(String),
    #[error("complaint store failed to open: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl From<AuthError> for AdapterError {
    fn from(err: AuthError) -> Self {
        AdapterError::Lifecycle(err.into())
    }
}

impl From<ContractViolation> for AdapterError {
    fn from(err: ContractViolation) -> Self {
        AdapterError::Lifecycle(err.into())
    }
}

impl AdapterError {
    pub fn outcome(&self) -> &'static str {
        match self {
            AdapterError::Lifecycle(LifecycleError::Validation(_)) => "REJECTED",
            AdapterError::Lifecycle(LifecycleError::Auth(_)) => "UNAUTHORIZED",
            AdapterError::Lifecycle(LifecycleError::NotFound(_)) => "NOT_FOUND",
            AdapterError::Lifecycle(LifecycleError::Transport(_)) | AdapterError::Storage(_) => {
                "UNAVAILABLE"
            }
            AdapterError::Config(_) => "MISCONFIGURED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AdapterError::Lifecycle(LifecycleError::Validation(_)) => 400,
            AdapterError::Lifecycle(LifecycleError::Auth(_)) => 401,
            AdapterError::Lifecycle(LifecycleError::NotFound(_)) => 404,
            AdapterError::Lifecycle(LifecycleError::Transport(_)) | AdapterError::Storage(_) => {
                503
            }
            AdapterError::Config(_) => 500,
        }
    }

    pub fn to_response(&self) -> AdapterErrorResponse {
        AdapterErrorResponse {
            status: "error".to_string(),
            outcome: self.outcome().to_string(),
            reason: Some(self.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub http_bind: SocketAddr,
    pub store_path: Option<PathBuf>,
    pub admin_username: String,
    pub admin_password: String,
    pub geo_timeout_ms: u64,
    pub demo_user_enabled: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            http_bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            store_path: None,
            admin_username: DEFAULT_ADMIN_USERNAME.to_string(),
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
            geo_timeout_ms: DEFAULT_GEO_TIMEOUT_MS,
            demo_user_enabled: true,
        }
    }
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, AdapterError> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    pub fn from_env_var_map<F>(mut env_getter: F) -> Result<Self, AdapterError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let bind = env_getter("NOMORENOISE_HTTP_BIND")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let http_bind: SocketAddr = bind.parse().map_err(|err| {
            AdapterError::Config(format!("NOMORENOISE_HTTP_BIND '{bind}' is invalid: {err}"))
        })?;
        let store_path = env_getter("NOMORENOISE_STORE_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let admin_username = env_getter("NOMORENOISE_ADMIN_USERNAME")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ADMIN_USERNAME.to_string());
        let admin_password = env_getter("NOMORENOISE_ADMIN_PASSWORD")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ADMIN_PASSWORD.to_string());
        let geo_timeout_ms = env_getter("NOMORENOISE_GEO_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| (MIN_GEO_TIMEOUT_MS..=MAX_GEO_TIMEOUT_MS).contains(v))
            .unwrap_or(DEFAULT_GEO_TIMEOUT_MS);
        let demo_user_enabled = match env_getter("NOMORENOISE_DEMO_USER_ENABLED") {
            Some(v) => !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            ),
            None => true,
        };

        Ok(Self {
            http_bind,
            store_path,
            admin_username,
            admin_password,
            geo_timeout_ms,
            demo_user_enabled,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AdapterErrorResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserSessionResponse {
    pub status: String,
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AdminLoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AdminSessionResponse {
    pub status: String,
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AckResponse {
    pub status: String,
    pub outcome: String,
}

impl AckResponse {
    fn ok(outcome: &str) -> Self {
        Self {
            status: "ok".to_string(),
            outcome: outcome.to_string(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubmitComplaintRequest {
    pub noise_type: String,
    pub description: String,
    pub intensity: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ComplaintResponse {
    pub status: String,
    pub complaint: ComplaintRecord,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ComplaintListResponse {
    pub status: String,
    pub complaints: Vec<ComplaintRecord>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AdminComplaintsResponse {
    pub status: String,
    pub status_filter: Option<ComplaintStatus>,
    pub complaints: Vec<ComplaintRecord>,
    pub counts_by_status: StatusCounts,
    pub counts_by_intensity: IntensityCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub complaints: usize,
    pub feed_subscribers: usize,
    pub feed_last_seq: u64,
}

fn issue_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn lock_poisoned(what: &str) -> AdapterError {
    AdapterError::Lifecycle(LifecycleError::Transport(format!("{what} lock poisoned")))
}

/// Process-wide adapter state. Cheap to clone; every field is shared.
#[derive(Debug, Clone)]
pub struct AdapterRuntime {
    store: Arc<Mutex<ComplaintStore>>,
    controller: LifecycleController,
    identities: Arc<InMemoryIdentityProvider>,
    admin_gate: Arc<AdminGate>,
    user_sessions: Arc<Mutex<BTreeMap<String, Identity>>>,
    admin_sessions: Arc<Mutex<BTreeMap<String, AdminSession>>>,
    admin_streams: Arc<Mutex<BTreeMap<String, Vec<SubscriptionId>>>>,
    geo_timeout: Duration,
    demo_user_enabled: bool,
}

impl Default for AdapterRuntime {
    fn default() -> Self {
        Self::with_store(ComplaintStore::new_in_memory(), &AdapterConfig::default())
    }
}

impl AdapterRuntime {
    pub fn new(config: &AdapterConfig) -> Result<Self, AdapterError> {
        let store = match config.store_path.as_ref() {
            Some(path) => ComplaintStore::open_with_journal(path.clone(), ChangeFeed::new())?,
            None => {
                tracing::warn!("NOMORENOISE_STORE_PATH unset; complaints are kept in memory only");
                ComplaintStore::new_in_memory()
            }
        };
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: ComplaintStore, config: &AdapterConfig) -> Self {
        let store = Arc::new(Mutex::new(store));
        Self {
            controller: LifecycleController::new(store.clone()),
            store,
            identities: Arc::new(InMemoryIdentityProvider::new()),
            admin_gate: Arc::new(AdminGate::new(
                config.admin_username.clone(),
                config.admin_password.clone(),
            )),
            user_sessions: Arc::new(Mutex::new(BTreeMap::new())),
            admin_sessions: Arc::new(Mutex::new(BTreeMap::new())),
            admin_streams: Arc::new(Mutex::new(BTreeMap::new())),
            geo_timeout: Duration::from_millis(config.geo_timeout_ms),
            demo_user_enabled: config.demo_user_enabled,
        }
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    fn user_sessions(&self) -> Result<MutexGuard<'_, BTreeMap<String, Identity>>, AdapterError> {
        self.user_sessions
            .lock()
            .map_err(|_| lock_poisoned("user session table"))
    }

    fn admin_sessions(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<String, AdminSession>>, AdapterError> {
        self.admin_sessions
            .lock()
            .map_err(|_| lock_poisoned("admin session table"))
    }

    fn admin_streams(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<String, Vec<SubscriptionId>>>, AdapterError> {
        self.admin_streams
            .lock()
            .map_err(|_| lock_poisoned("admin stream table"))
    }

    fn identity_for(&self, token: Option<&str>) -> Result<Option<Identity>, AdapterError> {
        let Some(token) = token else {
            return Ok(None);
        };
        Ok(self.user_sessions()?.get(token).cloned())
    }

    fn admin_for(&self, token: Option<&str>) -> Result<Option<AdminSession>, AdapterError> {
        let Some(token) = token else {
            return Ok(None);
        };
        let session = self.admin_sessions()?.get(token).cloned();
        Ok(session.filter(|session| self.admin_gate.is_active(session)))
    }

    fn open_user_session(&self, identity: Identity) -> Result<UserSessionResponse, AdapterError> {
        let token = issue_token();
        self.user_sessions()?.insert(token.clone(), identity.clone());
        Ok(UserSessionResponse {
            status: "ok".to_string(),
            token,
            user_id: identity.user_id.as_str().to_string(),
            email: identity.email,
            full_name: identity.full_name,
        })
    }

    pub fn sign_up(&self, request: SignUpRequest) -> Result<UserSessionResponse, AdapterError> {
        let identity = self.identities.sign_up(
            &Credentials::new(request.email, request.password),
            request.full_name,
        )?;
        self.open_user_session(identity)
    }

    pub fn sign_in(&self, request: SignInRequest) -> Result<UserSessionResponse, AdapterError> {
        let identity = self
            .identities
            .authenticate(&Credentials::new(request.email, request.password))?;
        self.open_user_session(identity)
    }

    pub fn demo_sign_in(&self) -> Result<UserSessionResponse, AdapterError> {
        if !self.demo_user_enabled {
            return Err(AuthError::InvalidCredentials.into());
        }
        let identity = self.identities.demo_sign_in()?;
        self.open_user_session(identity)
    }

    pub fn sign_out(&self, token: Option<&str>) -> Result<AckResponse, AdapterError> {
        let removed = match token {
            Some(token) => self.user_sessions()?.remove(token),
            None => None,
        };
        if removed.is_none() {
            return Err(AuthError::MissingIdentity.into());
        }
        Ok(AckResponse::ok("SIGNED_OUT"))
    }

    pub fn admin_login(
        &self,
        request: AdminLoginRequest,
    ) -> Result<AdminSessionResponse, AdapterError> {
        let session = self.admin_gate.login(&request.username, &request.password)?;
        let token = issue_token();
        let username = session.username().to_string();
        self.admin_sessions()?.insert(token.clone(), session);
        Ok(AdminSessionResponse {
            status: "ok".to_string(),
            token,
            username,
        })
    }

    pub fn admin_logout(&self, token: Option<&str>) -> Result<AckResponse, AdapterError> {
        let removed = match token {
            Some(token) => self.admin_sessions()?.remove(token),
            None => None,
        };
        let Some(session) = removed else {
            return Err(AuthError::MissingAdminCapability.into());
        };
        self.admin_gate.logout(&session);

        let streams = match token {
            Some(token) => self.admin_streams()?.remove(token).unwrap_or_default(),
            None => Vec::new(),
        };
        if !streams.is_empty() {
            let store = self
                .store
                .lock()
                .map_err(|_| lock_poisoned("complaint store"))?;
            for id in streams {
                store.feed().revoke(id);
            }
        }
        Ok(AckResponse::ok("LOGGED_OUT"))
    }

    /// Fills a blank location from the reported coordinates before submitting.
    pub async fn submit_complaint(
        &self,
        token: Option<&str>,
        request: SubmitComplaintRequest,
    ) -> Result<ComplaintResponse, AdapterError> {
        let Some(identity) = self.identity_for(token)? else {
            return Err(AuthError::MissingIdentity.into());
        };
        let intensity: NoiseIntensity = request.intensity.parse()?;

        let mut location = request.location.unwrap_or_default();
        if location.trim().is_empty() {
            if let (Some(lat), Some(lng)) = (request.latitude, request.longitude) {
                if let Some(prefill) =
                    prefill_location(&ReportedPosition::new(lat, lng), self.geo_timeout).await
                {
                    location = prefill.location_text;
                }
            }
        }

        let complaint = self.controller.submit(
            Some(&identity),
            ComplaintFields {
                noise_type: request.noise_type,
                description: request.description,
                intensity,
                location,
                contact: request.contact,
                latitude: request.latitude,
                longitude: request.longitude,
            },
        )?;
        Ok(ComplaintResponse {
            status: "ok".to_string(),
            complaint,
        })
    }

    pub fn my_complaints(&self, token: Option<&str>) -> Result<ComplaintListResponse, AdapterError> {
        let identity = self.identity_for(token)?;
        let complaints = self.controller.my_complaints(identity.as_ref())?;
        Ok(ComplaintListResponse {
            status: "ok".to_string(),
            complaints,
        })
    }

    pub fn admin_complaints(
        &self,
        token: Option<&str>,
        status_filter: Option<&str>,
    ) -> Result<AdminComplaintsResponse, AdapterError> {
        let admin = self.admin_for(token)?;
        let status_filter = status_filter
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "all")
            .map(str::parse::<ComplaintStatus>)
            .transpose()?;
        let rows = self.controller.all_complaints(admin.as_ref())?;
        let view = MaterializedView::from_snapshot(ComplaintScope::All, rows);
        let complaints = match status_filter {
            Some(status) => view.filtered(status).into_iter().cloned().collect(),
            None => view.all().to_vec(),
        };
        Ok(AdminComplaintsResponse {
            status: "ok".to_string(),
            status_filter,
            complaints,
            counts_by_status: view.counts_by_status(),
            counts_by_intensity: view.counts_by_intensity(),
        })
    }

    pub fn update_status(
        &self,
        token: Option<&str>,
        complaint_id: &str,
        request: UpdateStatusRequest,
    ) -> Result<ComplaintResponse, AdapterError> {
        let admin = self.admin_for(token)?;
        let complaint_id = ComplaintId::new(complaint_id)?;
        let status: ComplaintStatus = request.status.parse()?;
        let complaint = self
            .controller
            .update_status(admin.as_ref(), &complaint_id, status)?;
        Ok(ComplaintResponse {
            status: "ok".to_string(),
            complaint,
        })
    }

    /// The stream closes when the admin session that opened it logs out.
    pub fn subscribe_events(&self, token: Option<&str>) -> Result<FeedSubscription, AdapterError> {
        let (Some(token), Some(admin)) = (token, self.admin_for(token)?) else {
            return Err(AuthError::MissingAdminCapability.into());
        };
        let subscription = self.controller.subscribe(&ViewAccess::Admin(admin))?;
        self.admin_streams()?
            .entry(token.to_string())
            .or_default()
            .push(subscription.id());
        Ok(subscription)
    }

    pub fn health_report(&self) -> Result<AdapterHealthResponse, AdapterError> {
        let store = self
            .store
            .lock()
            .map_err(|_| lock_poisoned("complaint store"))?;
        Ok(AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: "HEALTHY".to_string(),
            reason: None,
            complaints: store.len(),
            feed_subscribers: store.feed().subscriber_count(),
            feed_last_seq: store.feed().last_seq(),
        })
    }
}
