#![forbid(unsafe_code)]

//! Identity collaborators.
//!
//! Citizens sign in through an [`Authenticator`]; the bundled
//! [`InMemoryIdentityProvider`] keeps email/password accounts in process.
//! Administrative capability is separate: [`AdminGate`] compares a fixed shared
//! credential pair and hands out an [`AdminSession`] that stays active until it is
//! logged out. The credential check is a plain string comparison.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nomorenoise_kernel_contracts::complaint::UserId;
use sha2::{Digest, Sha256};

pub const DEMO_USER_EMAIL: &str = "demo@nomorenoise.app";
pub const DEMO_USER_PASSWORD: &str = "Demo123!";
pub const DEMO_USER_FULL_NAME: &str = "Demo User";

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "1234";

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("an authenticated identity is required")]
    MissingIdentity,
    #[error("administrative capability is required")]
    MissingAdminCapability,
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("user already registered")]
    AlreadyRegistered,
    #[error("invalid sign-up: {0}")]
    InvalidSignUp(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

pub trait Authenticator {
    fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError>;
}

#[derive(Debug, Clone)]
struct Account {
    identity: Identity,
    salt: [u8; 16],
    password_digest: [u8; 32],
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn password_digest(salt: &[u8; 16], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

fn user_id_for_email(email: &str) -> Result<UserId, AuthError> {
    let digest = Sha256::digest(email.as_bytes());
    let mut hex = String::with_capacity(24);
    for b in digest.iter().take(12) {
        hex.push_str(&format!("{b:02x}"));
    }
    UserId::new(format!("usr_{hex}")).map_err(|_| AuthError::InvalidSignUp("email"))
}

#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    accounts: Mutex<BTreeMap<String, Account>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn accounts(&self) -> MutexGuard<'_, BTreeMap<String, Account>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sign_up(
        &self,
        credentials: &Credentials,
        full_name: Option<String>,
    ) -> Result<Identity, AuthError> {
        let email = normalize_email(&credentials.email);
        let Some((local, domain)) = email.split_once('@') else {
            return Err(AuthError::InvalidSignUp("email must contain '@'"));
        };
        if local.is_empty() || domain.is_empty() || email.len() > 254 {
            return Err(AuthError::InvalidSignUp("email is malformed"));
        }
        if credentials.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidSignUp(
                "password must be at least 6 characters",
            ));
        }

        let mut accounts = self.accounts();
        if accounts.contains_key(&email) {
            return Err(AuthError::AlreadyRegistered);
        }
        let salt: [u8; 16] = rand::random();
        let identity = Identity {
            user_id: user_id_for_email(&email)?,
            email: email.clone(),
            full_name: full_name.filter(|n| !n.trim().is_empty()),
        };
        accounts.insert(
            email,
            Account {
                identity: identity.clone(),
                salt,
                password_digest: password_digest(&salt, &credentials.password),
            },
        );
        tracing::info!(user_id = %identity.user_id, "identity registered");
        Ok(identity)
    }

    /// Signs the demo account in, registering it on first use.
    pub fn demo_sign_in(&self) -> Result<Identity, AuthError> {
        let credentials = Credentials::new(DEMO_USER_EMAIL, DEMO_USER_PASSWORD);
        match self.sign_up(&credentials, Some(DEMO_USER_FULL_NAME.to_string())) {
            Ok(_) | Err(AuthError::AlreadyRegistered) => self.authenticate(&credentials),
            Err(err) => Err(err),
        }
    }

    pub fn account_count(&self) -> usize {
        self.accounts().len()
    }
}

impl Authenticator for InMemoryIdentityProvider {
    fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let email = normalize_email(&credentials.email);
        let accounts = self.accounts();
        let Some(account) = accounts.get(&email) else {
            return Err(AuthError::InvalidCredentials);
        };
        if password_digest(&account.salt, &credentials.password) != account.password_digest {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(account.identity.clone())
    }
}

/// Proof of administrative capability. Only [`AdminGate::login`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    session_no: u64,
    username: String,
}

impl AdminSession {
    pub fn session_no(&self) -> u64 {
        self.session_no
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

#[derive(Debug)]
pub struct AdminGate {
    username: String,
    password: String,
    next_session_no: AtomicU64,
    active_sessions: Mutex<BTreeSet<u64>>,
}

impl AdminGate {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            next_session_no: AtomicU64::new(1),
            active_sessions: Mutex::new(BTreeSet::new()),
        }
    }

    fn active_sessions(&self) -> MutexGuard<'_, BTreeSet<u64>> {
        self.active_sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<AdminSession, AuthError> {
        if username != self.username || password != self.password {
            tracing::warn!("admin login rejected");
            return Err(AuthError::InvalidCredentials);
        }
        let session_no = self.next_session_no.fetch_add(1, Ordering::Relaxed);
        self.active_sessions().insert(session_no);
        tracing::info!(session_no, "admin session opened");
        Ok(AdminSession {
            session_no,
            username: self.username.clone(),
        })
    }

    /// Whether `session` was issued by this gate and not yet logged out.
    pub fn is_active(&self, session: &AdminSession) -> bool {
        self.active_sessions().contains(&session.session_no)
    }

    /// Ends the session. Every clone of it stops being active. Returns whether it
    /// was active.
    pub fn logout(&self, session: &AdminSession) -> bool {
        let was_active = self.active_sessions().remove(&session.session_no);
        tracing::info!(session_no = session.session_no, was_active, "admin session closed");
        was_active
    }
}

impl Default for AdminGate {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIN_USERNAME, DEFAULT_ADMIN_PASSWORD)
    }
}
