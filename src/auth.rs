//! Demo-grade login session.
//!
//! The credential table is a fixed stand-in; a real deployment would delegate
//! authentication elsewhere and keep only the resulting role here.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::{RealtimeError, RealtimeResult, SharedClock, SystemClock};
use crate::storage::{KEY_LOGIN_HISTORY, SharedStorage};
use crate::store::{AuthSession, LoginAttemptRecord, StateStore};

pub const DEFAULT_USER_AGENT: &str = concat!("telemetry-ws/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub role: String,
}

#[derive(Debug, Clone, Default)]
pub struct CredentialTable {
    entries: Vec<Credential>,
}

impl CredentialTable {
    pub fn new(entries: Vec<Credential>) -> Self {
        Self { entries }
    }

    /// Built-in demo operators.
    pub fn demo() -> Self {
        let entry = |username: &str, password: &str, role: &str| Credential {
            username: username.to_string(),
            password: password.to_string(),
            role: role.to_string(),
        };
        Self::new(vec![
            entry("phoenix_7x", "Ph0enix!Rising", "admin"),
            entry("sentinel_ops", "S3ntinel#Watch", "analyst"),
            entry("watch_desk", "D3sk$Monitor", "viewer"),
        ])
    }

    /// Role for an exact `(username, password)` match.
    pub fn verify(&self, username: &str, password: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|c| c.username == username && c.password == password)
            .map(|c| c.role.as_str())
    }
}

/// Best-effort remote sink for login attempts. Failures are never surfaced.
pub trait LoginTelemetry: Send + Sync + 'static {
    fn report(&self, record: &LoginAttemptRecord) -> RealtimeResult<()>;
}

/// Hands records to a background task that owns the actual upload.
impl LoginTelemetry for mpsc::UnboundedSender<LoginAttemptRecord> {
    fn report(&self, record: &LoginAttemptRecord) -> RealtimeResult<()> {
        self.send(record.clone())
            .map_err(|_| RealtimeError::ActorError("login telemetry receiver dropped".into()))
    }
}

pub struct AuthService {
    table: CredentialTable,
    store: StateStore,
    storage: SharedStorage,
    clock: SharedClock,
    telemetry: Option<Arc<dyn LoginTelemetry>>,
    user_agent: String,
}

impl AuthService {
    /// Build the service and restore persisted login history into the store.
    pub fn new(table: CredentialTable, store: StateStore, storage: SharedStorage) -> Self {
        let service = Self {
            table,
            store,
            storage,
            clock: Arc::new(SystemClock),
            telemetry: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        };
        service.restore_history();
        service
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn LoginTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn session(&self) -> AuthSession {
        self.store.read(|s| s.auth.clone())
    }

    /// Exact-match lookup. Returns whether the attempt succeeded; never errors.
    /// The session and the history change in a single store update.
    pub fn login(&self, username: &str, password: &str) -> bool {
        let role = self.table.verify(username, password).map(str::to_owned);
        let success = role.is_some();

        let record = LoginAttemptRecord {
            username: username.to_string(),
            success,
            timestamp_ms: self.clock.now_ms(),
            user_agent: self.user_agent.clone(),
        };
        self.store.modify(|state| {
            let mut session = state.auth.clone();
            match role {
                Some(role) => {
                    session.authenticated = true;
                    session.role = Some(role);
                }
                None => {
                    session.failed_attempt_count = session.failed_attempt_count.saturating_add(1);
                }
            }
            state.set_auth(session);
            state.login_history.push(record.clone());
            true
        });
        self.persist_history();

        if let Some(telemetry) = &self.telemetry {
            if let Err(e) = telemetry.report(&record) {
                tracing::debug!(error = %e, "login telemetry dropped");
            }
        }

        if success {
            tracing::info!(username, "login succeeded");
        } else {
            let error = RealtimeError::InvalidCredentials {
                username: username.to_string(),
            };
            tracing::warn!(error = %error, class = ?error.class(), "login failed");
        }
        success
    }

    /// Clear the session and the data regions; login history is kept.
    pub fn logout(&self) {
        self.store.modify(|state| {
            let mut changed = state.set_auth(AuthSession::default());
            changed |= state.clear_data();
            changed
        });
    }

    fn restore_history(&self) {
        let raw = match self.storage.get(KEY_LOGIN_HISTORY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "could not read login history");
                return;
            }
        };
        match sonic_rs::from_str::<Vec<LoginAttemptRecord>>(&raw) {
            Ok(records) => {
                self.store.replace_login_history(records);
            }
            Err(e) => tracing::warn!(error = %e, "discarding corrupt login history"),
        }
    }

    fn persist_history(&self) {
        let history = self.store.read(|s| s.login_history.to_vec());
        let raw = match sonic_rs::to_string(&history) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "could not serialize login history");
                return;
            }
        };
        if let Err(e) = self.storage.set(KEY_LOGIN_HISTORY, &raw) {
            tracing::warn!(error = %e, "could not persist login history");
        }
    }
}
