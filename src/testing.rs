//! In-memory session source and role store for unit tests.

use crate::auth::error::AuthError;
use crate::auth::roles::RoleStore;
use crate::auth::source::{SessionSource, AUTH_EVENT_CAPACITY};
use crate::auth::types::{AuthEvent, Session, SignUpRequest, User};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};

pub fn session_for(user_id: &str) -> Session {
    Session {
        access_token: format!("token-{user_id}"),
        refresh_token: Some(format!("refresh-{user_id}")),
        token_type: "bearer".into(),
        expires_at: None,
        user: User {
            id: user_id.to_string(),
            email: Some(format!("{user_id}@example.com")),
            user_metadata: serde_json::Value::Null,
        },
    }
}

// ── Role store ───────────────────────────────────────────────────

/// Role table kept in a map. Individual users can be "held" so their
/// queries block until released.
#[derive(Default)]
pub struct StaticRoleStore {
    roles: Mutex<HashMap<String, Vec<String>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<String>>,
    fail: AtomicBool,
    ignore_filter: bool,
}

impl StaticRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return every role regardless of the requested filter.
    pub fn ignoring_filter(mut self) -> Self {
        self.ignore_filter = true;
        self
    }

    pub fn set_roles(&self, user_id: &str, roles: &[&str]) {
        self.roles.lock().insert(
            user_id.to_string(),
            roles.iter().map(|r| r.to_string()).collect(),
        );
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Block queries for `user_id` until [`release`](Self::release).
    pub fn hold(&self, user_id: &str) {
        self.gates
            .lock()
            .insert(user_id.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, user_id: &str) {
        if let Some(gate) = self.gates.lock().remove(user_id) {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    /// User ids queried so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RoleStore for StaticRoleStore {
    async fn roles_for_user(
        &self,
        user_id: &str,
        filter: &[&str],
    ) -> Result<Vec<String>, AuthError> {
        self.calls.lock().push(user_id.to_string());

        let gate = self.gates.lock().get(user_id).cloned();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| AuthError::RoleQuery(e.to_string()))?;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthError::RoleQuery("simulated network failure".into()));
        }

        let roles = self.roles.lock().get(user_id).cloned().unwrap_or_default();
        Ok(roles
            .into_iter()
            .filter(|r| self.ignore_filter || filter.contains(&r.as_str()))
            .collect())
    }

    async fn grant_role(&self, user_id: &str, role: &str) -> Result<(), AuthError> {
        let mut roles = self.roles.lock();
        let entry = roles.entry(user_id.to_string()).or_default();
        if !entry.iter().any(|r| r == role) {
            entry.push(role.to_string());
        }
        Ok(())
    }

    async fn revoke_role(&self, user_id: &str, role: &str) -> Result<(), AuthError> {
        if let Some(entry) = self.roles.lock().get_mut(user_id) {
            entry.retain(|r| r != role);
        }
        Ok(())
    }
}

// ── Session source ───────────────────────────────────────────────

struct Account {
    password: String,
    user_id: String,
}

/// Session source backed by an account map and a broadcast channel.
pub struct MemorySessionSource {
    accounts: Mutex<HashMap<String, Account>>,
    current: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
    sign_ups: Mutex<Vec<SignUpRequest>>,
    get_session_calls: AtomicUsize,
    get_session_gate: Mutex<Option<Arc<Semaphore>>>,
    fail_get_session: AtomicBool,
    fail_sign_out: AtomicBool,
}

impl Default for MemorySessionSource {
    fn default() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            events,
            sign_ups: Mutex::new(Vec::new()),
            get_session_calls: AtomicUsize::new(0),
            get_session_gate: Mutex::new(None),
            fail_get_session: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
        }
    }
}

impl MemorySessionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, email: &str, password: &str, user_id: &str) -> Self {
        self.accounts.lock().insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user_id: user_id.to_string(),
            },
        );
        self
    }

    /// Pretend a session was restored from storage before mount.
    pub fn set_current(&self, session: Option<Session>) {
        *self.current.lock() = session;
    }

    /// Deliver an event to subscribers as the backend would.
    pub fn emit(&self, event: AuthEvent) {
        *self.current.lock() = event.session.clone();
        let _ = self.events.send(event);
    }

    pub fn sign_ups(&self) -> Vec<SignUpRequest> {
        self.sign_ups.lock().clone()
    }

    pub fn get_session_calls(&self) -> usize {
        self.get_session_calls.load(Ordering::SeqCst)
    }

    /// Make `get_session` read the current session and then block until
    /// [`release_get_session`](Self::release_get_session), like a slow
    /// network round trip.
    pub fn hold_get_session(&self) {
        *self.get_session_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_get_session(&self) {
        if let Some(gate) = self.get_session_gate.lock().take() {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    pub fn fail_get_session(&self, fail: bool) {
        self.fail_get_session.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionSource for MemorySessionSource {
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get_session.load(Ordering::SeqCst) {
            return Err(AuthError::Backend {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        let session = self.current.lock().clone();

        let gate = self.get_session_gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| AuthError::Backend {
                    status: 503,
                    message: e.to_string(),
                })?;
        }
        Ok(session)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let user_id = {
            let accounts = self.accounts.lock();
            match accounts.get(email) {
                Some(account) if account.password == password => account.user_id.clone(),
                _ => {
                    return Err(AuthError::InvalidCredentials(
                        "Invalid login credentials".into(),
                    ))
                }
            }
        };
        let session = session_for(&user_id);
        self.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<(), AuthError> {
        if self.accounts.lock().contains_key(&request.email) {
            return Err(AuthError::AlreadyRegistered);
        }
        self.sign_ups.lock().push(request.clone());
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::Backend {
                status: 500,
                message: "logout failed".into(),
            });
        }
        self.emit(AuthEvent::signed_out());
        Ok(())
    }
}
