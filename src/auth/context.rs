//! Session state machine.
//!
//! [`AuthContext`] owns `{user, session, is_admin, loading}` and keeps it in
//! step with a [`SessionSource`]. Every session transition updates the
//! user/session fields synchronously and then hands the admin check to a
//! spawned task. Results are tagged with a generation number: a result is
//! only applied if no later transition has happened since it was issued,
//! so a slow check for a previous user can never land on the current one.
//!
//! ```text
//!  Initializing ──session──▸ ResolvingRole ──result──▸ Ready
//!       │                         │                      │
//!       └────────no session───────┴──────sign-out────────┴──▸ SignedOut
//! ```
//!
//! A single-slot in-flight marker deduplicates repeated delivery of the
//! same user's session (the mount-time fetch and the first event usually
//! race) so that only one role query runs per transition.

use super::error::AuthError;
use super::roles::RoleResolver;
use super::source::SessionSource;
use super::types::{AuthEvent, AuthEventKind, AuthSnapshot, Session, SignUpRequest};
use crate::notify::Notifier;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Default wait after sign-in for the role check to land.
pub const DEFAULT_SIGN_IN_SETTLE: Duration = Duration::from_millis(500);

const SIGNED_IN_NOTICE: &str = "Signed in successfully!";
const SIGNED_UP_NOTICE: &str = "Account created! Please check your email to verify.";
const SIGNED_OUT_NOTICE: &str = "Signed out successfully";
const SIGN_OUT_ERROR_NOTICE: &str = "Error signing out";

/// Tunables for [`AuthContext`].
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Site origin used to build the email-verification redirect.
    pub site_url: String,
    /// Upper bound on how long `sign_in` waits for the role check.
    pub sign_in_settle: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            site_url: "http://localhost:8080".into(),
            sign_in_settle: DEFAULT_SIGN_IN_SETTLE,
        }
    }
}

impl AuthSettings {
    /// Verification emails send users back to the site root.
    pub fn email_redirect_url(&self) -> String {
        format!("{}/", self.site_url.trim_end_matches('/'))
    }
}

/// A role query issued for one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCheck {
    pub generation: u64,
    pub user_id: String,
}

struct MachineState {
    snapshot: AuthSnapshot,
    /// Bumped on every transition that invalidates pending role results.
    generation: u64,
    in_flight: Option<RoleCheck>,
    last_checked_user: Option<String>,
}

struct Shared {
    source: Arc<dyn SessionSource>,
    resolver: RoleResolver,
    notifier: Arc<dyn Notifier>,
    settings: AuthSettings,
    machine: Mutex<MachineState>,
    state_tx: watch::Sender<AuthSnapshot>,
}

/// Handle to the session state machine. Cheap to clone; create one at the
/// application root and pass it to consumers.
#[derive(Clone)]
pub struct AuthContext {
    shared: Arc<Shared>,
}

/// Keeps the auth event subscription alive. Dropping it unsubscribes.
pub struct AuthListener {
    task: JoinHandle<()>,
}

impl AuthListener {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl AuthContext {
    pub fn new(
        source: Arc<dyn SessionSource>,
        resolver: RoleResolver,
        notifier: Arc<dyn Notifier>,
        settings: AuthSettings,
    ) -> Self {
        let snapshot = AuthSnapshot::initializing();
        let (state_tx, _) = watch::channel(snapshot.clone());
        Self {
            shared: Arc::new(Shared {
                source,
                resolver,
                notifier,
                settings,
                machine: Mutex::new(MachineState {
                    snapshot,
                    generation: 0,
                    in_flight: None,
                    last_checked_user: None,
                }),
                state_tx,
            }),
        }
    }

    // ── Observation ──────────────────────────────────────────────

    /// Current state.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.shared.machine.lock().snapshot.clone()
    }

    /// Reactive view of the state; changes on every transition.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the first resolution pass for the current identity is done.
    pub async fn wait_until_ready(&self) -> AuthSnapshot {
        let mut rx = self.subscribe();
        let snapshot = match rx.wait_for(|s| !s.loading).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        snapshot
    }

    /// User id of the last completed role check.
    pub fn last_checked_user(&self) -> Option<String> {
        self.shared.machine.lock().last_checked_user.clone()
    }

    /// The role check currently awaiting its result, if any.
    pub fn in_flight(&self) -> Option<RoleCheck> {
        self.shared.machine.lock().in_flight.clone()
    }

    // ── Mount ────────────────────────────────────────────────────

    /// Subscribe to the session source and resolve the current session.
    ///
    /// The subscription is taken before the session fetch so no event can
    /// fall between the two.
    pub async fn start(&self) -> AuthListener {
        tracing::debug!("Setting up auth state listener");
        let mut events = self.shared.source.subscribe();
        let ctx = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        ctx.handle_event(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth listener lagged, re-reading session");
                        ctx.sync_current_session().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Auth event stream closed");
                        break;
                    }
                }
            }
        });

        self.sync_current_session().await;
        AuthListener { task }
    }

    /// Fetch the session once from the source and feed it through the
    /// same update path as events.
    ///
    /// The fetch is pinned to the generation current when it was issued. If
    /// any transition lands while it is outstanding, the fetched value is
    /// older than that transition and is dropped.
    pub async fn sync_current_session(&self) {
        let issued = self.shared.machine.lock().generation;
        match self.shared.source.get_session().await {
            Ok(Some(session)) => {
                tracing::debug!(user_id = %session.user.id, "Initial session found");
                let check = {
                    let mut m = self.shared.machine.lock();
                    if m.generation != issued {
                        tracing::debug!(
                            user_id = %session.user.id,
                            "Auth state changed during session fetch, discarding fetched session"
                        );
                        return;
                    }
                    self.apply_locked(&mut m, Some(session))
                };
                if let Some(check) = check {
                    self.spawn_role_check(check);
                }
            }
            Ok(None) => {
                tracing::debug!("No initial session");
                self.settle_without_session(issued);
            }
            Err(e) => {
                tracing::warn!("Initial session fetch failed: {e}");
                self.settle_without_session(issued);
            }
        }
    }

    /// Finish initialization with "no session" unless an event has
    /// already established a user or moved the state on in the meantime.
    fn settle_without_session(&self, issued: u64) {
        let mut m = self.shared.machine.lock();
        if m.generation != issued || m.snapshot.user.is_some() {
            tracing::debug!("Session established by an event first, keeping it");
            return;
        }
        m.snapshot = AuthSnapshot::signed_out();
        self.publish(&m);
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Apply a session-changed event and spawn its role check, if any.
    ///
    /// Returns the handle of the spawned check so callers that need the
    /// resolved state can await it.
    pub fn handle_event(&self, event: AuthEvent) -> Option<JoinHandle<()>> {
        tracing::debug!(
            kind = %event.kind,
            email = event.session.as_ref().and_then(|s| s.user.email.as_deref()),
            "Auth state change"
        );
        let check = self.apply_session(event.session)?;
        Some(self.spawn_role_check(check))
    }

    fn spawn_role_check(&self, check: RoleCheck) -> JoinHandle<()> {
        let ctx = self.clone();
        tokio::spawn(async move { ctx.run_role_check(check).await })
    }

    /// Synchronous half of a transition. Returns the role check to run.
    pub fn apply_session(&self, session: Option<Session>) -> Option<RoleCheck> {
        let mut m = self.shared.machine.lock();
        self.apply_locked(&mut m, session)
    }

    fn apply_locked(&self, m: &mut MachineState, session: Option<Session>) -> Option<RoleCheck> {
        let Some(session) = session else {
            m.generation += 1;
            m.in_flight = None;
            m.last_checked_user = None;
            m.snapshot = AuthSnapshot::signed_out();
            self.publish(m);
            tracing::debug!("User signed out, admin status cleared");
            return None;
        };

        let user_id = session.user.id.clone();
        let same_user = m.snapshot.user_id() == Some(user_id.as_str());
        m.snapshot.user = Some(session.user.clone());
        m.snapshot.session = Some(session);

        let already_checking = m
            .in_flight
            .as_ref()
            .is_some_and(|check| check.user_id == user_id);
        if same_user && already_checking {
            self.publish(m);
            tracing::debug!(%user_id, "Admin check already in progress, skipping");
            return None;
        }

        m.generation += 1;
        if !same_user {
            m.snapshot.is_admin = false;
            m.snapshot.loading = true;
        }
        let check = RoleCheck {
            generation: m.generation,
            user_id,
        };
        m.in_flight = Some(check.clone());
        self.publish(m);
        Some(check)
    }

    /// Asynchronous half of a transition: query and apply if still current.
    pub async fn run_role_check(&self, check: RoleCheck) {
        let is_admin = self.shared.resolver.check_admin_role(&check.user_id).await;
        self.finish_role_check(&check, is_admin);
    }

    /// Apply a role result. Returns whether it was still current.
    fn finish_role_check(&self, check: &RoleCheck, is_admin: bool) -> bool {
        let mut m = self.shared.machine.lock();

        if m
            .in_flight
            .as_ref()
            .is_some_and(|c| c.generation == check.generation)
        {
            m.in_flight = None;
        }

        if m.generation != check.generation {
            tracing::debug!(
                user_id = %check.user_id,
                issued = check.generation,
                current = m.generation,
                "Discarding stale admin check result"
            );
            return false;
        }

        m.snapshot.is_admin = is_admin;
        m.snapshot.loading = false;
        m.last_checked_user = Some(check.user_id.clone());
        self.publish(&m);
        tracing::debug!(user_id = %check.user_id, is_admin, "Admin status updated");
        true
    }

    /// Publish while the lock is held so observers see transitions in order.
    fn publish(&self, m: &MachineState) {
        self.shared.state_tx.send_replace(m.snapshot.clone());
    }

    // ── Actions ──────────────────────────────────────────────────

    /// Fail-closed admin check for any user id.
    pub async fn check_admin_role(&self, user_id: &str) -> bool {
        self.shared.resolver.check_admin_role(user_id).await
    }

    /// Sign in with email and password.
    ///
    /// On success, waits up to `sign_in_settle` for the new user's role
    /// check so that a route guard evaluated right after sees `is_admin`.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        tracing::info!(email, "Signing in");
        match self.shared.source.sign_in_with_password(email, password).await {
            Ok(session) => {
                self.shared.notifier.success(SIGNED_IN_NOTICE);
                if !self.wait_for_user(&session.user.id).await {
                    tracing::debug!(
                        user_id = %session.user.id,
                        "Role check did not settle before navigation"
                    );
                }
                Ok(session)
            }
            Err(e) => {
                tracing::warn!(email, "Sign in error: {e}");
                self.shared.notifier.error(&e.notice());
                Err(e)
            }
        }
    }

    async fn wait_for_user(&self, user_id: &str) -> bool {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(|s| s.user_id() == Some(user_id) && !s.loading);
        tokio::time::timeout(self.shared.settings.sign_in_settle, settled)
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Create an account; the user must verify their email before signing in.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<(), AuthError> {
        tracing::info!(email, "Signing up");
        let request = SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            full_name: full_name.to_string(),
            email_redirect_to: self.shared.settings.email_redirect_url(),
        };

        match self.shared.source.sign_up(&request).await {
            Ok(()) => {
                self.shared.notifier.success(SIGNED_UP_NOTICE);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(email, "Sign up error: {e}");
                self.shared.notifier.error(&e.notice());
                Err(e)
            }
        }
    }

    /// Clear local state immediately, then confirm with the source.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        tracing::info!("Signing out");
        self.apply_session(None);

        match self.shared.source.sign_out().await {
            Ok(()) => {
                self.shared.notifier.success(SIGNED_OUT_NOTICE);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Sign out error: {e}");
                let notice = match &e {
                    AuthError::Backend { message, .. } if !message.is_empty() => message.clone(),
                    _ => SIGN_OUT_ERROR_NOTICE.to_string(),
                };
                self.shared.notifier.error(&notice);
                Err(e)
            }
        }
    }
}
