//! Supabase integration for the Meta Point website.
//!
//! Implements the two backend seams of the auth layer over Supabase's REST APIs:
//! - [`SessionSource`] via GoTrue (`/auth/v1/*`): password sign-in, sign-up,
//!   logout, refresh-token exchange
//! - [`RoleStore`] via PostgREST (`/rest/v1/user_roles`)
//!
//! ## Design
//! - HTTP client (reqwest) with the project's anon key; row-level security
//!   applies because table requests carry the user's access token
//! - The current session is held in memory, optionally mirrored to a JSON
//!   file (the CLI's equivalent of browser local storage), and every change
//!   is broadcast as an [`AuthEvent`]
//! - An expired session is refreshed on `get_session`

use crate::auth::error::AuthError;
use crate::auth::roles::RoleStore;
use crate::auth::source::{SessionSource, AUTH_EVENT_CAPACITY};
use crate::auth::types::{AuthEvent, AuthEventKind, Session, SignUpRequest, User};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// Refresh this many seconds before the access token actually expires.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// Role assignment table.
const ROLES_TABLE: &str = "user_roles";

// ── Configuration ────────────────────────────────────────────────

/// Supabase connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Supabase project URL (e.g., https://xxxx.supabase.co).
    pub url: String,
    /// Public anon key; safe to ship to clients.
    pub anon_key: String,
}

// ── Wire models ──────────────────────────────────────────────────

/// Token endpoint response (password and refresh grants).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs)
        });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".into()),
            expires_at,
            user: self.user,
        }
    }
}

/// GoTrue and PostgREST both return JSON errors, with different field names.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

impl ErrorBody {
    fn text(&self) -> Option<String> {
        self.msg
            .clone()
            .or_else(|| self.error_description.clone())
            .or_else(|| self.message.clone())
            .or_else(|| self.error.clone())
    }
}

/// One row of `user_roles` as selected by the role query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRow {
    pub role: String,
}

/// Insert payload for `user_roles`.
#[derive(Debug, Clone, Serialize)]
struct RoleAssignment<'a> {
    user_id: &'a str,
    role: &'a str,
}

// ── Supabase client ──────────────────────────────────────────────

/// Supabase HTTP client holding the current user session.
pub struct SupabaseClient {
    config: SupabaseConfig,
    http: reqwest::Client,
    session: Mutex<Option<Session>>,
    session_file: Option<PathBuf>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseClient {
    /// Create a new Supabase client. A session previously persisted to
    /// `session_file` is restored.
    pub fn new(config: SupabaseConfig, session_file: Option<PathBuf>) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let restored = match session_file.as_deref() {
            Some(path) => load_session(path),
            None => None,
        };
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            config,
            http,
            session: Mutex::new(restored),
            session_file,
            events,
        })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    /// Build a GoTrue endpoint URL.
    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url(), endpoint)
    }

    /// Build the PostgREST URL for a table.
    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url(), table)
    }

    /// Headers for a request. Table requests use the user's token when one
    /// is available so row-level security sees the caller.
    fn auth_headers(&self, bearer: Option<&str>) -> Vec<(&'static str, String)> {
        let token = bearer.unwrap_or(&self.config.anon_key);
        vec![
            ("apikey", self.config.anon_key.clone()),
            ("Authorization", format!("Bearer {token}")),
        ]
    }

    fn current_access_token(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.access_token.clone())
    }

    /// Replace the held session, persist it, and broadcast the change.
    fn store_session(&self, session: Option<Session>, kind: AuthEventKind) {
        *self.session.lock() = session.clone();

        if let Some(path) = self.session_file.as_deref() {
            if let Err(e) = persist_session(path, session.as_ref()) {
                tracing::warn!(path = %path.display(), "Failed to persist session: {e}");
            }
        }

        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(AuthEvent { kind, session });
    }

    async fn post_token(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, AuthError> {
        let url = format!("{}?grant_type={}", self.auth_url("token"), grant_type);
        let mut request = self.http.post(&url).json(&body);
        for (key, value) in self.auth_headers(None) {
            request = request.header(key, value);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let token: TokenResponse = resp.json().await?;
        Ok(token.into_session())
    }

    /// Exchange the refresh token for a new session. Emits `TokenRefreshed`.
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let refresh_token = self
            .session
            .lock()
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
            .ok_or(AuthError::NoSession)?;

        let session = self
            .post_token(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;
        tracing::debug!(user_id = %session.user.id, "Session refreshed");
        self.store_session(Some(session.clone()), AuthEventKind::TokenRefreshed);
        Ok(session)
    }

    // ── Health check ─────────────────────────────────────────

    /// Check if the GoTrue service is reachable.
    pub async fn health_check(&self) -> bool {
        let mut request = self.http.get(self.auth_url("health"));
        for (key, value) in self.auth_headers(None) {
            request = request.header(key, value);
        }

        matches!(request.send().await, Ok(resp) if resp.status().is_success())
    }
}

#[async_trait]
impl SessionSource for SupabaseClient {
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let current = self.session.lock().clone();
        let Some(session) = current else {
            return Ok(None);
        };

        if !session.is_expired(chrono::Utc::now(), EXPIRY_LEEWAY_SECS) {
            return Ok(Some(session));
        }
        if session.refresh_token.is_none() {
            tracing::debug!("Stored session expired without refresh token");
            self.store_session(None, AuthEventKind::SignedOut);
            return Ok(None);
        }

        match self.refresh_session().await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(e) if e.is_credential_error() || matches!(e, AuthError::Backend { .. }) => {
                tracing::warn!("Session refresh rejected, signing out: {e}");
                self.store_session(None, AuthEventKind::SignedOut);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let session = self
            .post_token(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        tracing::info!(user_id = %session.user.id, "Signed in");
        self.store_session(Some(session.clone()), AuthEventKind::SignedIn);
        Ok(session)
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<(), AuthError> {
        let url = format!(
            "{}?redirect_to={}",
            self.auth_url("signup"),
            urlencoding::encode(&request.email_redirect_to)
        );
        let payload = serde_json::json!({
            "email": request.email,
            "password": request.password,
            "data": { "full_name": request.full_name },
        });

        let mut http_request = self.http.post(&url).json(&payload);
        for (key, value) in self.auth_headers(None) {
            http_request = http_request.header(key, value);
        }

        let resp = http_request.send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self.current_access_token();
        let result = match token {
            Some(token) => {
                let mut request = self.http.post(self.auth_url("logout"));
                for (key, value) in self.auth_headers(Some(&token)) {
                    request = request.header(key, value);
                }
                match request.send().await {
                    Ok(resp) if resp.status().is_success() => Ok(()),
                    // Token already revoked or expired server-side.
                    Ok(resp) if matches!(resp.status().as_u16(), 401 | 403 | 404) => Ok(()),
                    Ok(resp) => Err(error_from_response(resp).await),
                    Err(e) => Err(AuthError::Transport(e)),
                }
            }
            None => Ok(()),
        };

        // The local session is dropped whatever the server said.
        self.store_session(None, AuthEventKind::SignedOut);
        result
    }
}

#[async_trait]
impl RoleStore for SupabaseClient {
    async fn roles_for_user(
        &self,
        user_id: &str,
        filter: &[&str],
    ) -> Result<Vec<String>, AuthError> {
        let mut url = format!(
            "{}?select=role&user_id=eq.{}",
            self.table_url(ROLES_TABLE),
            urlencoding::encode(user_id)
        );
        if !filter.is_empty() {
            url.push_str(&format!("&role=in.({})", filter.join(",")));
        }

        let token = self.current_access_token();
        let mut request = self.http.get(&url);
        for (key, value) in self.auth_headers(token.as_deref()) {
            request = request.header(key, value);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::RoleQuery(format!("{status}: {body}")));
        }

        let rows: Vec<RoleRow> = resp
            .json()
            .await
            .map_err(|e| AuthError::RoleQuery(e.to_string()))?;
        Ok(rows.into_iter().map(|r| r.role).collect())
    }

    async fn grant_role(&self, user_id: &str, role: &str) -> Result<(), AuthError> {
        let token = self.current_access_token();
        let mut request = self
            .http
            .post(self.table_url(ROLES_TABLE))
            .json(&RoleAssignment { user_id, role })
            .header("Prefer", "return=minimal");
        for (key, value) in self.auth_headers(token.as_deref()) {
            request = request.header(key, value);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        tracing::info!(user_id, role, "Role granted");
        Ok(())
    }

    async fn revoke_role(&self, user_id: &str, role: &str) -> Result<(), AuthError> {
        let url = format!(
            "{}?user_id=eq.{}&role=eq.{}",
            self.table_url(ROLES_TABLE),
            urlencoding::encode(user_id),
            urlencoding::encode(role)
        );
        let token = self.current_access_token();
        let mut request = self.http.delete(&url);
        for (key, value) in self.auth_headers(token.as_deref()) {
            request = request.header(key, value);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        tracing::info!(user_id, role, "Role revoked");
        Ok(())
    }
}

// ── Error mapping ────────────────────────────────────────────────

async fn error_from_response(resp: reqwest::Response) -> AuthError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    classify_error(status, &body)
}

fn classify_error(status: u16, body: &str) -> AuthError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.text().unwrap_or_else(|| body.trim().to_string());
    let lowered = message.to_lowercase();

    if parsed.error_code.as_deref() == Some("user_already_exists")
        || lowered.contains("already registered")
    {
        return AuthError::AlreadyRegistered;
    }

    let credential_status = matches!(status, 400 | 401 | 422);
    if credential_status
        && (parsed.error.as_deref() == Some("invalid_grant")
            || parsed.error_code.is_some()
            || parsed.msg.is_some())
    {
        return AuthError::InvalidCredentials(message);
    }

    AuthError::Backend { status, message }
}

// ── Session persistence ──────────────────────────────────────────

fn load_session(path: &Path) -> Option<Session> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring unreadable session file: {e}");
            None
        }
    }
}

fn persist_session(path: &Path, session: Option<&Session>) -> Result<(), AuthError> {
    let Some(session) = session else {
        return match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        };
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(session)?)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
