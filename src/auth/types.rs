//! Session, user, and auth-event types shared by every layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── User & session ───────────────────────────────────────────────

/// Authenticated user as issued by the backend session source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Opaque user id (Supabase UUID).
    pub id: String,
    /// Email address; absent for phone-only accounts.
    #[serde(default)]
    pub email: Option<String>,
    /// Free-form metadata attached at sign-up (`full_name`, ...).
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl User {
    /// Display name recorded at sign-up, if any.
    pub fn full_name(&self) -> Option<&str> {
        self.user_metadata.get("full_name").and_then(|v| v.as_str())
    }
}

/// A credential plus expiry. Replaced wholesale on every auth event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Unix timestamp (seconds) after which the access token is invalid.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".into()
}

impl Session {
    /// Expiry as a UTC datetime.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    /// Whether the access token is past (or within `leeway_secs` of) its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        match self.expires_at {
            Some(at) => now.timestamp() + leeway_secs >= at,
            None => false,
        }
    }
}

// ── Auth events ──────────────────────────────────────────────────

/// Kind of a session-changed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    TokenRefreshed,
    UserUpdated,
    SignedOut,
}

impl AuthEventKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::InitialSession => "INITIAL_SESSION",
            Self::SignedIn => "SIGNED_IN",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::UserUpdated => "USER_UPDATED",
            Self::SignedOut => "SIGNED_OUT",
        }
    }
}

impl std::fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A session-changed notification from the backend session source.
///
/// The state machine only looks at whether `session` is present; `kind`
/// is carried for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn signed_in(session: Session) -> Self {
        Self {
            kind: AuthEventKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self {
            kind: AuthEventKind::TokenRefreshed,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            kind: AuthEventKind::SignedOut,
            session: None,
        }
    }
}

// ── Sign-up request ──────────────────────────────────────────────

/// Account-creation request forwarded to the session source.
#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    /// Where the verification email should send the user back to.
    pub email_redirect_to: String,
}

// ── Observable state ─────────────────────────────────────────────

/// Snapshot of the session state machine as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSnapshot {
    pub user: Option<User>,
    pub session: Option<Session>,
    pub is_admin: bool,
    pub loading: bool,
}

impl AuthSnapshot {
    /// State before the first resolution pass has finished.
    pub fn initializing() -> Self {
        Self {
            user: None,
            session: None,
            is_admin: false,
            loading: true,
        }
    }

    /// State after a sign-out has been observed.
    pub fn signed_out() -> Self {
        Self {
            user: None,
            session: None,
            is_admin: false,
            loading: false,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_expiring_at(expires_at: Option<i64>) -> Session {
        Session {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            token_type: "bearer".into(),
            expires_at,
            user: User {
                id: "user-1".into(),
                email: Some("a@example.com".into()),
                user_metadata: serde_json::json!({"full_name": "Ada Lovelace"}),
            },
        }
    }

    #[test]
    fn full_name_reads_metadata() {
        let session = session_expiring_at(None);
        assert_eq!(session.user.full_name(), Some("Ada Lovelace"));
    }

    #[test]
    fn full_name_missing_metadata() {
        let user = User {
            id: "u".into(),
            email: None,
            user_metadata: serde_json::Value::Null,
        };
        assert_eq!(user.full_name(), None);
    }

    #[test]
    fn expiry_respects_leeway() {
        let now = Utc::now();
        let session = session_expiring_at(Some(now.timestamp() + 30));
        assert!(!session.is_expired(now, 0));
        assert!(session.is_expired(now, 60));
        assert_eq!(
            session.expires_at_utc().map(|at| at.timestamp()),
            Some(now.timestamp() + 30)
        );
    }

    #[test]
    fn session_without_expiry_never_expires() {
        let session = session_expiring_at(None);
        assert!(!session.is_expired(Utc::now(), 3600));
        assert!(session.expires_at_utc().is_none());
    }

    #[test]
    fn session_deserializes_gotrue_payload() {
        let json = r#"{
            "access_token": "jwt",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1700000000,
            "refresh_token": "r1",
            "user": {"id": "abc", "email": "x@y.z", "user_metadata": {"full_name": "X"}}
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.user.id, "abc");
        assert_eq!(session.expires_at, Some(1_700_000_000));
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
    }

    #[test]
    fn snapshot_constructors() {
        let init = AuthSnapshot::initializing();
        assert!(init.loading && !init.is_admin && init.user.is_none());
        let out = AuthSnapshot::signed_out();
        assert!(!out.loading && !out.is_admin && !out.is_signed_in());
    }

    #[test]
    fn event_kind_display() {
        assert_eq!(AuthEventKind::TokenRefreshed.to_string(), "TOKEN_REFRESHED");
    }
}
