//! Error taxonomy for the auth layer.

/// Generic notice shown for anything that is not a credential error.
pub const UNEXPECTED_ERROR_NOTICE: &str = "An unexpected error occurred";

/// Notice shown when sign-up hits an existing account.
pub const ALREADY_REGISTERED_NOTICE: &str =
    "This email is already registered. Please sign in instead.";

/// Errors from the session source, the role store, or the state machine.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Wrong password, unknown email, unconfirmed account, weak password.
    #[error("{0}")]
    InvalidCredentials(String),

    /// Sign-up for an email that already has an account.
    #[error("email is already registered")]
    AlreadyRegistered,

    /// The role table could not be queried.
    #[error("role query failed: {0}")]
    RoleQuery(String),

    /// The backend answered with a non-2xx status.
    #[error("backend error ({status}): {message}")]
    Backend {
        /// HTTP status code.
        status: u16,
        /// Message parsed from the error body.
        message: String,
    },

    /// An operation needed a session but none is active.
    #[error("no active session")]
    NoSession,

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("session persistence failed: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Whether this is a user-facing credential problem (as opposed to an
    /// infrastructure failure).
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Self::InvalidCredentials(_) | Self::AlreadyRegistered)
    }

    /// Text to show the end user for this error.
    pub fn notice(&self) -> String {
        match self {
            Self::InvalidCredentials(msg) => msg.clone(),
            Self::AlreadyRegistered => ALREADY_REGISTERED_NOTICE.to_string(),
            Self::Backend { message, .. } if !message.is_empty() => message.clone(),
            _ => UNEXPECTED_ERROR_NOTICE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_errors_surface_backend_text() {
        let err = AuthError::InvalidCredentials("Invalid login credentials".into());
        assert!(err.is_credential_error());
        assert_eq!(err.notice(), "Invalid login credentials");
    }

    #[test]
    fn already_registered_has_friendly_notice() {
        assert_eq!(AuthError::AlreadyRegistered.notice(), ALREADY_REGISTERED_NOTICE);
    }

    #[test]
    fn infrastructure_errors_map_to_generic_notice() {
        let err = AuthError::RoleQuery("timeout".into());
        assert!(!err.is_credential_error());
        assert_eq!(err.notice(), UNEXPECTED_ERROR_NOTICE);
        assert_eq!(AuthError::NoSession.notice(), UNEXPECTED_ERROR_NOTICE);
    }

    #[test]
    fn backend_error_display() {
        let err = AuthError::Backend {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "backend error (500): boom");
        assert_eq!(err.notice(), "boom");
    }
}
