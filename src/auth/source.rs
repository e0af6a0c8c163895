//! Backend session source abstraction.
//!
//! The production implementation is [`crate::integrations::supabase::SupabaseClient`];
//! tests use [`crate::testing::MemorySessionSource`].

use super::error::AuthError;
use super::types::{AuthEvent, Session, SignUpRequest};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Capacity of the auth event channel. Slow listeners that fall this far
/// behind only lose intermediate events; the latest session is re-fetched.
pub const AUTH_EVENT_CAPACITY: usize = 64;

/// Holds the current credential and emits session-changed events.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Subscribe to session-changed events.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// The currently held session, if any.
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Exchange email and password for a session. Emits `SignedIn` on success.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError>;

    /// Create an account. Does not establish a session.
    async fn sign_up(&self, request: &SignUpRequest) -> Result<(), AuthError>;

    /// Drop the current session. Emits `SignedOut`.
    async fn sign_out(&self) -> Result<(), AuthError>;
}
