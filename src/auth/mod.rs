//! Session and admin-role resolution for the Meta Point website.
//!
//! Provides:
//! - [`AuthContext`]: the session state machine (`user`, `session`,
//!   `is_admin`, `loading`) with `sign_in` / `sign_up` / `sign_out`
//! - [`RoleResolver`]: fail-closed admin check over a [`RoleStore`]
//! - [`RouteGuard`] and [`NavigationModel`]: consumers of the state
//!
//! ## Design Decisions
//! - Authentication and role storage are delegated to a backend
//!   ([`SessionSource`], [`RoleStore`]); the production implementation is
//!   [`crate::integrations::supabase::SupabaseClient`].
//! - Role results are tagged with a generation number instead of guarded by
//!   a boolean flag and a timer: a transition invalidates every result
//!   issued before it, so sign-out always wins over a pending check.
//! - State is published through a `tokio::sync::watch` channel; the
//!   internal lock is never held across an `.await`.

pub mod context;
pub mod error;
pub mod guard;
pub mod roles;
pub mod source;
pub mod types;

pub use context::{AuthContext, AuthListener, AuthSettings, RoleCheck};
pub use error::AuthError;
pub use guard::{Access, AccountAction, GuardDecision, NavItem, NavigationModel, RouteGuard};
pub use roles::{RoleResolver, RoleStore, ADMIN_ROLE, ELEVATED_ROLES};
pub use source::SessionSource;
pub use types::{AuthEvent, AuthEventKind, AuthSnapshot, Session, SignUpRequest, User};
