//! Role resolution against the `user_roles` table.
//!
//! A user is an admin iff their role set intersects [`ELEVATED_ROLES`].
//! The answer is recomputed by re-querying every time and fails closed:
//! any query error or timeout resolves to "not an admin".

use super::error::AuthError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Roles that unlock the admin back-office.
pub const ELEVATED_ROLES: [&str; 2] = ["admin", "superadmin"];

/// Role granted and revoked from the Users admin page.
pub const ADMIN_ROLE: &str = "admin";

/// Default bound on a single role query.
pub const DEFAULT_ROLE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub fn is_elevated(role: &str) -> bool {
    ELEVATED_ROLES.contains(&role)
}

/// Read/write access to role assignments.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Roles held by `user_id`, restricted to `filter`.
    async fn roles_for_user(&self, user_id: &str, filter: &[&str])
        -> Result<Vec<String>, AuthError>;

    async fn grant_role(&self, user_id: &str, role: &str) -> Result<(), AuthError>;

    async fn revoke_role(&self, user_id: &str, role: &str) -> Result<(), AuthError>;
}

/// Answers "does this user hold an elevated role?".
#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn RoleStore>,
    timeout: Duration,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn RoleStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Query the elevated roles for `user_id`, bounded by the configured timeout.
    pub async fn has_elevated_role(&self, user_id: &str) -> Result<bool, AuthError> {
        let query = self.store.roles_for_user(user_id, &ELEVATED_ROLES);
        let roles = tokio::time::timeout(self.timeout, query)
            .await
            .map_err(|_| {
                AuthError::RoleQuery(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })??;

        // The filter is applied server-side too; re-check so a store that
        // ignores it cannot elevate a plain member.
        Ok(roles.iter().any(|r| is_elevated(r)))
    }

    /// Fail-closed admin check. Never returns an error.
    pub async fn check_admin_role(&self, user_id: &str) -> bool {
        tracing::debug!(user_id, "Checking admin role");
        match self.has_elevated_role(user_id).await {
            Ok(is_admin) => {
                tracing::debug!(user_id, is_admin, "Admin role check result");
                is_admin
            }
            Err(e) => {
                tracing::warn!(user_id, "Admin role check failed, treating as non-admin: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticRoleStore;

    fn resolver(store: Arc<StaticRoleStore>) -> RoleResolver {
        RoleResolver::new(store, DEFAULT_ROLE_CHECK_TIMEOUT)
    }

    #[tokio::test]
    async fn member_role_is_not_admin() {
        let store = Arc::new(StaticRoleStore::new());
        store.set_roles("u1", &["member"]);
        assert!(!resolver(store).check_admin_role("u1").await);
    }

    #[tokio::test]
    async fn admin_and_superadmin_are_admin() {
        let store = Arc::new(StaticRoleStore::new());
        store.set_roles("a", &["admin"]);
        store.set_roles("s", &["superadmin"]);
        let resolver = resolver(store);
        assert!(resolver.check_admin_role("a").await);
        assert!(resolver.check_admin_role("s").await);
    }

    #[tokio::test]
    async fn no_rows_is_not_admin() {
        let store = Arc::new(StaticRoleStore::new());
        assert!(!resolver(store).check_admin_role("nobody").await);
    }

    #[tokio::test]
    async fn query_failure_fails_closed() {
        let store = Arc::new(StaticRoleStore::new());
        store.set_roles("a", &["admin"]);
        store.fail_queries(true);
        let resolver = resolver(store);
        assert!(resolver.has_elevated_role("a").await.is_err());
        assert!(!resolver.check_admin_role("a").await);
    }

    #[tokio::test]
    async fn timeout_fails_closed() {
        let store = Arc::new(StaticRoleStore::new());
        store.set_roles("a", &["admin"]);
        store.hold("a");
        let resolver = RoleResolver::new(store.clone(), Duration::from_millis(20));

        let err = resolver.has_elevated_role("a").await.unwrap_err();
        assert!(matches!(err, AuthError::RoleQuery(_)));
        assert!(!resolver.check_admin_role("a").await);
    }

    #[tokio::test]
    async fn unfiltered_store_cannot_elevate_member() {
        let store = Arc::new(StaticRoleStore::new().ignoring_filter());
        store.set_roles("u1", &["member", "editor"]);
        assert!(!resolver(store).check_admin_role("u1").await);
    }

    #[test]
    fn elevated_role_set() {
        assert!(is_elevated("admin"));
        assert!(is_elevated("superadmin"));
        assert!(!is_elevated("member"));
        assert!(!is_elevated("Admin"));
    }
}
