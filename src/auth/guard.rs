//! Consumers of the auth state: route gating and navigation visibility.

use super::types::AuthSnapshot;
use serde::Serialize;

/// Login page path.
pub const LOGIN_PATH: &str = "/auth";
/// Landing page path.
pub const HOME_PATH: &str = "/";
/// Prefix shared by every back-office route.
pub const ADMIN_PREFIX: &str = "/admin";

/// Public site sections, in menu order.
pub const PUBLIC_NAV: [(&str, &str); 7] = [
    ("Home", "/"),
    ("About", "/about"),
    ("Newsletter", "/newsletter"),
    ("Archive", "/archive"),
    ("Advisors", "/advisors"),
    ("Subscribe", "/subscribe"),
    ("Contact", "/contact"),
];

/// Back-office sections, in sidebar order.
pub const ADMIN_NAV: [(&str, &str); 4] = [
    ("Dashboard", "/admin"),
    ("Articles", "/admin/articles"),
    ("Media", "/admin/media"),
    ("Users", "/admin/users"),
];

// ── Route guard ──────────────────────────────────────────────────

/// What a route requires from the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Admin,
}

impl Access {
    /// Classify a site path. Everything under `/admin` needs the admin role.
    pub fn for_path(path: &str) -> Self {
        if is_admin_path(path) {
            Self::Admin
        } else {
            Self::Public
        }
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn is_admin_path(path: &str) -> bool {
    let path = strip_query(path);
    path == ADMIN_PREFIX || path.starts_with("/admin/")
}

/// Outcome of evaluating a route guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardDecision {
    /// Resolution still running; render a spinner, decide later.
    Pending,
    Allow,
    RedirectToLogin,
    RedirectHome,
}

impl GuardDecision {
    /// Target path for redirect decisions.
    pub fn redirect_target(self) -> Option<&'static str> {
        match self {
            Self::RedirectToLogin => Some(LOGIN_PATH),
            Self::RedirectHome => Some(HOME_PATH),
            Self::Pending | Self::Allow => None,
        }
    }
}

/// Gates protected routes on `{user, is_admin, loading}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouteGuard;

impl RouteGuard {
    pub fn evaluate(snapshot: &AuthSnapshot, access: Access) -> GuardDecision {
        if access == Access::Public {
            return GuardDecision::Allow;
        }
        if snapshot.loading {
            return GuardDecision::Pending;
        }
        if snapshot.user.is_none() {
            return GuardDecision::RedirectToLogin;
        }
        if !snapshot.is_admin {
            return GuardDecision::RedirectHome;
        }
        GuardDecision::Allow
    }

    pub fn evaluate_path(snapshot: &AuthSnapshot, path: &str) -> GuardDecision {
        Self::evaluate(snapshot, Access::for_path(path))
    }
}

// ── Navigation ───────────────────────────────────────────────────

/// A link in the top navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavItem {
    pub label: &'static str,
    pub path: &'static str,
    pub active: bool,
}

/// Trailing account control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountAction {
    SignIn,
    SignOut,
}

/// Navigation bar contents for a given auth state and location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationModel {
    pub items: Vec<NavItem>,
    /// Back-office sidebar; only filled for admins inside `/admin`.
    pub sidebar: Vec<NavItem>,
    pub account: AccountAction,
}

impl NavigationModel {
    pub fn build(snapshot: &AuthSnapshot, current_path: &str) -> Self {
        let mut items: Vec<NavItem> = PUBLIC_NAV
            .iter()
            .map(|&(label, path)| NavItem {
                label,
                path,
                active: current_path == path,
            })
            .collect();

        if snapshot.is_admin {
            items.push(NavItem {
                label: "Admin",
                path: ADMIN_PREFIX,
                active: is_admin_path(current_path),
            });
        }

        let sidebar = if snapshot.is_admin && is_admin_path(current_path) {
            let current = strip_query(current_path);
            ADMIN_NAV
                .iter()
                .map(|&(label, path)| NavItem {
                    label,
                    path,
                    active: if path == ADMIN_PREFIX {
                        current == ADMIN_PREFIX
                    } else {
                        current == path || current.starts_with(&format!("{path}/"))
                    },
                })
                .collect()
        } else {
            Vec::new()
        };

        let account = if snapshot.user.is_some() {
            AccountAction::SignOut
        } else {
            AccountAction::SignIn
        };

        Self {
            items,
            sidebar,
            account,
        }
    }

    pub fn shows_admin_link(&self) -> bool {
        self.items.iter().any(|i| i.path == ADMIN_PREFIX)
    }
}
