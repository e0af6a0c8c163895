//! Application configuration.
//!
//! Loaded from `config.toml` in the platform config directory (or an
//! explicit path), then overridden by environment variables:
//!
//! ```toml
//! [supabase]
//! url = "https://xxxx.supabase.co"
//! anon_key = "eyJ..."
//!
//! [auth]
//! site_url = "https://metapoint.example"
//! role_check_timeout_ms = 5000
//! sign_in_settle_ms = 500
//! # session_file = "/path/to/session.json"
//! ```

use crate::auth::context::{AuthSettings, DEFAULT_SIGN_IN_SETTLE};
use crate::auth::roles::DEFAULT_ROLE_CHECK_TIMEOUT;
use crate::integrations::supabase::SupabaseConfig;
use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const SESSION_FILE: &str = "session.json";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub supabase: SupabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// `[auth]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Public site origin; verification emails redirect to `<site_url>/`.
    pub site_url: String,
    pub role_check_timeout_ms: u64,
    pub sign_in_settle_ms: u64,
    /// Where the signed-in session is kept between runs.
    pub session_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            site_url: "http://localhost:8080".into(),
            role_check_timeout_ms: DEFAULT_ROLE_CHECK_TIMEOUT.as_millis() as u64,
            sign_in_settle_ms: DEFAULT_SIGN_IN_SETTLE.as_millis() as u64,
            session_file: None,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "metapoint", "metapoint-auth")
}

impl AppConfig {
    /// Platform default location of `config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|d| d.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location if it exists, then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(default) => Self::from_file(&default)?,
                None => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Override fields from `SUPABASE_URL`, `SUPABASE_ANON_KEY` and
    /// `METAPOINT_SITE_URL`. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("SUPABASE_URL") {
            self.supabase.url = url;
        }
        if let Some(key) = get("SUPABASE_ANON_KEY") {
            self.supabase.anon_key = key;
        }
        if let Some(site) = get("METAPOINT_SITE_URL") {
            self.auth.site_url = site;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.supabase.url.trim().is_empty() {
            bail!("supabase.url is not set (config file or SUPABASE_URL)");
        }
        if !self.supabase.url.starts_with("http://") && !self.supabase.url.starts_with("https://")
        {
            bail!("supabase.url must be an http(s) URL: {}", self.supabase.url);
        }
        if self.supabase.anon_key.trim().is_empty() {
            bail!("supabase.anon_key is not set (config file or SUPABASE_ANON_KEY)");
        }
        if self.auth.role_check_timeout_ms == 0 {
            bail!("auth.role_check_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn role_check_timeout(&self) -> Duration {
        Duration::from_millis(self.auth.role_check_timeout_ms)
    }

    /// Explicit session file, else `session.json` in the platform data dir.
    pub fn session_file(&self) -> Option<PathBuf> {
        self.auth
            .session_file
            .clone()
            .or_else(|| project_dirs().map(|d| d.data_dir().join(SESSION_FILE)))
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            site_url: self.auth.site_url.clone(),
            sign_in_settle: Duration::from_millis(self.auth.sign_in_settle_ms),
        }
    }
}
