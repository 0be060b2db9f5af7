//! Session provider: access token, login, and service environment.
//!
//! The workflow only needs three things from a session: the current token
//! (empty when signed out), a way to start a login, and which service
//! environment to talk to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::app_data::publisher_data;
use crate::config::Config;

/// Environment variable that overrides the configured access token
pub const TOKEN_ENV_VAR: &str = "PUBLISHER_ACCESS_TOKEN";

/// Publishing service environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Staging,
    Dev,
}

impl Environment {
    /// API base URL for this environment
    pub fn base_url(&self) -> &'static str {
        publisher_data().api.base_urls.for_env(*self)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Staging => write!(f, "staging"),
            Self::Dev => write!(f, "dev"),
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "dev" => Ok(Self::Dev),
            other => anyhow::bail!(
                "Unknown environment '{}' (expected production, staging or dev)",
                other
            ),
        }
    }
}

/// Source of credentials for the publishing service
pub trait Session: Send + Sync {
    /// Current access token; empty when not signed in
    fn access_token(&self) -> String;

    /// Start an interactive login
    fn begin_login(&self);

    fn environment(&self) -> Environment;
}

/// Session backed by the user configuration file and environment.
///
/// The token is re-read on every call so a login completed in another
/// process is noticed by the login-wait loop.
pub struct ConfigSession {
    environment: Environment,
}

impl ConfigSession {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    /// Session for the configured environment
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.session.environment)
    }
}

impl Session for ConfigSession {
    fn access_token(&self) -> String {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            let token = token.trim();
            if !token.is_empty() {
                return token.to_string();
            }
        }

        match Config::load() {
            Ok(config) => config.session.access_token.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to read access token from config: {}", e);
                String::new()
            }
        }
    }

    fn begin_login(&self) {
        let url = publisher_data().api.login_urls.for_env(self.environment);
        tracing::info!("Opening login page: {}", url);
        if let Err(e) = open::that(url) {
            tracing::warn!("Failed to open browser for login: {}", e);
        }
    }

    fn environment(&self) -> Environment {
        self.environment
    }
}
