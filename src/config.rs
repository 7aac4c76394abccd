//! SDK configuration
//!
//! Built once through [`Configuration::builder`] and shared, immutable, by
//! every component of a [`crate::ProxyKit`] context.

use std::time::Duration;

use reqwest::Url;

use crate::error::{Error, Result};
use crate::logging::LogLevel;

/// Default relay endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.secureapikey.com";

/// Default connect/read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const APP_ID_PREFIX: &str = "app_";

/// Deployment environment of the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    /// Allows plain `http` relays, e.g. one running on the developer machine
    Development,
}

/// Retry behaviour of the transport for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// A policy that sends every request exactly once.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Validated SDK configuration
#[derive(Debug, Clone)]
pub struct Configuration {
    app_id: String,
    base_url: Url,
    environment: Environment,
    log_level: LogLevel,
    timeout: Duration,
    retry: RetryPolicy,
    eager_attestation: bool,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Whether setup kicks off a best-effort attestation in the background
    pub fn eager_attestation(&self) -> bool {
        self.eager_attestation
    }
}

/// Builder for [`Configuration`].
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    app_id: Option<String>,
    base_url: String,
    environment: Environment,
    log_level: LogLevel,
    timeout: Duration,
    retry: RetryPolicy,
    eager_attestation: bool,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self {
            app_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            environment: Environment::default(),
            log_level: LogLevel::default(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            eager_attestation: true,
        }
    }
}

impl ConfigurationBuilder {
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, enabled: bool, max_attempts: u32) -> Self {
        self.retry = RetryPolicy {
            enabled,
            max_attempts,
        };
        self
    }

    pub fn eager_attestation(mut self, eager: bool) -> Self {
        self.eager_attestation = eager;
        self
    }

    pub fn build(self) -> Result<Configuration> {
        let app_id = self
            .app_id
            .ok_or_else(|| Error::Configuration("App ID is required".into()))?;

        match app_id.strip_prefix(APP_ID_PREFIX) {
            Some(rest) if !rest.is_empty() => {}
            _ => {
                return Err(Error::Configuration(format!(
                    "Invalid app ID format: {app_id:?} (expected {APP_ID_PREFIX}<id>)"
                )))
            }
        }

        let base_url = Url::parse(self.base_url.trim_end_matches('/'))
            .map_err(|e| Error::Configuration(format!("Invalid base URL: {e}")))?;

        match (base_url.scheme(), self.environment) {
            ("https", _) | ("http", Environment::Development) => {}
            (scheme, _) => {
                return Err(Error::Configuration(format!(
                    "Base URL scheme {scheme:?} is not allowed in {:?}",
                    self.environment
                )))
            }
        }

        if self.timeout.is_zero() {
            return Err(Error::Configuration("timeout must be > 0".into()));
        }

        if self.retry.enabled && self.retry.max_attempts == 0 {
            return Err(Error::Configuration(
                "max_attempts must be >= 1 when retry is enabled".into(),
            ));
        }

        Ok(Configuration {
            app_id,
            base_url,
            environment: self.environment,
            log_level: self.log_level,
            timeout: self.timeout,
            retry: self.retry,
            eager_attestation: self.eager_attestation,
        })
    }
}
