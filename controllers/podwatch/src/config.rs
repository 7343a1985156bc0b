//! Controller configuration, loaded from environment variables.

use crate::error::ControllerError;
use informer::{InformerConfig, ResyncPolicy};
use resource_client::ListFilter;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Namespace value meaning "all namespaces".
pub const ALL_NAMESPACES: &str = "*";

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_FIELD_SELECTOR: &str = "status.phase=Running";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Runtime settings for the pod watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Field selector passed to the API server
    pub field_selector: Option<String>,
    /// Label selector passed to the API server
    pub label_selector: Option<String>,
    /// Resync period; zero disables resync
    pub resync_period: Duration,
    /// What a resync does
    pub resync_policy: ResyncPolicy,
    /// Upper bound on waiting for the initial sync; `None` waits until stopped
    pub sync_timeout: Option<Duration>,
    /// Number of queue workers
    pub workers: usize,
    /// Probe and metrics listen address; `None` disables the server
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: Some(DEFAULT_NAMESPACE.to_string()),
            field_selector: Some(DEFAULT_FIELD_SELECTOR.to_string()),
            label_selector: None,
            resync_period: Duration::ZERO,
            resync_policy: ResyncPolicy::ReplayAll,
            sync_timeout: None,
            workers: 1,
            metrics_addr: SocketAddr::from_str(DEFAULT_METRICS_ADDR).ok(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from `lookup`, which maps variable names to values.
    ///
    /// Unset variables keep their defaults. An empty `FIELD_SELECTOR` disables
    /// field filtering; an empty `METRICS_ADDR` disables the probe server.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let mut config = Self::default();

        if let Some(namespace) = lookup("WATCH_NAMESPACE") {
            let namespace = namespace.trim();
            config.namespace = match namespace {
                "" | ALL_NAMESPACES => None,
                namespace => Some(namespace.to_string()),
            };
        }
        if let Some(selector) = lookup("FIELD_SELECTOR") {
            config.field_selector = non_empty(selector);
        }
        if let Some(selector) = lookup("LABEL_SELECTOR") {
            config.label_selector = non_empty(selector);
        }
        if let Some(seconds) = lookup("RESYNC_INTERVAL_SECONDS") {
            config.resync_period = Duration::from_secs(parse("RESYNC_INTERVAL_SECONDS", &seconds)?);
        }
        if let Some(policy) = lookup("RESYNC_POLICY") {
            config.resync_policy = match policy.trim() {
                "replay-all" => ResyncPolicy::ReplayAll,
                "changed-only" => ResyncPolicy::ChangedOnly,
                other => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "RESYNC_POLICY must be `replay-all` or `changed-only`, got {other:?}"
                    )));
                }
            };
        }
        if let Some(seconds) = lookup("SYNC_TIMEOUT_SECONDS") {
            let seconds: u64 = parse("SYNC_TIMEOUT_SECONDS", &seconds)?;
            config.sync_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }
        if let Some(workers) = lookup("WORKERS") {
            config.workers = parse("WORKERS", &workers)?;
        }
        if let Some(addr) = lookup("METRICS_ADDR") {
            config.metrics_addr = match non_empty(addr) {
                Some(addr) => Some(parse("METRICS_ADDR", &addr)?),
                None => None,
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Check settings that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKERS must be at least 1".to_string(),
            ));
        }
        self.list_filter()
            .validate()
            .map_err(|e| ControllerError::InvalidConfig(e.to_string()))
    }

    /// Which pods to mirror.
    #[must_use]
    pub fn list_filter(&self) -> ListFilter {
        ListFilter {
            namespace: self.namespace.clone(),
            field_selector: self.field_selector.clone(),
            label_selector: self.label_selector.clone(),
        }
    }

    /// Settings for the local mirror.
    #[must_use]
    pub fn informer_config(&self) -> InformerConfig {
        InformerConfig::new(self.list_filter()).with_resync(self.resync_period, self.resync_policy)
    }

    /// Log the effective configuration.
    pub fn log(&self) {
        info!("Configuration:");
        info!(
            "  Namespace: {}",
            self.namespace.as_deref().unwrap_or("all namespaces")
        );
        info!(
            "  Field selector: {}",
            self.field_selector.as_deref().unwrap_or("none")
        );
        info!(
            "  Label selector: {}",
            self.label_selector.as_deref().unwrap_or("none")
        );
        if self.resync_period.is_zero() {
            info!("  Resync: disabled");
        } else {
            info!(
                "  Resync: every {:?} ({:?})",
                self.resync_period, self.resync_policy
            );
        }
        match self.sync_timeout {
            Some(timeout) => info!("  Sync timeout: {:?}", timeout),
            None => info!("  Sync timeout: none"),
        }
        info!("  Workers: {}", self.workers);
        match self.metrics_addr {
            Some(addr) => info!("  Metrics address: {}", addr),
            None => info!("  Metrics address: disabled"),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse<T>(name: &str, value: &str) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{name}={value:?}: {e}")))
}
