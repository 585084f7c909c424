//! Live runtime configuration.
//!
//! [`CoreConfig`] is the plain, serde-loadable configuration.  It is shared
//! through a [`ConfigHandle`], which lets the host swap configuration at
//! runtime.  Capability modules never snapshot values at startup: limits are
//! read through [`ConfigHandle::supplier`] closures on every admission
//! decision, so a change takes effect on the next request.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// The default user agent sent with HTTP requests.
pub const DEFAULT_USER_AGENT: &str = concat!("tinker/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Configuration types
// ---------------------------------------------------------------------------

/// Top-level configuration for a Tinker host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub computer: ComputerConfig,
    pub http: HttpConfig,
}

/// Limits applied to every computer's script engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputerConfig {
    /// Time a computer may run without yielding before it is soft-aborted.
    pub timeout_ms: u64,
    /// Additional time after a soft abort before the computer is hard-aborted.
    pub abort_timeout_ms: u64,
    /// Identifies this host to running programs.
    pub host_string: String,
}

impl Default for ComputerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 7_000,
            abort_timeout_ms: 1_500,
            host_string: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl ComputerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn abort_timeout(&self) -> Duration {
        Duration::from_millis(self.abort_timeout_ms)
    }
}

/// Settings for the `http` API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whether the `http` API is installed at all.
    pub enabled: bool,
    /// Whether `http.websocket` may open connections.
    pub websocket_enabled: bool,
    /// Concurrent HTTP requests per computer (0 = unlimited).
    pub max_requests: usize,
    /// Requests that may wait for a free slot before new ones are rejected.
    pub max_queued_requests: usize,
    /// Concurrently open websockets per computer (0 = unlimited).
    pub max_websockets: usize,
    /// Sent as `User-Agent` when the program does not supply one.
    pub user_agent: String,
    /// Address rules, first match wins.
    pub rules: Vec<AddressRuleConfig>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            websocket_enabled: true,
            max_requests: 16,
            max_queued_requests: 512,
            max_websockets: 4,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            rules: AddressRuleConfig::defaults(),
        }
    }
}

/// Whether matching hosts may be contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
}

/// One entry of the `[[http.rules]]` list.
///
/// Options left unset fall through to the next matching rule, and finally to
/// the built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRuleConfig {
    /// `*`, `$private`, an exact host, or a `*.suffix` pattern.
    pub host: String,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_download: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_upload: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_message: Option<u64>,
}

impl AddressRuleConfig {
    /// A rule with no options set.
    pub fn new(host: impl Into<String>, action: RuleAction) -> Self {
        Self {
            host: host.into(),
            action,
            max_download: None,
            max_upload: None,
            timeout_ms: None,
            websocket_message: None,
        }
    }

    /// Deny private addresses, allow everything else.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("$private", RuleAction::Deny),
            Self::new("*", RuleAction::Allow),
        ]
    }
}

impl CoreConfig {
    /// Parse a configuration from TOML text, validating the result.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Reject values that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.computer.timeout_ms == 0 {
            return Err(KernelError::Config {
                reason: "computer.timeout_ms must be greater than zero".into(),
            });
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(KernelError::Config {
                reason: "http.user_agent must not be empty".into(),
            });
        }
        if let Some(rule) = self.http.rules.iter().find(|r| r.host.trim().is_empty()) {
            return Err(KernelError::Config {
                reason: format!("http rule with action {:?} has an empty host", rule.action),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Live handle
// ---------------------------------------------------------------------------

/// A read fresh on every call.
pub type Supplier<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Shared, swappable configuration.
///
/// The handle is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<CoreConfig>>,
}

impl ConfigHandle {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// A snapshot of the current configuration.
    pub fn get(&self) -> CoreConfig {
        self.read(Clone::clone)
    }

    /// Run `f` against the current configuration without cloning it.
    pub fn read<T>(&self, f: impl FnOnce(&CoreConfig) -> T) -> T {
        match self.inner.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Replace the whole configuration.
    pub fn replace(&self, config: CoreConfig) {
        self.update(|current| *current = config);
    }

    /// Modify the configuration in place.
    pub fn update(&self, f: impl FnOnce(&mut CoreConfig)) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
        tracing::debug!("configuration updated");
    }

    /// A closure that reads one value from the live configuration.
    pub fn supplier<T, F>(&self, f: F) -> Supplier<T>
    where
        F: Fn(&CoreConfig) -> T + Send + Sync + 'static,
    {
        let handle = self.clone();
        Arc::new(move || handle.read(&f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.computer.timeout_ms, 7_000);
        assert_eq!(cfg.computer.abort_timeout_ms, 1_500);
        assert!(cfg.http.enabled);
        assert!(cfg.http.websocket_enabled);
        assert_eq!(cfg.http.max_requests, 16);
        assert_eq!(cfg.http.max_queued_requests, 512);
        assert_eq!(cfg.http.max_websockets, 4);
        assert_eq!(cfg.http.rules.len(), 2);
        assert_eq!(cfg.http.rules[0].host, "$private");
        assert_eq!(cfg.http.rules[0].action, RuleAction::Deny);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = CoreConfig::from_toml_str(
            r#"
            [http]
            websocket_enabled = false
            max_requests = 2
            "#,
        )
        .expect("parse");
        assert!(!cfg.http.websocket_enabled);
        assert_eq!(cfg.http.max_requests, 2);
        assert_eq!(cfg.http.max_websockets, 4);
        assert_eq!(cfg.computer.timeout_ms, 7_000);
    }

    #[test]
    fn rules_parse_with_options() {
        let cfg = CoreConfig::from_toml_str(
            r#"
            [[http.rules]]
            host = "*.example.com"
            action = "allow"
            max_download = 1024

            [[http.rules]]
            host = "*"
            action = "deny"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.http.rules.len(), 2);
        assert_eq!(cfg.http.rules[0].max_download, Some(1024));
        assert_eq!(cfg.http.rules[1].action, RuleAction::Deny);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let result = CoreConfig::from_toml_str("[computer]\ntimeout_ms = 0\n");
        assert!(matches!(result, Err(KernelError::Config { .. })));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let result = CoreConfig::from_toml_str("[http\n");
        assert!(matches!(result, Err(KernelError::Toml(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tinker.toml");
        std::fs::write(&path, "[http]\nmax_websockets = 9\n").expect("write");

        let cfg = CoreConfig::load(&path).expect("load");
        assert_eq!(cfg.http.max_websockets, 9);
    }

    #[test]
    fn supplier_sees_updates() {
        let handle = ConfigHandle::new(CoreConfig::default());
        let limit = handle.supplier(|c| c.http.max_requests);
        assert_eq!(limit(), 16);

        handle.update(|c| c.http.max_requests = 3);
        assert_eq!(limit(), 3);

        let mut replacement = CoreConfig::default();
        replacement.http.max_requests = 7;
        handle.replace(replacement);
        assert_eq!(limit(), 7);
    }
}
