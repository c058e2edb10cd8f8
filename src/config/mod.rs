//! Configuration loading and validation.
//!
//! Loads mailer configuration from `~/.unsend-mailer/config.toml` (or
//! `$UNSEND_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default Unsend emails endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://app.unsend.dev/api/v1/emails";

/// API keys at or below this length are reported as malformed.
const MIN_API_KEY_LEN: usize = 10;

// ── Top-level config ────────────────────────────────────────────

/// Top-level mailer configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailerConfig {
    /// Provider API credentials and endpoint (`[api]`).
    pub api: ApiConfig,
    /// Site sender identity (`[sender]`).
    pub sender: SenderConfig,
    /// Routing flags (`[delivery]`).
    pub delivery: DeliveryConfig,
    /// Email log and tracing output (`[logging]`).
    pub logging: LoggingConfig,
    /// Native fallback transport (`[native]`).
    pub native: NativeConfig,
}

impl MailerConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$UNSEND_CONFIG_PATH` or `~/.unsend-mailer/config.toml`.
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok())?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver.
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(p) = env("UNSEND_CONFIG_PATH") {
            return Ok(PathBuf::from(p));
        }
        Ok(config_dir()?.join("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids `set_var` in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("UNSEND_API_KEY") {
            self.api.api_key = Some(v);
        }
        if let Some(v) = env("UNSEND_API_ENDPOINT") {
            self.api.endpoint = v;
        }

        if let Some(v) = env("UNSEND_FROM_EMAIL") {
            self.sender.from_email = v;
        }
        if let Some(v) = env("UNSEND_FROM_NAME") {
            self.sender.from_name = v;
        }
        if let Some(v) = env("UNSEND_ADMIN_EMAIL") {
            self.sender.admin_email = v;
        }

        apply_bool(&env, "UNSEND_OVERRIDE_ENABLED", &mut self.delivery.override_enabled);
        apply_bool(&env, "UNSEND_TEST_MODE", &mut self.delivery.test_mode);
        apply_bool(&env, "UNSEND_ENABLE_LOGGING", &mut self.logging.enabled);

        if let Some(v) = env("UNSEND_LOG_DB") {
            self.logging.database = Some(PathBuf::from(v));
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: MailerConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Returns `true` when a non-blank API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api.key().is_some()
    }

    /// Human-readable problems with the current settings.
    ///
    /// An empty list means the configuration is usable as-is.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.delivery.override_enabled {
            if self.api.endpoint.trim().is_empty() {
                errors.push("API endpoint is required when email override is enabled.".to_owned());
            }
            if !self.has_api_key() {
                errors.push("API key is required when email override is enabled.".to_owned());
            }
        }

        let endpoint = self.api.endpoint.trim();
        if !endpoint.is_empty() && url::Url::parse(endpoint).is_err() {
            errors.push("API endpoint must be a valid URL.".to_owned());
        }

        if let Some(key) = self.api.key() {
            if key.chars().count() <= MIN_API_KEY_LEN {
                errors.push("API key format appears to be invalid.".to_owned());
            }
        }

        let from = self.sender.from_email.trim();
        if !from.is_empty() && lettre::Address::from_str(from).is_err() {
            errors.push("From email address is not valid.".to_owned());
        }

        errors
    }

    /// Resolve the email log database path (`[logging].database` or the default).
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn log_database_path(&self) -> Result<PathBuf> {
        match &self.logging.database {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("email_logs.db")),
        }
    }
}

fn apply_bool(env: &impl Fn(&str) -> Option<String>, key: &'static str, target: &mut bool) {
    let Some(v) = env(key) else {
        return;
    };
    match parse_flag(&v) {
        Some(flag) => *target = flag,
        None => tracing::warn!(var = key, value = %v, "ignoring invalid env override"),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

// ── API config ──────────────────────────────────────────────────

/// Provider endpoint and credentials.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Emails endpoint URL.
    pub endpoint: String,
    /// Bearer API key.
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl ApiConfig {
    /// The API key, if one is set and non-blank.
    pub fn key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "__REDACTED__"))
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_API_ENDPOINT.to_owned(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

// ── Sender config ───────────────────────────────────────────────

/// Default sender identity for the site.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Default From address.
    pub from_email: String,
    /// Default From display name.
    pub from_name: String,
    /// Site administrator address (target of connection tests).
    pub admin_email: String,
    /// Site charset used when a message does not declare one.
    pub charset: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            from_email: String::new(),
            from_name: String::new(),
            admin_email: String::new(),
            charset: "UTF-8".to_owned(),
        }
    }
}

// ── Delivery config ─────────────────────────────────────────────

/// Routing flags consulted by the dispatch policy.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Route outbound mail through the provider.
    pub override_enabled: bool,
    /// Fall back to native delivery when the provider fails.
    pub test_mode: bool,
}

// ── Logging config ──────────────────────────────────────────────

/// Email log store and tracing output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Record every provider attempt in the email log.
    pub enabled: bool,
    /// SQLite database path for the email log.
    pub database: Option<PathBuf>,
    /// Directory for rotated JSON trace files; console only when unset.
    pub log_dir: Option<PathBuf>,
    /// Default age in days used by `logs purge`.
    pub retention_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: None,
            log_dir: None,
            retention_days: 30,
        }
    }
}

// ── Native config ───────────────────────────────────────────────

/// Native (sendmail) fallback settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Sendmail-compatible binary; the system default when unset.
    pub sendmail_command: Option<String>,
}

/// Resolve the default config directory (`~/.unsend-mailer/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".unsend-mailer"))
}
