//! Coverage for config parsing, env overrides and validation.

use std::collections::HashMap;

use unsend_mailer::config::{config_dir, MailerConfig, DEFAULT_API_ENDPOINT};

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn defaults() {
    let config = MailerConfig::default();
    assert_eq!(config.api.endpoint, DEFAULT_API_ENDPOINT);
    assert_eq!(config.api.timeout_seconds, 30);
    assert!(config.api.api_key.is_none());
    assert!(!config.delivery.override_enabled);
    assert!(!config.delivery.test_mode);
    assert!(config.logging.enabled);
    assert_eq!(config.logging.retention_days, 30);
    assert_eq!(config.sender.charset, "UTF-8");
}

#[test]
fn config_dir_resolves() {
    let dir = config_dir().expect("config dir should resolve");
    assert!(dir.ends_with(".unsend-mailer"));
}

#[test]
fn parse_full_config() {
    let toml_str = r#"
[api]
endpoint = "https://mail.example.com/api/v1/emails"
api_key = "us_live_abcdefghijkl"
timeout_seconds = 10

[sender]
from_email = "noreply@site.com"
from_name = "My Site"
admin_email = "admin@site.com"

[delivery]
override_enabled = true
test_mode = true

[logging]
enabled = false
database = "/var/lib/unsend/logs.db"

[native]
sendmail_command = "/usr/sbin/sendmail"
"#;
    let config = MailerConfig::from_toml(toml_str).expect("config should parse");
    assert_eq!(config.api.endpoint, "https://mail.example.com/api/v1/emails");
    assert_eq!(config.api.key(), Some("us_live_abcdefghijkl"));
    assert_eq!(config.api.timeout_seconds, 10);
    assert_eq!(config.sender.from_name, "My Site");
    assert!(config.delivery.override_enabled);
    assert!(config.delivery.test_mode);
    assert!(!config.logging.enabled);
    assert_eq!(
        config.native.sendmail_command.as_deref(),
        Some("/usr/sbin/sendmail")
    );
    assert!(config.validation_errors().is_empty());
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(MailerConfig::from_toml("[api\nendpoint=").is_err());
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = MailerConfig::load_from(&dir.path().join("absent.toml")).expect("defaults");
    assert_eq!(config.api.endpoint, DEFAULT_API_ENDPOINT);
}

#[test]
fn file_is_loaded_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[sender]\nfrom_email = \"file@site.com\"\n").expect("write");
    let config = MailerConfig::load_from(&path).expect("load");
    assert_eq!(config.sender.from_email, "file@site.com");
}

#[test]
fn env_overrides_take_precedence() {
    let mut config =
        MailerConfig::from_toml("[sender]\nfrom_email = \"file@site.com\"\n").expect("parse");
    config.apply_overrides(env(&[
        ("UNSEND_API_KEY", "us_env_key_123456"),
        ("UNSEND_API_ENDPOINT", "https://env.example.com/emails"),
        ("UNSEND_FROM_EMAIL", "env@site.com"),
        ("UNSEND_FROM_NAME", "Env Site"),
        ("UNSEND_ADMIN_EMAIL", "ops@site.com"),
        ("UNSEND_OVERRIDE_ENABLED", "true"),
        ("UNSEND_TEST_MODE", "1"),
        ("UNSEND_ENABLE_LOGGING", "off"),
        ("UNSEND_LOG_DB", "/tmp/logs.db"),
    ]));
    assert_eq!(config.api.key(), Some("us_env_key_123456"));
    assert_eq!(config.api.endpoint, "https://env.example.com/emails");
    assert_eq!(config.sender.from_email, "env@site.com");
    assert_eq!(config.sender.from_name, "Env Site");
    assert_eq!(config.sender.admin_email, "ops@site.com");
    assert!(config.delivery.override_enabled);
    assert!(config.delivery.test_mode);
    assert!(!config.logging.enabled);
    assert_eq!(
        config.log_database_path().expect("path"),
        std::path::PathBuf::from("/tmp/logs.db")
    );
}

#[test]
fn invalid_flag_override_is_ignored() {
    let mut config = MailerConfig::default();
    config.apply_overrides(env(&[("UNSEND_ENABLE_LOGGING", "sometimes")]));
    assert!(config.logging.enabled);
}

#[test]
fn override_requires_key_and_endpoint() {
    let mut config = MailerConfig::default();
    config.delivery.override_enabled = true;
    config.api.endpoint = String::new();
    let errors = config.validation_errors();
    assert!(errors.iter().any(|e| e.contains("API endpoint is required")));
    assert!(errors.iter().any(|e| e.contains("API key is required")));
}

#[test]
fn validation_flags_bad_values() {
    let mut config = MailerConfig::default();
    config.api.endpoint = "not a url".to_owned();
    config.api.api_key = Some("short".to_owned());
    config.sender.from_email = "nobody".to_owned();
    let errors = config.validation_errors();
    assert_eq!(errors.len(), 3, "{errors:?}");
}

#[test]
fn debug_redacts_api_key() {
    let mut config = MailerConfig::default();
    config.api.api_key = Some("us_secret_value_999".to_owned());
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("us_secret_value_999"));
    assert!(rendered.contains("__REDACTED__"));
}
