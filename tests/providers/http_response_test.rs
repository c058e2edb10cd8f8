//! Error body sanitization.

use unsend_mailer::providers::sanitize_http_error_body;

#[test]
fn redacts_configured_key_and_token_like_values() {
    let body = "key us_abcdefghijklmnopqrstu rejected; Authorization: Bearer abcdefghijklmnop";
    let cleaned = sanitize_http_error_body(body, &["my-secret"]);
    assert!(!cleaned.contains("us_abcdefghijklmnopqrstu"));
    assert!(!cleaned.contains("abcdefghijklmnop"));
    assert!(cleaned.contains("[REDACTED]"));

    let cleaned = sanitize_http_error_body("bad my-secret here", &["my-secret"]);
    assert_eq!(cleaned, "bad [REDACTED] here");
}

#[test]
fn truncates_long_bodies() {
    let cleaned = sanitize_http_error_body(&"x".repeat(400), &[]);
    assert!(cleaned.ends_with("...[truncated]"));
    assert_eq!(cleaned.chars().count(), 256 + "...[truncated]".len());
}

#[test]
fn blank_secrets_are_ignored() {
    assert_eq!(sanitize_http_error_body("a  b", &["", "  "]), "a b");
}
