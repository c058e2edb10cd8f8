//! CSV export.

use unsend_mailer::store::{logs_to_csv, EmailLogStore, LogFilter, LogStatus, NewLogEntry};

#[tokio::test]
async fn export_has_header_and_quotes_fields() {
    let store = EmailLogStore::in_memory().await.expect("store");
    store
        .record(&NewLogEntry {
            provider_id: "abc123".to_owned(),
            to_email: "a@x.com,b@x.com".to_owned(),
            from_email: "noreply@site.com".to_owned(),
            subject: "Hello, \"world\"".to_owned(),
            status: LogStatus::Sent,
            response: r#"{"emailId":"abc123"}"#.to_owned(),
        })
        .await
        .expect("record");

    let csv = store.export_csv(&LogFilter::default()).await.expect("export");
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("ID,Email ID,To,From,Subject,Status,Response,Created At,Updated At")
    );
    let row = lines.next().expect("data row");
    assert!(row.starts_with("1,abc123,\"a@x.com,b@x.com\",noreply@site.com,"));
    assert!(row.contains("\"Hello, \"\"world\"\"\""));
    assert!(row.contains(",sent,"));
    assert!(row.contains("\"{\"\"emailId\"\":\"\"abc123\"\"}\""));
    assert_eq!(lines.next(), None);
}

#[test]
fn no_rows_export_as_empty_string() {
    assert_eq!(logs_to_csv(&[]).expect("export"), "");
}
