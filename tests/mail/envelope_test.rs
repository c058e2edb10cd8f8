//! Envelope normalization from raw mail requests.

use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use unsend_mailer::mail::{
    is_html, AttachmentSpec, ContentType, Envelope, EnvelopeBuilder, MailRequest, Recipients,
    SenderDefaults,
};

fn builder() -> EnvelopeBuilder {
    EnvelopeBuilder::new(SenderDefaults {
        from_email: "noreply@site.com".to_owned(),
        from_name: "My Site".to_owned(),
        charset: "UTF-8".to_owned(),
    })
}

#[test]
fn joined_and_list_recipients_normalize_identically() {
    let joined = Recipients::from(" a@x.com, b@x.com ,, a@x.com ");
    let list = Recipients::from(vec!["a@x.com", " b@x.com", ""]);
    assert_eq!(joined.normalize(), vec!["a@x.com", "b@x.com"]);
    assert_eq!(joined.normalize(), list.normalize());
}

#[tokio::test]
async fn cc_string_is_split_into_list() {
    let mut request = MailRequest::new("user@site.com", "Hi", "Hello");
    request.cc = "a@x.com, b@x.com".into();
    let envelope = builder().build(&request).await;
    assert_eq!(envelope.cc, vec!["a@x.com", "b@x.com"]);
}

#[tokio::test]
async fn header_cc_merges_with_argument_cc() {
    let mut request =
        MailRequest::new("user@site.com", "Hi", "Hello").with_headers("Cc: b@x.com, c@x.com");
    request.cc = vec!["a@x.com", "b@x.com"].into();
    let envelope = builder().build(&request).await;
    assert_eq!(envelope.cc, vec!["a@x.com", "b@x.com", "c@x.com"]);
}

#[tokio::test]
async fn defaults_fill_sender_when_headers_are_silent() {
    let envelope = builder()
        .build(&MailRequest::new("user@site.com", "Hi", "Hello"))
        .await;
    assert_eq!(envelope.from.email, "noreply@site.com");
    assert_eq!(envelope.from.header_string(), "My Site <noreply@site.com>");
    assert_eq!(envelope.charset, "UTF-8");
}

#[tokio::test]
async fn header_from_overrides_defaults() {
    let request = MailRequest::new("user@site.com", "Hi", "Hello").with_headers(
        "From: Support <help@site.com>\nContent-Type: text/plain; charset=ISO-8859-1",
    );
    let envelope = builder().build(&request).await;
    assert_eq!(envelope.from.header_string(), "Support <help@site.com>");
    assert_eq!(envelope.charset, "ISO-8859-1");
}

#[tokio::test]
async fn html_header_with_markup_body_is_html() {
    let request = MailRequest::new("user@site.com", "Hi", "<p>Hello</p>")
        .with_headers("Content-Type: text/html");
    let envelope = builder().build(&request).await;
    assert_eq!(envelope.to, vec!["user@site.com"]);
    assert_eq!(envelope.html.as_deref(), Some("<p>Hello</p>"));
    assert_eq!(envelope.text, None);
    assert_eq!(envelope.content_type, ContentType::Html);
}

#[tokio::test]
async fn html_header_forces_html_without_markup() {
    let request = MailRequest::new("user@site.com", "Hi", "Just words")
        .with_headers("Content-Type: text/html");
    let envelope = builder().build(&request).await;
    assert_eq!(envelope.html.as_deref(), Some("Just words"));
    assert_eq!(envelope.text, None);
    assert_eq!(envelope.content_type, ContentType::Html);
}

#[test]
fn tag_detection_needs_a_closed_tag() {
    assert!(is_html("Hello <b>there</b>"));
    assert!(is_html("<!DOCTYPE html>"));
    assert!(is_html("line</p>"));
    assert!(!is_html("Hello <b"));
    assert!(!is_html("2 < 3 and 4 > 1"));
}

#[tokio::test]
async fn markup_is_detected_without_header() {
    let envelope = builder()
        .build(&MailRequest::new("user@site.com", "Hi", "Hello <b>there</b>"))
        .await;
    assert_eq!(envelope.content_type, ContentType::Html);
    assert!(envelope.html.is_some());
}

#[tokio::test]
async fn plain_message_is_text() {
    let envelope = builder()
        .build(&MailRequest::new("user@site.com", "Hi", "2 < 3 and 4 > 1"))
        .await;
    assert_eq!(envelope.text.as_deref(), Some("2 < 3 and 4 > 1"));
    assert_eq!(envelope.html, None);
    assert_eq!(envelope.content_type, ContentType::Text);
}

#[tokio::test]
async fn explicit_bodies_win_over_message() {
    let mut request = MailRequest::new("user@site.com", "Hi", "<p>ignored</p>");
    request.text = Some("plain".to_owned());
    request.html = Some("<p>rich</p>".to_owned());
    let envelope = builder().build(&request).await;
    assert_eq!(envelope.text.as_deref(), Some("plain"));
    assert_eq!(envelope.html.as_deref(), Some("<p>rich</p>"));
}

#[tokio::test]
async fn attachments_are_encoded_and_missing_paths_dropped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("report.txt");
    let mut file = std::fs::File::create(&path).expect("create");
    file.write_all(b"hello").expect("write");

    let request = MailRequest::new("user@site.com", "Hi", "See attached")
        .with_attachment(AttachmentSpec::Path(path.clone()))
        .with_attachment(AttachmentSpec::Path(dir.path().join("missing.pdf")))
        .with_attachment(AttachmentSpec::File {
            path,
            name: Some("renamed.txt".to_owned()),
        })
        .with_attachment(AttachmentSpec::Inline {
            filename: "inline.bin".to_owned(),
            content: vec![1, 2, 3],
        });
    let envelope = builder().build(&request).await;

    let names: Vec<_> = envelope
        .attachments
        .iter()
        .map(|a| a.filename.as_str())
        .collect();
    assert_eq!(names, vec!["report.txt", "renamed.txt", "inline.bin"]);
    assert_eq!(envelope.attachments[0].content, BASE64.encode(b"hello"));
    assert_eq!(envelope.attachments[2].content, BASE64.encode([1_u8, 2, 3]));
}

#[tokio::test]
async fn transforms_run_in_registration_order() {
    let builder = builder()
        .with_transform(|mut env: Envelope| {
            env.template_id = Some("welcome".to_owned());
            env.subject.push_str(" one");
            env
        })
        .with_transform(|mut env: Envelope| {
            env.subject.push_str(" two");
            env.variables.insert("name".to_owned(), "Ada".to_owned());
            env
        });
    assert_eq!(builder.transform_count(), 2);

    let envelope = builder
        .build(&MailRequest::new("user@site.com", "Hi", "Hello"))
        .await;
    assert_eq!(envelope.subject, "Hi one two");
    assert_eq!(envelope.template_id.as_deref(), Some("welcome"));
    assert_eq!(envelope.variables.get("name").map(String::as_str), Some("Ada"));
}

#[tokio::test]
async fn normalize_skips_transforms() {
    let builder = builder().with_transform(|mut env: Envelope| {
        env.subject = "changed".to_owned();
        env
    });
    let envelope = builder
        .normalize(&MailRequest::new("user@site.com", "Hi", "Hello"))
        .await;
    assert_eq!(envelope.subject, "Hi");
}
