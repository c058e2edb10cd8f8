//! Email log persistence and queries.

use chrono::{TimeDelta, Utc};

use unsend_mailer::store::{
    timestamp, EmailLogStore, LogFilter, LogStatus, NewLogEntry, SortOrder, StatusDetail,
};

fn entry(to: &str, subject: &str, status: LogStatus) -> NewLogEntry {
    NewLogEntry {
        provider_id: String::new(),
        to_email: to.to_owned(),
        from_email: "noreply@site.com".to_owned(),
        subject: subject.to_owned(),
        status,
        response: String::new(),
    }
}

async fn backdate(store: &EmailLogStore, id: i64, days: i64) {
    let pool = store.pool().expect("enabled store has a pool");
    let at = timestamp(Utc::now() - TimeDelta::days(days));
    sqlx::query("UPDATE email_logs SET created_at = ?1 WHERE id = ?2")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await
        .expect("backdate");
}

#[tokio::test]
async fn pending_row_moves_to_sent() {
    let store = EmailLogStore::in_memory().await.expect("store");
    let id = store
        .record(&entry("user@site.com", "Hi", LogStatus::Pending))
        .await
        .expect("record")
        .expect("id");

    let updated = store
        .update_status(
            id,
            LogStatus::Sent,
            StatusDetail {
                provider_id: Some("abc123".to_owned()),
                response: Some(r#"{"emailId":"abc123"}"#.to_owned()),
            },
        )
        .await
        .expect("update");
    assert!(updated);

    let log = store.get(id).await.expect("get").expect("row");
    assert_eq!(log.status, LogStatus::Sent);
    assert_eq!(log.provider_id, "abc123");
    assert!(log.updated_at >= log.created_at);

    let by_provider = store.by_provider_id("abc123").await.expect("lookup");
    assert_eq!(by_provider.len(), 1);
    assert_eq!(by_provider[0].id, id);
}

#[tokio::test]
async fn update_keeps_fields_when_detail_is_empty() {
    let store = EmailLogStore::in_memory().await.expect("store");
    let mut new = entry("user@site.com", "Hi", LogStatus::Pending);
    new.response = "original".to_owned();
    let id = store.record(&new).await.expect("record").expect("id");

    store
        .update_status(id, LogStatus::Failed, StatusDetail::default())
        .await
        .expect("update");
    let log = store.get(id).await.expect("get").expect("row");
    assert_eq!(log.status, LogStatus::Failed);
    assert_eq!(log.response, "original");
}

#[tokio::test]
async fn update_of_unknown_row_reports_false() {
    let store = EmailLogStore::in_memory().await.expect("store");
    let updated = store
        .update_status(999, LogStatus::Sent, StatusDetail::default())
        .await
        .expect("update");
    assert!(!updated);
}

#[tokio::test]
async fn query_filters_by_status_email_and_paging() {
    let store = EmailLogStore::in_memory().await.expect("store");
    for (to, status) in [
        ("alice@site.com", LogStatus::Sent),
        ("bob@site.com", LogStatus::Failed),
        ("alice@other.com", LogStatus::Sent),
        ("carol_x@site.com", LogStatus::Pending),
    ] {
        store.record(&entry(to, "Hi", status)).await.expect("record");
    }

    let sent = store
        .query(&LogFilter {
            status: Some(LogStatus::Sent),
            ..LogFilter::default()
        })
        .await
        .expect("query");
    assert_eq!(sent.len(), 2);

    let alice = LogFilter {
        email: Some("alice".to_owned()),
        ..LogFilter::default()
    };
    assert_eq!(store.count(&alice).await.expect("count"), 2);

    // `_` is matched literally, not as a wildcard.
    let literal = LogFilter {
        email: Some("l_x".to_owned()),
        ..LogFilter::default()
    };
    assert_eq!(store.count(&literal).await.expect("count"), 1);

    let newest = store.query(&LogFilter::recent(1)).await.expect("query");
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].to_email, "carol_x@site.com");

    let page = store
        .query(&LogFilter {
            order: SortOrder::Asc,
            limit: Some(2),
            offset: 1,
            ..LogFilter::default()
        })
        .await
        .expect("query");
    let recipients: Vec<_> = page.iter().map(|l| l.to_email.as_str()).collect();
    assert_eq!(recipients, vec!["bob@site.com", "alice@other.com"]);
}

#[tokio::test]
async fn query_filters_by_date_range() {
    let store = EmailLogStore::in_memory().await.expect("store");
    let old = store
        .record(&entry("old@site.com", "Old", LogStatus::Sent))
        .await
        .expect("record")
        .expect("id");
    store
        .record(&entry("new@site.com", "New", LogStatus::Sent))
        .await
        .expect("record");
    backdate(&store, old, 10).await;

    let recent = store
        .query(&LogFilter {
            date_from: Some(Utc::now() - TimeDelta::days(1)),
            ..LogFilter::default()
        })
        .await
        .expect("query");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].to_email, "new@site.com");

    let older = store
        .query(&LogFilter {
            date_to: Some(Utc::now() - TimeDelta::days(5)),
            ..LogFilter::default()
        })
        .await
        .expect("query");
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].id, old);
}

#[tokio::test]
async fn statistics_count_by_status() {
    let store = EmailLogStore::in_memory().await.expect("store");
    for status in [
        LogStatus::Sent,
        LogStatus::Sent,
        LogStatus::Failed,
        LogStatus::Pending,
    ] {
        store
            .record(&entry("user@site.com", "Hi", status))
            .await
            .expect("record");
    }

    let stats = store.statistics(None).await.expect("stats");
    assert_eq!(stats.total, 4);
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 1);
    assert!((stats.success_rate() - 50.0).abs() < f64::EPSILON);

    let future = store
        .statistics(Some(Utc::now() + TimeDelta::days(1)))
        .await
        .expect("stats");
    assert_eq!(future.total, 0);
}

#[tokio::test]
async fn purge_removes_only_old_rows() {
    let store = EmailLogStore::in_memory().await.expect("store");
    let old = store
        .record(&entry("old@site.com", "Old", LogStatus::Sent))
        .await
        .expect("record")
        .expect("id");
    store
        .record(&entry("new@site.com", "New", LogStatus::Sent))
        .await
        .expect("record");
    backdate(&store, old, 45).await;

    let deleted = store
        .purge_older_than(TimeDelta::days(30))
        .await
        .expect("purge");
    assert_eq!(deleted, 1);
    assert!(store.get(old).await.expect("get").is_none());
    assert_eq!(store.count(&LogFilter::default()).await.expect("count"), 1);
}

#[tokio::test]
async fn clear_all_resets_ids() {
    let store = EmailLogStore::in_memory().await.expect("store");
    store
        .record(&entry("a@site.com", "A", LogStatus::Sent))
        .await
        .expect("record");
    assert!(store.clear_all().await.expect("clear"));
    assert_eq!(store.count(&LogFilter::default()).await.expect("count"), 0);

    let id = store
        .record(&entry("b@site.com", "B", LogStatus::Sent))
        .await
        .expect("record")
        .expect("id");
    assert_eq!(id, 1);
}

#[tokio::test]
async fn disabled_store_is_inert() {
    let store = EmailLogStore::disabled();
    assert!(!store.is_enabled());
    assert_eq!(
        store
            .record(&entry("a@site.com", "A", LogStatus::Sent))
            .await
            .expect("record"),
        None
    );
    assert!(!store
        .update_status(1, LogStatus::Sent, StatusDetail::default())
        .await
        .expect("update"));
    assert!(store.get(1).await.expect("get").is_none());
    assert!(store.query(&LogFilter::default()).await.expect("query").is_empty());
    assert_eq!(store.count(&LogFilter::default()).await.expect("count"), 0);
    assert_eq!(store.statistics(None).await.expect("stats").total, 0);
    assert_eq!(store.purge_older_than(TimeDelta::days(1)).await.expect("purge"), 0);
    assert!(!store.clear_all().await.expect("clear"));
    assert_eq!(store.export_csv(&LogFilter::default()).await.expect("export"), "");
}

#[tokio::test]
async fn open_creates_database_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("email_logs.db");
    let store = EmailLogStore::open(&path, true).await.expect("open");
    store
        .record(&entry("a@site.com", "A", LogStatus::Sent))
        .await
        .expect("record");
    assert!(path.exists());

    let disabled = EmailLogStore::open(&dir.path().join("off.db"), false)
        .await
        .expect("open");
    assert!(!disabled.is_enabled());
    assert!(!dir.path().join("off.db").exists());
}
