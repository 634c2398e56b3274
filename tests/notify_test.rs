//! Integration tests for expiry notifications against a mocked panel.
//!
//! Run with: cargo test --test notify_test

use async_trait::async_trait;
use serial_test::serial;
use tempfile::TempDir;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xui_billing::core::error::AppResult;
use xui_billing::core::notify::check_expiring;
use xui_billing::panel::MS_PER_DAY;
use xui_billing::storage::db::{self, DbPool};
use xui_billing::telegram::notifications::Notify;

#[derive(Default)]
struct RecordingNotify {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notify for RecordingNotify {
    async fn send_text(&self, chat_id: &str, text: &str) -> AppResult<()> {
        self.sent.lock().await.push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

fn setup_db(panel_url: &str, notifications_enabled: bool) -> (TempDir, DbPool) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let pool = db::create_pool(path.to_str().unwrap()).unwrap();

    let conn = db::get_connection(&pool).unwrap();
    conn.execute(
        "INSERT INTO settings (panel_url, username, password) VALUES (?1, 'admin', 'secret')",
        [panel_url],
    )
    .unwrap();
    // create_payment is off so the runs below need no wallet mock.
    conn.execute(
        "INSERT INTO telegram_settings (bot_token, is_enabled, notify_days, check_interval, interval_unit, payment_amount, create_payment)
         VALUES ('test-token', ?1, 3, 60, 'minutes', 300.0, 0)",
        [notifications_enabled as i64],
    )
    .unwrap();

    (dir, pool)
}

fn bind(pool: &DbPool, email: &str, tgid: &str) {
    let conn = db::get_connection(pool).unwrap();
    db::upsert_binding(&conn, email, Some(tgid)).unwrap();
}

async fn mount_panel_with_client(server: &MockServer, email: &str, tgid: &str, expiry_ms: i64) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true, "msg": "", "obj": null
        })))
        .mount(server)
        .await;

    let settings = format!(
        "{{\"clients\":[{{\"id\":\"uuid-1\",\"email\":\"{email}\",\"expiryTime\":{expiry_ms},\"enable\":true,\"totalGB\":0,\"tgId\":\"{tgid}\"}}]}}"
    );
    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "msg": "",
            "obj": [{
                "id": 3,
                "port": 443,
                "settings": settings,
                "streamSettings": "{}",
                "clientStats": []
            }]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
#[serial]
async fn test_expiring_client_is_notified_at_most_once() {
    let panel = MockServer::start().await;
    let expiry = chrono::Utc::now().timestamp_millis() + 2 * MS_PER_DAY;
    mount_panel_with_client(&panel, "a@b.com", "777", expiry).await;

    let (_dir, pool) = setup_db(&panel.uri(), true);
    bind(&pool, "a@b.com", "777");
    let notify = RecordingNotify::default();

    check_expiring(&pool, &notify).await.unwrap();
    // The second pass inside the same cycle is silent.
    check_expiring(&pool, &notify).await.unwrap();

    let sent = notify.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "777");
    assert!(sent[0].1.contains("a@b.com"));
}

#[tokio::test]
#[serial]
async fn test_already_expired_client_is_not_notified() {
    let panel = MockServer::start().await;
    let expiry = chrono::Utc::now().timestamp_millis() - MS_PER_DAY;
    mount_panel_with_client(&panel, "a@b.com", "777", expiry).await;

    let (_dir, pool) = setup_db(&panel.uri(), true);
    bind(&pool, "a@b.com", "777");
    let notify = RecordingNotify::default();
    check_expiring(&pool, &notify).await.unwrap();

    assert!(notify.sent.lock().await.is_empty());
}

#[tokio::test]
#[serial]
async fn test_client_outside_window_is_not_notified() {
    let panel = MockServer::start().await;
    let expiry = chrono::Utc::now().timestamp_millis() + 10 * MS_PER_DAY;
    mount_panel_with_client(&panel, "a@b.com", "777", expiry).await;

    let (_dir, pool) = setup_db(&panel.uri(), true);
    bind(&pool, "a@b.com", "777");
    let notify = RecordingNotify::default();
    check_expiring(&pool, &notify).await.unwrap();

    assert!(notify.sent.lock().await.is_empty());
}

#[tokio::test]
#[serial]
async fn test_client_without_binding_is_skipped() {
    let panel = MockServer::start().await;
    let expiry = chrono::Utc::now().timestamp_millis() + MS_PER_DAY;
    // The panel record carries a tgId, but only client_data decides who
    // gets notified; without a binding row the client is unreachable.
    mount_panel_with_client(&panel, "a@b.com", "999", expiry).await;

    let (_dir, pool) = setup_db(&panel.uri(), true);
    let notify = RecordingNotify::default();
    check_expiring(&pool, &notify).await.unwrap();

    assert!(notify.sent.lock().await.is_empty());
}

#[tokio::test]
#[serial]
async fn test_disabled_notifications_do_nothing() {
    let panel = MockServer::start().await;
    let expiry = chrono::Utc::now().timestamp_millis() + MS_PER_DAY;
    mount_panel_with_client(&panel, "a@b.com", "777", expiry).await;

    let (_dir, pool) = setup_db(&panel.uri(), false);
    let notify = RecordingNotify::default();
    check_expiring(&pool, &notify).await.unwrap();

    assert!(notify.sent.lock().await.is_empty());
}

#[tokio::test]
#[serial]
async fn test_stale_dedup_record_is_purged_and_rearmed() {
    let panel = MockServer::start().await;
    let expiry = chrono::Utc::now().timestamp_millis() + 2 * MS_PER_DAY;
    mount_panel_with_client(&panel, "a@b.com", "777", expiry).await;

    let (_dir, pool) = setup_db(&panel.uri(), true);
    bind(&pool, "a@b.com", "777");

    // A record from a previous engine run, older than the 24h retention.
    let conn = db::get_connection(&pool).unwrap();
    conn.execute(
        "INSERT INTO notification_history (email, expiry_time, created_at)
         VALUES ('a@b.com', ?1, datetime('now', '-2 days'))",
        [expiry],
    )
    .unwrap();
    drop(conn);

    let notify = RecordingNotify::default();
    check_expiring(&pool, &notify).await.unwrap();

    // The stale record was purged at the start of the run, so the client
    // was warned again.
    assert_eq!(notify.sent.lock().await.len(), 1);
}
