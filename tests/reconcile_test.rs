//! Integration tests for payment reconciliation against mocked panel
//! and wallet servers.
//!
//! Run with: cargo test --test reconcile_test

use std::sync::Arc;

use async_trait::async_trait;
use serial_test::serial;
use tempfile::TempDir;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xui_billing::core::error::AppResult;
use xui_billing::core::reconcile::{check_pending_payments, reconcile_one};
use xui_billing::panel::MS_PER_DAY;
use xui_billing::storage::db::{self, DbPool, PaymentStatus};
use xui_billing::telegram::notifications::Notify;

/// Records every message instead of talking to Telegram.
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

fn setup_db(panel_url: &str) -> (TempDir, DbPool) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let pool = db::create_pool(path.to_str().unwrap()).unwrap();

    let conn = db::get_connection(&pool).unwrap();
    conn.execute(
        "INSERT INTO settings (panel_url, username, password) VALUES (?1, 'admin', 'secret')",
        [panel_url],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO telegram_settings (bot_token, is_enabled, notify_days, check_interval, interval_unit, payment_amount, create_payment)
         VALUES ('test-token', 1, 3, 60, 'minutes', 300.0, 1)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO yoomoney_settings (wallet_id, secret_key, redirect_url, is_enabled)
         VALUES ('4100123', 'wallet-secret', NULL, 1)",
        [],
    )
    .unwrap();

    (dir, pool)
}

const INBOUND_SETTINGS: &str =
    "{\"clients\":[{\"id\":\"uuid-1\",\"email\":\"a@b.com\",\"expiryTime\":1000,\"enable\":false,\"totalGB\":0}]}";

async fn mount_panel(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true, "msg": "", "obj": null
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "msg": "",
            "obj": [{
                "id": 3,
                "port": 443,
                "remark": "main",
                "settings": INBOUND_SETTINGS,
                "streamSettings": "{}",
                "clientStats": []
            }]
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/panel/api/inbounds/updateClient/uuid-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true, "msg": "", "obj": null
        })))
        .mount(server)
        .await;
}

async fn mount_wallet_history(server: &MockServer, operations: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api/operation-history"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "operations": operations })),
        )
        .mount(server)
        .await;
}

#[tokio::test]
#[serial]
async fn test_paid_payment_is_extended_and_confirmed() {
    let panel = MockServer::start().await;
    let wallet = MockServer::start().await;
    std::env::set_var("YOOMONEY_API_URL", wallet.uri());

    mount_panel(&panel).await;
    mount_wallet_history(
        &wallet,
        serde_json::json!([{ "label": "vpn_a@b.com_1700000000", "status": "success" }]),
    )
    .await;

    let (_dir, pool) = setup_db(&panel.uri());
    let conn = db::get_connection(&pool).unwrap();
    db::insert_payment(&conn, "vpn_a@b.com_1700000000", "a@b.com", 300.0, 30, 3).unwrap();
    db::upsert_binding(&conn, "a@b.com", Some("777")).unwrap();
    drop(conn);

    let before_ms = chrono::Utc::now().timestamp_millis();
    let notify = RecordingNotify::default();
    let renewed = reconcile_one(&pool, &notify, "vpn_a@b.com_1700000000").await.unwrap();
    assert!(renewed);
    let after_ms = chrono::Utc::now().timestamp_millis();

    let conn = db::get_connection(&pool).unwrap();
    let payment = db::get_payment(&conn, "vpn_a@b.com_1700000000").unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert!(payment.paid_at.is_some());

    // The stored expiry (1000) is long past, so the update posted to the
    // panel must carry now + 30 days.
    let requests = panel.received_requests().await.unwrap();
    let update = requests
        .iter()
        .find(|r| r.url.path().ends_with("/updateClient/uuid-1"))
        .expect("no updateClient request reached the panel");
    let body: serde_json::Value = serde_json::from_slice(&update.body).unwrap();
    assert_eq!(body["id"], 3);
    let inner: serde_json::Value = serde_json::from_str(body["settings"].as_str().unwrap()).unwrap();
    let wire_expiry = inner["clients"][0]["expiryTime"].as_i64().unwrap();
    assert!(
        wire_expiry >= before_ms + 30 * MS_PER_DAY && wire_expiry <= after_ms + 30 * MS_PER_DAY,
        "expiry {wire_expiry} not within 30 days of now"
    );

    let sent = notify.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "777");
    assert!(sent[0].1.contains("a@b.com"));
    assert!(sent[0].1.contains("30"));
}

#[tokio::test]
#[serial]
async fn test_reconciliation_runs_on_a_spawned_task() {
    let panel = MockServer::start().await;
    let wallet = MockServer::start().await;
    std::env::set_var("YOOMONEY_API_URL", wallet.uri());

    mount_panel(&panel).await;
    mount_wallet_history(&wallet, serde_json::json!([{ "label": "p1", "status": "success" }])).await;

    let (_dir, pool) = setup_db(&panel.uri());
    let conn = db::get_connection(&pool).unwrap();
    db::insert_payment(&conn, "p1", "a@b.com", 300.0, 30, 3).unwrap();
    drop(conn);

    // The scheduler drives reconciliation from spawned tasks, so the
    // future has to be Send end to end.
    let notify = Arc::new(RecordingNotify::default());
    let task_pool = pool.clone();
    let task_notify = notify.clone();
    let renewed = tokio::spawn(async move { reconcile_one(&task_pool, task_notify.as_ref(), "p1").await })
        .await
        .unwrap()
        .unwrap();
    assert!(renewed);

    let conn = db::get_connection(&pool).unwrap();
    assert_eq!(
        db::get_payment(&conn, "p1").unwrap().unwrap().status,
        PaymentStatus::Paid
    );
}

#[tokio::test]
#[serial]
async fn test_unpaid_payment_stays_pending() {
    let panel = MockServer::start().await;
    let wallet = MockServer::start().await;
    std::env::set_var("YOOMONEY_API_URL", wallet.uri());

    mount_panel(&panel).await;
    // Refused operations and foreign labels are not money.
    mount_wallet_history(
        &wallet,
        serde_json::json!([
            { "label": "p1", "status": "refused" },
            { "label": "someone_else", "status": "success" }
        ]),
    )
    .await;

    let (_dir, pool) = setup_db(&panel.uri());
    let conn = db::get_connection(&pool).unwrap();
    db::insert_payment(&conn, "p1", "a@b.com", 300.0, 30, 3).unwrap();
    drop(conn);

    let notify = RecordingNotify::default();
    let renewed = reconcile_one(&pool, &notify, "p1").await.unwrap();
    assert!(!renewed);

    let conn = db::get_connection(&pool).unwrap();
    let payment = db::get_payment(&conn, "p1").unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(notify.sent.lock().await.is_empty());
}

#[tokio::test]
#[serial]
async fn test_failed_extension_reverts_claim() {
    let panel = MockServer::start().await;
    let wallet = MockServer::start().await;
    std::env::set_var("YOOMONEY_API_URL", wallet.uri());

    // The wallet says paid but the panel rejects the login.
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": false, "msg": "bad credentials", "obj": null
        })))
        .mount(&panel)
        .await;
    mount_wallet_history(&wallet, serde_json::json!([{ "label": "p1", "status": "success" }])).await;

    let (_dir, pool) = setup_db(&panel.uri());
    let conn = db::get_connection(&pool).unwrap();
    db::insert_payment(&conn, "p1", "a@b.com", 300.0, 30, 3).unwrap();
    drop(conn);

    let notify = RecordingNotify::default();
    let result = reconcile_one(&pool, &notify, "p1").await;
    assert!(result.is_err());

    // The claim was rolled back, the next pass will retry.
    let conn = db::get_connection(&pool).unwrap();
    let payment = db::get_payment(&conn, "p1").unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.paid_at.is_none());
    assert!(notify.sent.lock().await.is_empty());
}

#[tokio::test]
#[serial]
async fn test_second_pass_is_idempotent() {
    let panel = MockServer::start().await;
    let wallet = MockServer::start().await;
    std::env::set_var("YOOMONEY_API_URL", wallet.uri());

    mount_panel(&panel).await;
    mount_wallet_history(&wallet, serde_json::json!([{ "label": "p1", "status": "success" }])).await;

    let (_dir, pool) = setup_db(&panel.uri());
    let conn = db::get_connection(&pool).unwrap();
    db::insert_payment(&conn, "p1", "a@b.com", 300.0, 30, 3).unwrap();
    db::upsert_binding(&conn, "a@b.com", Some("777")).unwrap();
    drop(conn);

    let notify = RecordingNotify::default();
    assert!(reconcile_one(&pool, &notify, "p1").await.unwrap());
    // The wallet still reports success but the payment is already paid.
    assert!(!reconcile_one(&pool, &notify, "p1").await.unwrap());

    assert_eq!(notify.sent.lock().await.len(), 1);
}

#[tokio::test]
#[serial]
async fn test_batch_pass_survives_a_bad_payment() {
    let panel = MockServer::start().await;
    let wallet = MockServer::start().await;
    std::env::set_var("YOOMONEY_API_URL", wallet.uri());

    mount_panel(&panel).await;
    // "ghost" belongs to a client the panel does not know; its extension
    // fails and must not block the other payment.
    mount_wallet_history(
        &wallet,
        serde_json::json!([
            { "label": "ghost", "status": "success" },
            { "label": "p1", "status": "success" }
        ]),
    )
    .await;

    let (_dir, pool) = setup_db(&panel.uri());
    let conn = db::get_connection(&pool).unwrap();
    db::insert_payment(&conn, "ghost", "nobody@b.com", 300.0, 30, 3).unwrap();
    db::insert_payment(&conn, "p1", "a@b.com", 300.0, 30, 3).unwrap();
    drop(conn);

    let notify = RecordingNotify::default();
    check_pending_payments(&pool, &notify).await.unwrap();

    let conn = db::get_connection(&pool).unwrap();
    assert_eq!(
        db::get_payment(&conn, "p1").unwrap().unwrap().status,
        PaymentStatus::Paid
    );
    assert_eq!(
        db::get_payment(&conn, "ghost").unwrap().unwrap().status,
        PaymentStatus::Pending
    );
}
