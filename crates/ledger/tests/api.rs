//! HTTP-level tests of the wallet API: reward payment with idempotency,
//! P2P transfer with fee burn, demurrage, and fee preview.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use soms_ledger::routes::{self, AppState};
use soms_ledger::store::LedgerStore;

async fn app() -> Router {
    let store = LedgerStore::connect_in_memory().await.unwrap();
    routes::router(AppState::new(store))
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn task_reward_pays_once_per_task() {
    let app = app().await;
    let body = json!({"user_id": 7, "amount": 1500, "task_id": 42});

    let (status, txn) = request(&app, "POST", "/transactions/task-reward", Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(txn["entries"].as_array().unwrap().len(), 2);

    let (_, wallet) = request(&app, "GET", "/wallets/7", None).await;
    assert_eq!(wallet["balance"], 1500);

    // Same task id again: 400, balance untouched.
    let (status, error) = request(&app, "POST", "/transactions/task-reward", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["detail"].as_str().unwrap().contains("duplicate"));
    let (_, wallet) = request(&app, "GET", "/wallets/7", None).await;
    assert_eq!(wallet["balance"], 1500);
}

#[tokio::test]
async fn p2p_transfer_charges_and_burns_the_fee() {
    let app = app().await;
    // Seed: sender 1000, plus enough elsewhere for circulating 10_000.
    request(
        &app,
        "POST",
        "/transactions/task-reward",
        Some(json!({"user_id": 7, "amount": 1000, "task_id": 1})),
    )
    .await;
    request(
        &app,
        "POST",
        "/transactions/task-reward",
        Some(json!({"user_id": 99, "amount": 9000, "task_id": 2})),
    )
    .await;

    let (status, response) = request(
        &app,
        "POST",
        "/transactions/p2p-transfer",
        Some(json!({"from": 7, "to": 8, "amount": 500})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["fee"]["fee_amount"], 25);

    let (_, sender) = request(&app, "GET", "/wallets/7", None).await;
    assert_eq!(sender["balance"], 475);
    let (_, recipient) = request(&app, "GET", "/wallets/8", None).await;
    assert_eq!(recipient["balance"], 500);

    let (_, supply) = request(&app, "GET", "/supply", None).await;
    assert_eq!(supply["total_burned"], 25);
    assert_eq!(supply["circulating"], 10_000 - 25);
}

#[tokio::test]
async fn transfer_fee_preview_reports_minimum() {
    let app = app().await;
    let (status, preview) = request(&app, "GET", "/transactions/transfer-fee?amount=500", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["fee_amount"], 25);
    assert_eq!(preview["min_transfer"], 10);
    assert_eq!(preview["below_minimum"], false);

    let (_, preview) = request(&app, "GET", "/transactions/transfer-fee?amount=5", None).await;
    assert_eq!(preview["below_minimum"], true);
}

#[tokio::test]
async fn demurrage_trigger_taxes_eligible_wallets() {
    let app = app().await;
    request(
        &app,
        "POST",
        "/transactions/task-reward",
        Some(json!({"user_id": 10, "amount": 10_000, "task_id": 1})),
    )
    .await;
    request(
        &app,
        "POST",
        "/transactions/task-reward",
        Some(json!({"user_id": 11, "amount": 50, "task_id": 2})),
    )
    .await;

    let (status, result) = request(&app, "POST", "/demurrage/trigger", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["wallets_taxed"], 1);
    assert_eq!(result["total_burned"], 200);

    let (_, taxed) = request(&app, "GET", "/wallets/10", None).await;
    assert_eq!(taxed["balance"], 9_800);
    let (_, exempt) = request(&app, "GET", "/wallets/11", None).await;
    assert_eq!(exempt["balance"], 50);

    // Cache was invalidated by the trigger.
    let (_, supply) = request(&app, "GET", "/supply", None).await;
    assert_eq!(supply["total_burned"], 200);
}

#[tokio::test]
async fn wallet_history_and_transaction_lookup() {
    let app = app().await;
    let (_, txn) = request(
        &app,
        "POST",
        "/transactions/task-reward",
        Some(json!({"user_id": 7, "amount": 100, "task_id": 1})),
    )
    .await;
    let txn_id = txn["transaction_id"].as_str().unwrap();

    let (status, fetched) = request(&app, "GET", &format!("/transactions/{txn_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["entries"].as_array().unwrap().len(), 2);

    let (status, history) = request(&app, "GET", "/wallets/7/history?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["amount"], 100);

    let (status, _) = request(&app, "GET", "/wallets/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn device_endpoints_round_trip() {
    let app = app().await;
    let (status, device) = request(
        &app,
        "POST",
        "/devices/",
        Some(json!({
            "device_id": "env_01",
            "owner_id": 5,
            "device_type": "sensor_node",
            "topic_prefix": "office/main/sensor/env_01"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(device["xp"], 0);

    let (status, _) = request(
        &app,
        "POST",
        "/devices/",
        Some(json!({"device_id": "env_01", "owner_id": 5, "device_type": "sensor_node"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, grant) = request(
        &app,
        "POST",
        "/devices/xp-grant",
        Some(json!({"zone": "main", "task_id": 1, "xp_amount": 1000})),
    )
    .await;
    assert_eq!(grant["devices_awarded"], 1);

    let (_, multiplier) = request(&app, "GET", "/devices/zone-multiplier/main", None).await;
    assert_eq!(multiplier["avg_xp"], 1000);
    assert_eq!(multiplier["multiplier"], 1.5);

    let (status, beat) = request(&app, "POST", "/devices/env_01/heartbeat", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(beat["reward_granted"], 0);

    let (status, rates) = request(&app, "GET", "/reward-rates", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rates.as_array().unwrap().len(), 3);
}
