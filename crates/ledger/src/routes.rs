//! HTTP surface of the wallet/ledger service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::model::{
    DeviceCreate, DeviceUpdate, DeviceXpGrantRequest, LedgerError, P2pTransferRequest,
    P2pTransferResponse, RewardRateUpdate, SupplyStats, TaskRewardRequest, TransactionResponse,
    TransferFeeInfo, WalletCreate, SYSTEM_USER_ID,
};
use crate::policy;
use crate::store::LedgerStore;

/// Supply stats are cheap but read constantly by dashboards; cache briefly.
const SUPPLY_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub store: LedgerStore,
    supply_cache: Arc<Mutex<Option<(SupplyStats, Instant)>>>,
}

impl AppState {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            store,
            supply_cache: Arc::new(Mutex::new(None)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/wallets/", post(create_wallet))
        .route("/wallets/:user_id", get(get_wallet))
        .route("/wallets/:user_id/history", get(wallet_history))
        .route("/transactions/task-reward", post(task_reward))
        .route("/transactions/p2p-transfer", post(p2p_transfer))
        .route("/transactions/transfer-fee", get(transfer_fee))
        .route("/transactions/:transaction_id", get(get_transaction))
        .route("/supply", get(get_supply))
        .route("/demurrage/trigger", post(trigger_demurrage))
        .route("/reward-rates", get(list_reward_rates))
        .route("/reward-rates/:device_type", put(update_reward_rate))
        .route("/devices/", get(list_devices).post(register_device))
        .route("/devices/xp-grant", post(xp_grant))
        .route("/devices/zone-multiplier/:zone", get(zone_multiplier))
        .route("/devices/:device_id", put(update_device))
        .route("/devices/:device_id/heartbeat", post(heartbeat))
        .with_state(state)
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = match &self {
            LedgerError::WalletNotFound(_)
            | LedgerError::TransactionNotFound
            | LedgerError::DeviceNotFound
            | LedgerError::RewardRateNotFound => StatusCode::NOT_FOUND,
            LedgerError::DeviceAlreadyRegistered => StatusCode::CONFLICT,
            LedgerError::NonPositiveAmount
            | LedgerError::SameWallet
            | LedgerError::DuplicateReference(_)
            | LedgerError::InsufficientFunds
            | LedgerError::BelowMinimumTransfer(_)
            | LedgerError::DeviceInactive => StatusCode::BAD_REQUEST,
            LedgerError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"detail": self.to_string()}))).into_response()
    }
}

// ── wallets ──────────────────────────────────────────────────────────────────

async fn create_wallet(
    State(state): State<AppState>,
    Json(body): Json<WalletCreate>,
) -> Result<impl IntoResponse, LedgerError> {
    Ok(Json(state.store.get_or_create_wallet(body.user_id).await?))
}

async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, LedgerError> {
    Ok(Json(state.store.get_wallet(user_id).await?))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default = "default_history_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_history_limit() -> i64 {
    50
}

async fn wallet_history(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, LedgerError> {
    let limit = params.limit.min(200);
    Ok(Json(state.store.history(user_id, limit, params.offset).await?))
}

// ── transactions ─────────────────────────────────────────────────────────────

async fn task_reward(
    State(state): State<AppState>,
    Json(body): Json<TaskRewardRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let reference = format!("task:{}", body.task_id);
    let description = body
        .description
        .unwrap_or_else(|| format!("Task #{} reward", body.task_id));
    let txn_id = state
        .store
        .transfer(
            SYSTEM_USER_ID,
            body.user_id,
            body.amount,
            crate::model::TransactionType::TaskReward,
            Some(description),
            Some(reference),
        )
        .await?;
    state.supply_cache.lock().await.take();
    let entries = state.store.transaction(&txn_id).await?;
    Ok(Json(TransactionResponse {
        transaction_id: txn_id,
        entries,
    }))
}

async fn p2p_transfer(
    State(state): State<AppState>,
    Json(body): Json<P2pTransferRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let (txn_id, fee, min_transfer) = state
        .store
        .p2p_transfer(
            body.from_user_id,
            body.to_user_id,
            body.amount,
            body.description,
        )
        .await?;
    state.supply_cache.lock().await.take();
    let entries = state.store.transaction(&txn_id).await?;
    Ok(Json(P2pTransferResponse {
        transaction_id: txn_id,
        entries,
        fee: TransferFeeInfo {
            fee_rate: policy::FEE_RATE,
            fee_amount: fee,
            net_amount: body.amount,
            min_transfer,
            below_minimum: false,
        },
    }))
}

#[derive(Debug, Deserialize)]
struct FeeParams {
    amount: i64,
}

async fn transfer_fee(
    State(state): State<AppState>,
    Query(params): Query<FeeParams>,
) -> Result<impl IntoResponse, LedgerError> {
    if params.amount <= 0 {
        return Err(LedgerError::NonPositiveAmount);
    }
    let circulating = state.store.supply().await?.circulating;
    let min_transfer = policy::calc_min_transfer(circulating);
    Ok(Json(TransferFeeInfo {
        fee_rate: policy::FEE_RATE,
        fee_amount: policy::calc_fee(params.amount),
        net_amount: params.amount,
        min_transfer,
        below_minimum: params.amount < min_transfer,
    }))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, LedgerError> {
    let entries = state.store.transaction(&transaction_id).await?;
    Ok(Json(TransactionResponse {
        transaction_id,
        entries,
    }))
}

// ── supply and demurrage ─────────────────────────────────────────────────────

async fn get_supply(State(state): State<AppState>) -> Result<impl IntoResponse, LedgerError> {
    let mut cache = state.supply_cache.lock().await;
    if let Some((stats, stamp)) = *cache {
        if stamp.elapsed() < SUPPLY_CACHE_TTL {
            return Ok(Json(stats));
        }
    }
    let stats = state.store.supply().await?;
    *cache = Some((stats, Instant::now()));
    Ok(Json(stats))
}

async fn trigger_demurrage(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, LedgerError> {
    let (wallets, burned) = state.store.apply_demurrage().await?;
    state.supply_cache.lock().await.take();
    Ok(Json(json!({
        "status": "ok",
        "wallets_taxed": wallets,
        "total_burned": burned,
    })))
}

// ── reward rates ─────────────────────────────────────────────────────────────

async fn list_reward_rates(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, LedgerError> {
    Ok(Json(state.store.reward_rates().await?))
}

async fn update_reward_rate(
    State(state): State<AppState>,
    Path(device_type): Path<String>,
    Json(body): Json<RewardRateUpdate>,
) -> Result<impl IntoResponse, LedgerError> {
    Ok(Json(state.store.update_reward_rate(&device_type, body).await?))
}

// ── devices ──────────────────────────────────────────────────────────────────

async fn register_device(
    State(state): State<AppState>,
    Json(body): Json<DeviceCreate>,
) -> Result<impl IntoResponse, LedgerError> {
    Ok(Json(state.store.register_device(body).await?))
}

async fn list_devices(State(state): State<AppState>) -> Result<impl IntoResponse, LedgerError> {
    Ok(Json(state.store.list_devices().await?))
}

async fn update_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(body): Json<DeviceUpdate>,
) -> Result<impl IntoResponse, LedgerError> {
    Ok(Json(state.store.update_device(&device_id, body).await?))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, LedgerError> {
    let response = state.store.heartbeat(&device_id).await?;
    state.supply_cache.lock().await.take();
    Ok(Json(response))
}

async fn xp_grant(
    State(state): State<AppState>,
    Json(body): Json<DeviceXpGrantRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    Ok(Json(state.store.grant_zone_xp(body).await?))
}

async fn zone_multiplier(
    State(state): State<AppState>,
    Path(zone): Path<String>,
) -> Result<impl IntoResponse, LedgerError> {
    Ok(Json(state.store.zone_multiplier(&zone).await?))
}
