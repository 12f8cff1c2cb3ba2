//! Wallet, ledger-entry, and device records plus API payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

/// The currency issuer. The only wallet allowed to hold a negative balance.
pub const SYSTEM_USER_ID: i64 = 0;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("cannot transfer to the same wallet")]
    SameWallet,
    #[error("duplicate reference_id: {0}")]
    DuplicateReference(String),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("minimum transfer is {0}")]
    BelowMinimumTransfer(i64),
    #[error("wallet not found for user {0}")]
    WalletNotFound(i64),
    #[error("transaction not found")]
    TransactionNotFound,
    #[error("device not found")]
    DeviceNotFound,
    #[error("device already registered")]
    DeviceAlreadyRegistered,
    #[error("device is inactive")]
    DeviceInactive,
    #[error("reward rate not found")]
    RewardRateNotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    /// Integer milli-units; 1000 = 1 display SOMS.
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One side of a double-entry transaction. Immutable once committed.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub transaction_id: String,
    pub wallet_id: i64,
    /// Positive = credit, negative = debit.
    pub amount: i64,
    pub balance_after: i64,
    pub entry_type: String,
    pub transaction_type: String,
    pub description: Option<String>,
    pub reference_id: Option<String>,
    pub counterparty_wallet_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    TaskReward,
    P2pTransfer,
    InfrastructureReward,
    Demurrage,
    FeeBurn,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskReward => "TASK_REWARD",
            Self::P2pTransfer => "P2P_TRANSFER",
            Self::InfrastructureReward => "INFRASTRUCTURE_REWARD",
            Self::Demurrage => "DEMURRAGE",
            Self::FeeBurn => "FEE_BURN",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, FromRow)]
pub struct SupplyStats {
    pub total_issued: i64,
    pub total_burned: i64,
    pub circulating: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Device {
    pub id: i64,
    pub device_id: String,
    pub owner_id: i64,
    /// "llm_node" | "sensor_node" | "hub".
    pub device_type: String,
    pub display_name: Option<String>,
    pub topic_prefix: Option<String>,
    pub xp: i64,
    pub registered_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RewardRate {
    pub id: i64,
    pub device_type: String,
    pub rate_per_hour: i64,
    pub min_uptime_for_reward: i64,
}

// ── API payloads ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WalletCreate {
    pub user_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRewardRequest {
    pub user_id: i64,
    pub amount: i64,
    pub task_id: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct P2pTransferRequest {
    #[serde(alias = "from")]
    pub from_user_id: i64,
    #[serde(alias = "to")]
    pub to_user_id: i64,
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: String,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferFeeInfo {
    pub fee_rate: f64,
    pub fee_amount: i64,
    pub net_amount: i64,
    pub min_transfer: i64,
    pub below_minimum: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct P2pTransferResponse {
    pub transaction_id: String,
    pub entries: Vec<LedgerEntry>,
    pub fee: TransferFeeInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCreate {
    pub device_id: String,
    pub owner_id: i64,
    pub device_type: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub topic_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    pub display_name: Option<String>,
    pub is_active: Option<bool>,
    pub topic_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceXpGrantRequest {
    pub zone: String,
    pub task_id: i64,
    pub xp_amount: i64,
    #[serde(default)]
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceXpResponse {
    pub devices_awarded: i64,
    pub total_xp_granted: i64,
    pub device_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    pub device_id: String,
    pub last_heartbeat_at: DateTime<Utc>,
    pub reward_granted: i64,
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneMultiplierResponse {
    pub zone: String,
    pub multiplier: f64,
    pub device_count: i64,
    pub avg_xp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardRateUpdate {
    pub rate_per_hour: i64,
    #[serde(default)]
    pub min_uptime_for_reward: Option<i64>,
}
