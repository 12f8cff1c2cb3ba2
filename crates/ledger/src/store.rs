//! Double-entry bookkeeping core.
//!
//! Every transfer creates exactly two `ledger_entries` rows sharing one
//! transaction id: a DEBIT (amount < 0) and a CREDIT (amount > 0). Burns
//! create a single DEBIT with no counterparty. Balances move in the same
//! database transaction as the entries, so SQLite's single-writer
//! transaction discipline gives the exclusivity that row locks provide on
//! server databases; wallets are still touched in ascending user-id order.

use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{
    Device, DeviceCreate, DeviceUpdate, DeviceXpGrantRequest, DeviceXpResponse, HeartbeatResponse,
    LedgerEntry, LedgerError, RewardRate, RewardRateUpdate, SupplyStats, TransactionType, Wallet,
    ZoneMultiplierResponse, SYSTEM_USER_ID,
};
use crate::policy;

/// Reward rates seeded on first start (milli-units per hour, min uptime s).
const SEED_REWARD_RATES: &[(&str, i64, i64)] = &[
    ("llm_node", 5000, 300),
    ("sensor_node", 500, 300),
    ("hub", 1000, 300),
];

#[derive(Debug, Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    pub async fn connect_in_memory() -> Result<Self, LedgerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self, LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;

        // Seed the system wallet, reward rates, and the supply singleton.
        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO wallets (user_id, balance, created_at, updated_at)
             VALUES (?, 0, ?, ?)",
        )
        .bind(SYSTEM_USER_ID)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await?;
        for (device_type, rate, min_uptime) in SEED_REWARD_RATES {
            sqlx::query(
                "INSERT OR IGNORE INTO reward_rates (device_type, rate_per_hour, min_uptime_for_reward)
                 VALUES (?, ?, ?)",
            )
            .bind(device_type)
            .bind(rate)
            .bind(min_uptime)
            .execute(&pool)
            .await?;
        }
        sqlx::query(
            "INSERT OR IGNORE INTO supply_stats (id, total_issued, total_burned, circulating)
             VALUES (1, 0, 0, 0)",
        )
        .execute(&pool)
        .await?;

        info!("ledger store ready");
        Ok(Self { pool })
    }

    // ── wallets ──────────────────────────────────────────────────────────────

    pub async fn get_or_create_wallet(&self, user_id: i64) -> Result<Wallet, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let wallet = Self::wallet_in_tx(&mut tx, user_id, true).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    pub async fn get_wallet(&self, user_id: i64) -> Result<Wallet, LedgerError> {
        sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))
    }

    pub async fn history(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let wallet = self.get_wallet(user_id).await?;
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM ledger_entries WHERE wallet_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(wallet.id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    pub async fn transaction(&self, transaction_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM ledger_entries WHERE transaction_id = ? ORDER BY id",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        if entries.is_empty() {
            return Err(LedgerError::TransactionNotFound);
        }
        Ok(entries)
    }

    pub async fn supply(&self) -> Result<SupplyStats, LedgerError> {
        let stats = sqlx::query_as::<_, SupplyStats>(
            "SELECT total_issued, total_burned, circulating FROM supply_stats WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or_default();
        Ok(stats)
    }

    // ── primitive operations ─────────────────────────────────────────────────

    /// Double-entry transfer. Atomic; idempotent by `reference_id`.
    pub async fn transfer(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        amount: i64,
        transaction_type: TransactionType,
        description: Option<String>,
        reference_id: Option<String>,
    ) -> Result<String, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let txn_id = Self::transfer_in_tx(
            &mut tx,
            from_user_id,
            to_user_id,
            amount,
            transaction_type,
            description,
            reference_id,
        )
        .await?;
        tx.commit().await?;
        Ok(txn_id)
    }

    /// Single-sided burn: one DEBIT, no counterparty, supply shrinks.
    pub async fn burn(
        &self,
        user_id: i64,
        amount: i64,
        transaction_type: TransactionType,
        description: Option<String>,
    ) -> Result<String, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let txn_id =
            Self::burn_in_tx(&mut tx, user_id, amount, transaction_type, description).await?;
        tx.commit().await?;
        Ok(txn_id)
    }

    /// P2P transfer with the fee burned from the sender, all in one
    /// database transaction. Returns (transaction_id, fee, min_transfer).
    pub async fn p2p_transfer(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        amount: i64,
        description: Option<String>,
    ) -> Result<(String, i64, i64), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount);
        }
        let circulating = self.supply().await?.circulating;
        let min_transfer = policy::calc_min_transfer(circulating);
        if amount < min_transfer {
            return Err(LedgerError::BelowMinimumTransfer(min_transfer));
        }
        let fee = policy::calc_fee(amount);

        let mut tx = self.pool.begin().await?;
        let sender = Self::wallet_in_tx(&mut tx, from_user_id, true).await?;
        if sender.balance < amount + fee {
            return Err(LedgerError::InsufficientFunds);
        }
        let txn_id = Self::transfer_in_tx(
            &mut tx,
            from_user_id,
            to_user_id,
            amount,
            TransactionType::P2pTransfer,
            description,
            None,
        )
        .await?;
        Self::burn_in_tx(
            &mut tx,
            from_user_id,
            fee,
            TransactionType::FeeBurn,
            Some("Transfer fee 5%".to_string()),
        )
        .await?;
        tx.commit().await?;
        Ok((txn_id, fee, min_transfer))
    }

    /// One demurrage cycle over every eligible wallet. Returns
    /// (wallets_taxed, total_burned).
    pub async fn apply_demurrage(&self) -> Result<(i64, i64), LedgerError> {
        let mut tx = self.pool.begin().await?;
        let eligible: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT user_id, balance FROM wallets WHERE user_id != ? AND balance > ?",
        )
        .bind(SYSTEM_USER_ID)
        .bind(policy::DEMURRAGE_EXEMPT)
        .fetch_all(&mut *tx)
        .await?;

        let mut count = 0;
        let mut total = 0;
        for (user_id, balance) in eligible {
            let decay = policy::calc_demurrage(balance);
            if decay <= 0 {
                continue;
            }
            Self::burn_in_tx(
                &mut tx,
                user_id,
                decay,
                TransactionType::Demurrage,
                Some(format!(
                    "Demurrage {}%",
                    policy::DEMURRAGE_RATE_PERCENT
                )),
            )
            .await?;
            count += 1;
            total += decay;
        }
        tx.commit().await?;
        info!(wallets = count, burned = total, "demurrage applied");
        Ok((count, total))
    }

    // ── devices ──────────────────────────────────────────────────────────────

    pub async fn register_device(&self, create: DeviceCreate) -> Result<Device, LedgerError> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM devices WHERE device_id = ?")
            .bind(&create.device_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_some() {
            return Err(LedgerError::DeviceAlreadyRegistered);
        }
        let device = sqlx::query_as::<_, Device>(
            "INSERT INTO devices (device_id, owner_id, device_type, display_name, topic_prefix,
                                  xp, registered_at, is_active)
             VALUES (?, ?, ?, ?, ?, 0, ?, 1) RETURNING *",
        )
        .bind(&create.device_id)
        .bind(create.owner_id)
        .bind(&create.device_type)
        .bind(&create.display_name)
        .bind(&create.topic_prefix)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(device)
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>, LedgerError> {
        let devices =
            sqlx::query_as::<_, Device>("SELECT * FROM devices ORDER BY registered_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(devices)
    }

    pub async fn update_device(
        &self,
        device_id: &str,
        update: DeviceUpdate,
    ) -> Result<Device, LedgerError> {
        let device = sqlx::query_as::<_, Device>(
            "UPDATE devices SET
                display_name = COALESCE(?, display_name),
                is_active = COALESCE(?, is_active),
                topic_prefix = COALESCE(?, topic_prefix)
             WHERE device_id = ? RETURNING *",
        )
        .bind(&update.display_name)
        .bind(update.is_active)
        .bind(&update.topic_prefix)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        device.ok_or(LedgerError::DeviceNotFound)
    }

    /// Record a heartbeat. When the device was already beating and its
    /// uptime since the previous beat clears the configured minimum, a
    /// prorated infrastructure reward is issued to the owner, idempotent by
    /// the `infra:{device_id}:{timestamp}` reference.
    pub async fn heartbeat(&self, device_id: &str) -> Result<HeartbeatResponse, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LedgerError::DeviceNotFound)?;
        if !device.is_active {
            return Err(LedgerError::DeviceInactive);
        }

        let now = Utc::now();
        let prev = device.last_heartbeat_at;
        sqlx::query("UPDATE devices SET last_heartbeat_at = ? WHERE device_id = ?")
            .bind(now)
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

        let mut reward_granted = 0;
        let mut uptime_seconds = 0;
        if let Some(prev) = prev {
            uptime_seconds = (now - prev).num_seconds();
            let rate = sqlx::query_as::<_, RewardRate>(
                "SELECT * FROM reward_rates WHERE device_type = ?",
            )
            .bind(&device.device_type)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(rate) = rate {
                if uptime_seconds >= rate.min_uptime_for_reward {
                    let reward = policy::infra_reward(rate.rate_per_hour, uptime_seconds);
                    if reward > 0 {
                        let reference = format!("infra:{}:{}", device.device_id, now.timestamp());
                        match Self::transfer_in_tx(
                            &mut tx,
                            SYSTEM_USER_ID,
                            device.owner_id,
                            reward,
                            TransactionType::InfrastructureReward,
                            Some(format!("Infra reward: {}", device.device_id)),
                            Some(reference),
                        )
                        .await
                        {
                            Ok(_) => reward_granted = reward,
                            Err(LedgerError::DuplicateReference(reference)) => {
                                warn!(device_id, reference = %reference, "heartbeat reward skipped");
                            }
                            Err(other) => return Err(other),
                        }
                    }
                }
            }
        }
        tx.commit().await?;

        Ok(HeartbeatResponse {
            device_id: device.device_id,
            last_heartbeat_at: now,
            reward_granted,
            uptime_seconds,
        })
    }

    /// Grant XP to every active device registered under `office/{zone}/`.
    pub async fn grant_zone_xp(
        &self,
        request: DeviceXpGrantRequest,
    ) -> Result<DeviceXpResponse, LedgerError> {
        let pattern = format!("office/{}/%", request.zone);
        let device_ids: Vec<String> = sqlx::query_scalar(
            "UPDATE devices SET xp = xp + ?
             WHERE is_active = 1 AND topic_prefix LIKE ?
             RETURNING device_id",
        )
        .bind(request.xp_amount)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        let devices_awarded = device_ids.len() as i64;
        info!(
            zone = %request.zone,
            task = request.task_id,
            event = request.event_type.as_deref().unwrap_or("task_created"),
            devices = devices_awarded,
            "zone XP granted"
        );
        Ok(DeviceXpResponse {
            devices_awarded,
            total_xp_granted: devices_awarded * request.xp_amount,
            device_ids,
        })
    }

    pub async fn zone_multiplier(&self, zone: &str) -> Result<ZoneMultiplierResponse, LedgerError> {
        let pattern = format!("office/{zone}/%");
        let xps: Vec<i64> = sqlx::query_scalar(
            "SELECT xp FROM devices WHERE is_active = 1 AND topic_prefix LIKE ?",
        )
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        if xps.is_empty() {
            return Ok(ZoneMultiplierResponse {
                zone: zone.to_string(),
                multiplier: 1.0,
                device_count: 0,
                avg_xp: 0,
            });
        }
        let avg_xp = xps.iter().sum::<i64>() / xps.len() as i64;
        Ok(ZoneMultiplierResponse {
            zone: zone.to_string(),
            multiplier: policy::reward_multiplier(avg_xp),
            device_count: xps.len() as i64,
            avg_xp,
        })
    }

    pub async fn reward_rates(&self) -> Result<Vec<RewardRate>, LedgerError> {
        let rates =
            sqlx::query_as::<_, RewardRate>("SELECT * FROM reward_rates ORDER BY device_type")
                .fetch_all(&self.pool)
                .await?;
        Ok(rates)
    }

    pub async fn update_reward_rate(
        &self,
        device_type: &str,
        update: RewardRateUpdate,
    ) -> Result<RewardRate, LedgerError> {
        let rate = sqlx::query_as::<_, RewardRate>(
            "UPDATE reward_rates SET
                rate_per_hour = ?,
                min_uptime_for_reward = COALESCE(?, min_uptime_for_reward)
             WHERE device_type = ? RETURNING *",
        )
        .bind(update.rate_per_hour)
        .bind(update.min_uptime_for_reward)
        .bind(device_type)
        .fetch_optional(&self.pool)
        .await?;
        rate.ok_or(LedgerError::RewardRateNotFound)
    }

    // ── transaction-scoped internals ─────────────────────────────────────────

    async fn transfer_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        from_user_id: i64,
        to_user_id: i64,
        amount: i64,
        transaction_type: TransactionType,
        description: Option<String>,
        reference_id: Option<String>,
    ) -> Result<String, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount);
        }
        if from_user_id == to_user_id {
            return Err(LedgerError::SameWallet);
        }

        if let Some(reference) = &reference_id {
            let duplicate: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM ledger_entries WHERE reference_id = ? LIMIT 1",
            )
            .bind(reference)
            .fetch_optional(&mut **tx)
            .await?;
            if duplicate.is_some() {
                return Err(LedgerError::DuplicateReference(reference.clone()));
            }
        }

        // Touch wallets in ascending user-id order.
        let mut ordered = [from_user_id, to_user_id];
        ordered.sort_unstable();
        for user_id in ordered {
            Self::wallet_in_tx(tx, user_id, true).await?;
        }
        let from_wallet = Self::wallet_in_tx(tx, from_user_id, false).await?;
        let to_wallet = Self::wallet_in_tx(tx, to_user_id, false).await?;

        if from_user_id != SYSTEM_USER_ID && from_wallet.balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let now = Utc::now();
        let from_balance = from_wallet.balance - amount;
        let to_balance = to_wallet.balance + amount;
        sqlx::query("UPDATE wallets SET balance = ?, updated_at = ? WHERE id = ?")
            .bind(from_balance)
            .bind(now)
            .bind(from_wallet.id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("UPDATE wallets SET balance = ?, updated_at = ? WHERE id = ?")
            .bind(to_balance)
            .bind(now)
            .bind(to_wallet.id)
            .execute(&mut **tx)
            .await?;

        let txn_id = Uuid::new_v4().to_string();
        Self::insert_entry(
            tx,
            &txn_id,
            from_wallet.id,
            -amount,
            from_balance,
            "DEBIT",
            transaction_type,
            &description,
            &reference_id,
            Some(to_wallet.id),
        )
        .await?;
        Self::insert_entry(
            tx,
            &txn_id,
            to_wallet.id,
            amount,
            to_balance,
            "CREDIT",
            transaction_type,
            &description,
            &reference_id,
            Some(from_wallet.id),
        )
        .await?;

        if from_user_id == SYSTEM_USER_ID {
            Self::bump_supply(tx, amount, 0).await?;
        }

        info!(
            txn = %txn_id,
            from = from_user_id,
            to = to_user_id,
            amount,
            r#type = transaction_type.as_str(),
            "transfer"
        );
        Ok(txn_id)
    }

    async fn burn_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: i64,
        amount: i64,
        transaction_type: TransactionType,
        description: Option<String>,
    ) -> Result<String, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount);
        }
        let wallet = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))?;
        if wallet.balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let now = Utc::now();
        let balance_after = wallet.balance - amount;
        sqlx::query("UPDATE wallets SET balance = ?, updated_at = ? WHERE id = ?")
            .bind(balance_after)
            .bind(now)
            .bind(wallet.id)
            .execute(&mut **tx)
            .await?;

        let txn_id = Uuid::new_v4().to_string();
        Self::insert_entry(
            tx,
            &txn_id,
            wallet.id,
            -amount,
            balance_after,
            "DEBIT",
            transaction_type,
            &description,
            &None,
            None,
        )
        .await?;
        Self::bump_supply(tx, 0, amount).await?;

        info!(txn = %txn_id, user = user_id, amount, r#type = transaction_type.as_str(), "burn");
        Ok(txn_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_entry(
        tx: &mut Transaction<'_, Sqlite>,
        txn_id: &str,
        wallet_id: i64,
        amount: i64,
        balance_after: i64,
        entry_type: &str,
        transaction_type: TransactionType,
        description: &Option<String>,
        reference_id: &Option<String>,
        counterparty_wallet_id: Option<i64>,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO ledger_entries (transaction_id, wallet_id, amount, balance_after,
                                         entry_type, transaction_type, description, reference_id,
                                         counterparty_wallet_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(txn_id)
        .bind(wallet_id)
        .bind(amount)
        .bind(balance_after)
        .bind(entry_type)
        .bind(transaction_type.as_str())
        .bind(description)
        .bind(reference_id)
        .bind(counterparty_wallet_id)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn wallet_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: i64,
        create: bool,
    ) -> Result<Wallet, LedgerError> {
        if create {
            let now = Utc::now();
            sqlx::query(
                "INSERT OR IGNORE INTO wallets (user_id, balance, created_at, updated_at)
                 VALUES (?, 0, ?, ?)",
            )
            .bind(user_id)
            .bind(now)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        }
        sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))
    }

    async fn bump_supply(
        tx: &mut Transaction<'_, Sqlite>,
        issued: i64,
        burned: i64,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "UPDATE supply_stats SET
                total_issued = total_issued + ?,
                total_burned = total_burned + ?,
                circulating = total_issued + ? - (total_burned + ?)
             WHERE id = 1",
        )
        .bind(issued)
        .bind(burned)
        .bind(issued)
        .bind(burned)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> LedgerStore {
        LedgerStore::connect_in_memory().await.unwrap()
    }

    async fn issue(store: &LedgerStore, user: i64, amount: i64) {
        store
            .transfer(
                SYSTEM_USER_ID,
                user,
                amount,
                TransactionType::TaskReward,
                None,
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transfer_creates_balanced_double_entry() {
        let store = store().await;
        let txn = store
            .transfer(
                SYSTEM_USER_ID,
                7,
                1500,
                TransactionType::TaskReward,
                Some("Task: T1".to_string()),
                Some("task:1".to_string()),
            )
            .await
            .unwrap();

        let entries = store.transaction(&txn).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().map(|e| e.amount).sum::<i64>(), 0);
        assert_eq!(entries[0].entry_type, "DEBIT");
        assert_eq!(entries[1].entry_type, "CREDIT");
        assert!(entries.iter().all(|e| e.counterparty_wallet_id.is_some()));

        assert_eq!(store.get_wallet(7).await.unwrap().balance, 1500);
        assert_eq!(store.get_wallet(SYSTEM_USER_ID).await.unwrap().balance, -1500);

        let supply = store.supply().await.unwrap();
        assert_eq!(supply.total_issued, 1500);
        assert_eq!(supply.circulating, 1500);
    }

    #[tokio::test]
    async fn balances_equal_sum_of_entries() {
        let store = store().await;
        issue(&store, 7, 1000);
        issue(&store, 8, 400);
        store
            .transfer(7, 8, 100, TransactionType::P2pTransfer, None, None)
            .await
            .unwrap();

        for user in [SYSTEM_USER_ID, 7, 8] {
            let wallet = store.get_wallet(user).await.unwrap();
            let entries = store.history(user, 100, 0).await.unwrap();
            let sum: i64 = entries.iter().map(|e| e.amount).sum();
            assert_eq!(wallet.balance, sum, "user {user}");
            // balance_after of the newest entry equals the wallet balance.
            assert_eq!(entries.first().unwrap().balance_after, wallet.balance);
        }
    }

    #[tokio::test]
    async fn duplicate_reference_is_rejected_and_leaves_balances_unchanged() {
        let store = store().await;
        store
            .transfer(
                SYSTEM_USER_ID,
                7,
                1500,
                TransactionType::TaskReward,
                None,
                Some("task:42".to_string()),
            )
            .await
            .unwrap();

        let result = store
            .transfer(
                SYSTEM_USER_ID,
                7,
                1500,
                TransactionType::TaskReward,
                None,
                Some("task:42".to_string()),
            )
            .await;
        assert!(matches!(result, Err(LedgerError::DuplicateReference(_))));
        assert_eq!(store.get_wallet(7).await.unwrap().balance, 1500);
        assert_eq!(store.supply().await.unwrap().total_issued, 1500);
    }

    #[tokio::test]
    async fn transfer_guards() {
        let store = store().await;
        assert!(matches!(
            store
                .transfer(7, 7, 100, TransactionType::P2pTransfer, None, None)
                .await,
            Err(LedgerError::SameWallet)
        ));
        assert!(matches!(
            store
                .transfer(7, 8, 0, TransactionType::P2pTransfer, None, None)
                .await,
            Err(LedgerError::NonPositiveAmount)
        ));
        // Non-system wallet with no funds cannot send.
        assert!(matches!(
            store
                .transfer(7, 8, 100, TransactionType::P2pTransfer, None, None)
                .await,
            Err(LedgerError::InsufficientFunds)
        ));
    }

    #[tokio::test]
    async fn burn_is_single_sided_and_shrinks_supply() {
        let store = store().await;
        issue(&store, 7, 1000);
        let txn = store
            .burn(7, 300, TransactionType::FeeBurn, None)
            .await
            .unwrap();

        let entries = store.transaction(&txn).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, -300);
        assert!(entries[0].counterparty_wallet_id.is_none());

        let supply = store.supply().await.unwrap();
        assert_eq!(supply.total_burned, 300);
        assert_eq!(supply.circulating, 700);

        // Burns check funds even though transfers from system do not.
        assert!(matches!(
            store.burn(7, 10_000, TransactionType::FeeBurn, None).await,
            Err(LedgerError::InsufficientFunds)
        ));
    }

    #[tokio::test]
    async fn p2p_transfer_burns_fee_from_sender() {
        let store = store().await;
        // Circulating 10_000 => min transfer stays at the floor of 10.
        issue(&store, 7, 1000);
        issue(&store, 99, 9000);

        let (txn, fee, min_transfer) = store
            .p2p_transfer(7, 8, 500, None)
            .await
            .unwrap();
        assert_eq!(fee, 25);
        assert_eq!(min_transfer, 10);
        assert_eq!(store.transaction(&txn).await.unwrap().len(), 2);

        assert_eq!(store.get_wallet(7).await.unwrap().balance, 475);
        assert_eq!(store.get_wallet(8).await.unwrap().balance, 500);
        assert_eq!(store.supply().await.unwrap().total_burned, 25);
    }

    #[tokio::test]
    async fn p2p_transfer_rejects_below_minimum_and_insufficient() {
        let store = store().await;
        issue(&store, 7, 1_000_000);
        // Circulating 1_000_000 => min transfer 100.
        assert!(matches!(
            store.p2p_transfer(7, 8, 50, None).await,
            Err(LedgerError::BelowMinimumTransfer(100))
        ));
        // Amount plus fee exceeds balance.
        assert!(matches!(
            store.p2p_transfer(7, 8, 1_000_000, None).await,
            Err(LedgerError::InsufficientFunds)
        ));
    }

    #[tokio::test]
    async fn demurrage_taxes_only_non_exempt_user_wallets() {
        let store = store().await;
        issue(&store, 10, 10_000);
        issue(&store, 11, 50);

        let (count, burned) = store.apply_demurrage().await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(burned, 200);

        assert_eq!(store.get_wallet(10).await.unwrap().balance, 9_800);
        assert_eq!(store.get_wallet(11).await.unwrap().balance, 50);
        // System wallet untouched: still the negative issuance total.
        assert_eq!(
            store.get_wallet(SYSTEM_USER_ID).await.unwrap().balance,
            -10_050
        );
        assert_eq!(store.supply().await.unwrap().total_burned, 200);
    }

    #[tokio::test]
    async fn demurrage_exempts_exactly_one_hundred() {
        let store = store().await;
        issue(&store, 12, 100);
        let (count, burned) = store.apply_demurrage().await.unwrap();
        assert_eq!((count, burned), (0, 0));
        assert_eq!(store.get_wallet(12).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn device_registration_and_xp_flow() {
        let store = store().await;
        store
            .register_device(DeviceCreate {
                device_id: "env_01".to_string(),
                owner_id: 5,
                device_type: "sensor_node".to_string(),
                display_name: None,
                topic_prefix: Some("office/main/sensor/env_01".to_string()),
            })
            .await
            .unwrap();
        let result = store
            .register_device(DeviceCreate {
                device_id: "env_01".to_string(),
                owner_id: 5,
                device_type: "sensor_node".to_string(),
                display_name: None,
                topic_prefix: None,
            })
            .await;
        assert!(matches!(result, Err(LedgerError::DeviceAlreadyRegistered)));

        let grant = store
            .grant_zone_xp(DeviceXpGrantRequest {
                zone: "main".to_string(),
                task_id: 1,
                xp_amount: 2000,
                event_type: Some("task_created".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(grant.devices_awarded, 1);
        assert_eq!(grant.total_xp_granted, 2000);

        // Other zones are unaffected.
        let other = store
            .grant_zone_xp(DeviceXpGrantRequest {
                zone: "kitchen".to_string(),
                task_id: 1,
                xp_amount: 10,
                event_type: None,
            })
            .await
            .unwrap();
        assert_eq!(other.devices_awarded, 0);

        let multiplier = store.zone_multiplier("main").await.unwrap();
        assert_eq!(multiplier.avg_xp, 2000);
        assert!((multiplier.multiplier - 2.0).abs() < 1e-9);

        let empty = store.zone_multiplier("kitchen").await.unwrap();
        assert_eq!(empty.multiplier, 1.0);
        assert_eq!(empty.device_count, 0);
    }

    #[tokio::test]
    async fn heartbeat_grants_prorated_reward_once_uptime_clears_minimum() {
        let store = store().await;
        store
            .register_device(DeviceCreate {
                device_id: "hub_01".to_string(),
                owner_id: 9,
                device_type: "hub".to_string(),
                display_name: None,
                topic_prefix: Some("office/main/hub/hub_01".to_string()),
            })
            .await
            .unwrap();

        // First heartbeat establishes the baseline; no reward possible.
        let first = store.heartbeat("hub_01").await.unwrap();
        assert_eq!(first.reward_granted, 0);
        assert_eq!(first.uptime_seconds, 0);

        // Backdate the stored heartbeat so the next one sees a long uptime.
        let past = Utc::now() - chrono::Duration::hours(2);
        sqlx::query("UPDATE devices SET last_heartbeat_at = ? WHERE device_id = ?")
            .bind(past)
            .bind("hub_01")
            .execute(&store.pool)
            .await
            .unwrap();

        let second = store.heartbeat("hub_01").await.unwrap();
        assert!(second.uptime_seconds >= 7199);
        // hub rate is 1000/h => roughly 2000 for two hours.
        assert!((1990..=2010).contains(&second.reward_granted));
        assert_eq!(
            store.get_wallet(9).await.unwrap().balance,
            second.reward_granted
        );

        let inactive = store
            .update_device(
                "hub_01",
                DeviceUpdate {
                    is_active: Some(false),
                    ..DeviceUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(!inactive.is_active);
        assert!(matches!(
            store.heartbeat("hub_01").await,
            Err(LedgerError::DeviceInactive)
        ));
    }

    #[tokio::test]
    async fn reward_rates_are_seeded_and_updatable() {
        let store = store().await;
        let rates = store.reward_rates().await.unwrap();
        assert_eq!(rates.len(), 3);
        assert!(rates.iter().any(|r| r.device_type == "llm_node" && r.rate_per_hour == 5000));

        let updated = store
            .update_reward_rate(
                "sensor_node",
                RewardRateUpdate {
                    rate_per_hour: 750,
                    min_uptime_for_reward: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.rate_per_hour, 750);
        assert_eq!(updated.min_uptime_for_reward, 300);

        assert!(matches!(
            store
                .update_reward_rate(
                    "toaster",
                    RewardRateUpdate {
                        rate_per_hour: 1,
                        min_uptime_for_reward: None
                    }
                )
                .await,
            Err(LedgerError::RewardRateNotFound)
        ));
    }
}
