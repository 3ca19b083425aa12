// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ledger database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: user_id → serialized StoredUser
//! - `devices`: device_id → serialized StoredDevice
//! - `user_devices`: composite key (user_id_be|device_id) → device_id
//! - `transactions`: order_id → serialized StoredTransaction
//!
//! Every mutation that touches money runs inside a single redb write
//! transaction. redb admits one writer at a time, so a balance read inside a
//! write transaction always observes every previously committed debit.

use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use serde::de::DeserializeOwned;

use super::records::{StoredDevice, StoredTransaction, StoredUser, TransactionStatus, UserId};

// =============================================================================
// Table Definitions
// =============================================================================

const USERS: TableDefinition<i64, &[u8]> = TableDefinition::new("users");

const DEVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");

/// Index: `user_id_be|device_id` → device_id, for per-user prefix scans.
const USER_DEVICES: TableDefinition<&[u8], &str> = TableDefinition::new("user_devices");

const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("insufficient balance: required {required}, current {current}")]
    InsufficientBalance { required: u64, current: u64 },

    #[error("device limit of {max} reached")]
    DeviceLimitReached { max: usize },

    #[error("trial already used")]
    TrialAlreadyUsed,
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result of [`Ledger::mark_success_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentSettlement {
    /// The transaction moved PENDING → SUCCESS and the user was credited.
    Credited {
        transaction: StoredTransaction,
        user: StoredUser,
    },
    /// The transaction was already SUCCESS; nothing changed.
    AlreadySettled(StoredTransaction),
}

// =============================================================================
// Index Key Helpers
// =============================================================================

fn make_index_key(user_id: UserId, device_id: &str) -> Vec<u8> {
    let mut key = make_prefix(user_id);
    key.extend_from_slice(device_id.as_bytes());
    key
}

fn make_prefix(user_id: UserId) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(9 + 36);
    prefix.extend_from_slice(&user_id.to_be_bytes());
    prefix.push(b'|');
    prefix
}

/// Upper bound for a per-user range scan. Device ids are ASCII, so any key
/// with the prefix sorts below a trailing 0xFF run.
fn make_prefix_end(user_id: UserId) -> Vec<u8> {
    let mut end = make_prefix(user_id);
    end.extend_from_slice(&[0xFF; 8]);
    end
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> LedgerResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn device_ids_for<T>(table: &T, user_id: UserId) -> LedgerResult<Vec<String>>
where
    T: ReadableTable<&'static [u8], &'static str>,
{
    let prefix = make_prefix(user_id);
    let prefix_end = make_prefix_end(user_id);
    let mut ids = Vec::new();
    for entry in table.range(prefix.as_slice()..prefix_end.as_slice())? {
        let (_, device_id) = entry?;
        ids.push(device_id.value().to_string());
    }
    Ok(ids)
}

// =============================================================================
// Write-transaction steps
// =============================================================================
//
// Each step opens the tables it needs and drops them before returning, so
// steps compose freely inside one write transaction.

fn read_user_in(txn: &WriteTransaction, user_id: UserId) -> LedgerResult<Option<StoredUser>> {
    let table = txn.open_table(USERS)?;
    let bytes = match table.get(user_id)? {
        Some(value) => value.value().to_vec(),
        None => return Ok(None),
    };
    Ok(Some(decode(&bytes)?))
}

fn require_user_in(txn: &WriteTransaction, user_id: UserId) -> LedgerResult<StoredUser> {
    read_user_in(txn, user_id)?.ok_or_else(|| LedgerError::NotFound(format!("User {user_id}")))
}

fn write_user_in(txn: &WriteTransaction, user: &StoredUser) -> LedgerResult<()> {
    let json = serde_json::to_vec(user)?;
    let mut table = txn.open_table(USERS)?;
    table.insert(user.user_id, json.as_slice())?;
    Ok(())
}

/// Re-read the balance and decrement it, failing if it would go negative.
fn debit_in(txn: &WriteTransaction, user_id: UserId, amount: u64) -> LedgerResult<StoredUser> {
    let mut user = require_user_in(txn, user_id)?;
    if user.balance < amount {
        return Err(LedgerError::InsufficientBalance {
            required: amount,
            current: user.balance,
        });
    }
    user.balance -= amount;
    user.updated_at = Utc::now();
    write_user_in(txn, &user)?;
    Ok(user)
}

fn credit_in(txn: &WriteTransaction, user_id: UserId, amount: u64) -> LedgerResult<StoredUser> {
    let mut user = require_user_in(txn, user_id)?;
    user.balance = user.balance.saturating_add(amount);
    user.updated_at = Utc::now();
    write_user_in(txn, &user)?;
    Ok(user)
}

fn count_devices_in(txn: &WriteTransaction, user_id: UserId) -> LedgerResult<usize> {
    let index = txn.open_table(USER_DEVICES)?;
    Ok(device_ids_for(&index, user_id)?.len())
}

/// Read a device, treating a device owned by someone else as absent.
fn read_owned_device_in(
    txn: &WriteTransaction,
    device_id: &str,
    user_id: UserId,
) -> LedgerResult<Option<StoredDevice>> {
    let table = txn.open_table(DEVICES)?;
    let bytes = match table.get(device_id)? {
        Some(value) => value.value().to_vec(),
        None => return Ok(None),
    };
    let device: StoredDevice = decode(&bytes)?;
    Ok((device.user_id == user_id).then_some(device))
}

fn write_device_in(txn: &WriteTransaction, device: &StoredDevice) -> LedgerResult<()> {
    let json = serde_json::to_vec(device)?;
    let mut table = txn.open_table(DEVICES)?;
    table.insert(device.device_id.as_str(), json.as_slice())?;
    Ok(())
}

fn insert_device_in(txn: &WriteTransaction, device: &StoredDevice) -> LedgerResult<()> {
    {
        let table = txn.open_table(DEVICES)?;
        if table.get(device.device_id.as_str())?.is_some() {
            return Err(LedgerError::AlreadyExists(format!(
                "Device {}",
                device.device_id
            )));
        }
    }
    write_device_in(txn, device)?;
    let key = make_index_key(device.user_id, &device.device_id);
    let mut index = txn.open_table(USER_DEVICES)?;
    index.insert(key.as_slice(), device.device_id.as_str())?;
    Ok(())
}

fn ensure_device_capacity(
    txn: &WriteTransaction,
    user_id: UserId,
    max_devices: usize,
) -> LedgerResult<()> {
    if count_devices_in(txn, user_id)? >= max_devices {
        return Err(LedgerError::DeviceLimitReached { max: max_devices });
    }
    Ok(())
}

// =============================================================================
// Ledger
// =============================================================================

/// Durable record of balances, devices and top-up transactions.
pub struct Ledger {
    db: Database,
}

impl Ledger {
    /// Open (or create) the ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(DEVICES)?;
            let _ = write_txn.open_table(USER_DEVICES)?;
            let _ = write_txn.open_table(TRANSACTIONS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Cheap read used by readiness probes.
    pub fn check_readable(&self) -> LedgerResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(USERS)?;
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub fn get_user(&self, user_id: UserId) -> LedgerResult<Option<StoredUser>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        match table.get(user_id)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Fetch the user, creating it on first contact and refreshing a changed
    /// display handle.
    pub fn get_or_create_user(
        &self,
        user_id: UserId,
        username: Option<&str>,
    ) -> LedgerResult<StoredUser> {
        if let Some(user) = self.get_user(user_id)? {
            let handle_changed = username.is_some() && user.username.as_deref() != username;
            if !handle_changed {
                return Ok(user);
            }
        }

        let write_txn = self.db.begin_write()?;
        let user = match read_user_in(&write_txn, user_id)? {
            Some(mut user) => {
                if let Some(name) = username {
                    if user.username.as_deref() != Some(name) {
                        user.username = Some(name.to_string());
                        user.updated_at = Utc::now();
                        write_user_in(&write_txn, &user)?;
                    }
                }
                user
            }
            None => {
                let user = StoredUser::new(user_id, username.map(str::to_string));
                write_user_in(&write_txn, &user)?;
                tracing::info!(user_id = %user_id, "Created user record");
                user
            }
        };
        write_txn.commit()?;
        Ok(user)
    }

    /// Seed a user row directly. Used by the development login.
    pub fn put_user(&self, user: &StoredUser) -> LedgerResult<()> {
        let write_txn = self.db.begin_write()?;
        write_user_in(&write_txn, user)?;
        write_txn.commit()?;
        Ok(())
    }

    /// Atomically take the next account-handle ordinal for a user.
    pub fn reserve_device_ordinal(&self, user_id: UserId) -> LedgerResult<u32> {
        let write_txn = self.db.begin_write()?;
        let mut user = require_user_in(&write_txn, user_id)?;
        let ordinal = user.next_device_ordinal;
        user.next_device_ordinal = ordinal.saturating_add(1);
        write_user_in(&write_txn, &user)?;
        write_txn.commit()?;
        Ok(ordinal)
    }

    // =========================================================================
    // Balance
    // =========================================================================

    /// Debit `amount` if the committed balance covers it.
    pub fn debit_if_sufficient(&self, user_id: UserId, amount: u64) -> LedgerResult<StoredUser> {
        let write_txn = self.db.begin_write()?;
        let user = debit_in(&write_txn, user_id, amount)?;
        write_txn.commit()?;
        Ok(user)
    }

    pub fn credit_balance(&self, user_id: UserId, amount: u64) -> LedgerResult<StoredUser> {
        let write_txn = self.db.begin_write()?;
        let user = credit_in(&write_txn, user_id, amount)?;
        write_txn.commit()?;
        Ok(user)
    }

    // =========================================================================
    // Devices
    // =========================================================================

    pub fn count_devices(&self, user_id: UserId) -> LedgerResult<usize> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(USER_DEVICES)?;
        Ok(device_ids_for(&index, user_id)?.len())
    }

    /// All devices of a user, oldest first.
    pub fn list_devices(&self, user_id: UserId) -> LedgerResult<Vec<StoredDevice>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(USER_DEVICES)?;
        let table = read_txn.open_table(DEVICES)?;

        let mut devices = Vec::new();
        for device_id in device_ids_for(&index, user_id)? {
            if let Some(value) = table.get(device_id.as_str())? {
                devices.push(decode::<StoredDevice>(value.value())?);
            }
        }
        devices.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(devices)
    }

    /// Fetch a device only if it belongs to `user_id`.
    pub fn get_device(
        &self,
        device_id: &str,
        user_id: UserId,
    ) -> LedgerResult<Option<StoredDevice>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES)?;
        let device = match table.get(device_id)? {
            Some(value) => decode::<StoredDevice>(value.value())?,
            None => return Ok(None),
        };
        Ok((device.user_id == user_id).then_some(device))
    }

    /// Insert a trial device and consume the owner's trial in one commit.
    pub fn create_trial_device(
        &self,
        device: &StoredDevice,
        max_devices: usize,
    ) -> LedgerResult<(StoredDevice, StoredUser)> {
        let write_txn = self.db.begin_write()?;
        let mut user = require_user_in(&write_txn, device.user_id)?;
        if user.trial_used {
            return Err(LedgerError::TrialAlreadyUsed);
        }
        ensure_device_capacity(&write_txn, device.user_id, max_devices)?;

        user.trial_used = true;
        user.updated_at = Utc::now();
        write_user_in(&write_txn, &user)?;
        insert_device_in(&write_txn, device)?;
        write_txn.commit()?;
        Ok((device.clone(), user))
    }

    /// Debit `price` and insert a paid device in one commit.
    pub fn create_paid_device(
        &self,
        device: &StoredDevice,
        price: u64,
        max_devices: usize,
    ) -> LedgerResult<(StoredDevice, StoredUser)> {
        let write_txn = self.db.begin_write()?;
        ensure_device_capacity(&write_txn, device.user_id, max_devices)?;
        let user = debit_in(&write_txn, device.user_id, price)?;
        insert_device_in(&write_txn, device)?;
        write_txn.commit()?;
        Ok((device.clone(), user))
    }

    /// Debit `price` and extend an owned device by `extension` in one commit.
    ///
    /// The extension starts at the latest of `remote_expiry`, the committed
    /// `subscription_until` and now, so a renewal never lands below time that
    /// is already paid for. The device is left flagged `panel_sync_pending`
    /// until the caller has pushed the new expiry to the panel.
    pub fn renew_device(
        &self,
        device_id: &str,
        user_id: UserId,
        price: u64,
        plan_id: &str,
        extension: TimeDelta,
        remote_expiry: Option<DateTime<Utc>>,
    ) -> LedgerResult<(StoredDevice, StoredUser)> {
        let write_txn = self.db.begin_write()?;
        let mut device = read_owned_device_in(&write_txn, device_id, user_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("Device {device_id}")))?;
        let user = debit_in(&write_txn, user_id, price)?;

        let base = [remote_expiry, device.subscription_until]
            .into_iter()
            .flatten()
            .fold(Utc::now(), |latest, t| latest.max(t));
        device.subscription_until = Some(base + extension);
        device.plan_id = Some(plan_id.to_string());
        device.panel_sync_pending = true;
        device.updated_at = Utc::now();
        write_device_in(&write_txn, &device)?;
        write_txn.commit()?;
        Ok((device, user))
    }

    /// Flag an owned device as needing its expiry pushed to the panel.
    pub fn mark_panel_sync_pending(&self, device_id: &str, user_id: UserId) -> LedgerResult<()> {
        let write_txn = self.db.begin_write()?;
        let mut device = read_owned_device_in(&write_txn, device_id, user_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("Device {device_id}")))?;
        if !device.panel_sync_pending {
            device.panel_sync_pending = true;
            device.updated_at = Utc::now();
            write_device_in(&write_txn, &device)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Clear the pending flag, but only if the device still carries the
    /// expiry that was pushed. A newer renewal keeps its flag.
    ///
    /// Returns whether the flag was cleared.
    pub fn clear_panel_sync_pending(
        &self,
        device_id: &str,
        user_id: UserId,
        pushed_until: Option<DateTime<Utc>>,
    ) -> LedgerResult<bool> {
        let write_txn = self.db.begin_write()?;
        let Some(mut device) = read_owned_device_in(&write_txn, device_id, user_id)? else {
            write_txn.abort()?;
            return Ok(false);
        };
        if !device.panel_sync_pending || device.subscription_until != pushed_until {
            write_txn.abort()?;
            return Ok(false);
        }
        device.panel_sync_pending = false;
        device.updated_at = Utc::now();
        write_device_in(&write_txn, &device)?;
        write_txn.commit()?;
        Ok(true)
    }

    /// Every device whose panel account is behind the local record.
    pub fn list_pending_sync_devices(&self) -> LedgerResult<Vec<StoredDevice>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES)?;
        let mut devices = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let device: StoredDevice = decode(value.value())?;
            if device.panel_sync_pending {
                devices.push(device);
            }
        }
        Ok(devices)
    }

    /// Remove an owned device. Returns the removed row, or `None` if the
    /// device does not exist or belongs to another user.
    pub fn delete_device(
        &self,
        device_id: &str,
        user_id: UserId,
    ) -> LedgerResult<Option<StoredDevice>> {
        let write_txn = self.db.begin_write()?;
        let Some(device) = read_owned_device_in(&write_txn, device_id, user_id)? else {
            write_txn.abort()?;
            return Ok(None);
        };
        {
            let mut table = write_txn.open_table(DEVICES)?;
            table.remove(device_id)?;
            let mut index = write_txn.open_table(USER_DEVICES)?;
            let key = make_index_key(user_id, device_id);
            index.remove(key.as_slice())?;
        }
        write_txn.commit()?;
        Ok(Some(device))
    }

    // =========================================================================
    // Top-up transactions
    // =========================================================================

    /// Persist a new transaction. Order ids are unique.
    pub fn create_transaction(&self, tx: &StoredTransaction) -> LedgerResult<()> {
        let json = serde_json::to_vec(tx)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TRANSACTIONS)?;
            if table.get(tx.order_id.as_str())?.is_some() {
                return Err(LedgerError::AlreadyExists(format!(
                    "Transaction {}",
                    tx.order_id
                )));
            }
            table.insert(tx.order_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_transaction(&self, order_id: &str) -> LedgerResult<Option<StoredTransaction>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Move a transaction PENDING → SUCCESS and credit its stored amount to
    /// the owner, in one commit. A transaction that is already SUCCESS is
    /// returned unchanged.
    pub fn mark_success_once(
        &self,
        order_id: &str,
        invoice_id: Option<&str>,
    ) -> LedgerResult<PaymentSettlement> {
        let write_txn = self.db.begin_write()?;
        let mut tx: StoredTransaction = {
            let table = write_txn.open_table(TRANSACTIONS)?;
            let bytes = table
                .get(order_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("Transaction {order_id}")))?
                .value()
                .to_vec();
            decode(&bytes)?
        };

        if tx.status == TransactionStatus::Success {
            write_txn.abort()?;
            return Ok(PaymentSettlement::AlreadySettled(tx));
        }

        tx.status = TransactionStatus::Success;
        match (tx.invoice_id.as_deref(), invoice_id) {
            (None, Some(reported)) => tx.invoice_id = Some(reported.to_string()),
            (Some(stored), Some(reported)) if stored != reported => {
                tracing::warn!(
                    order_id = %order_id,
                    stored = %stored,
                    reported = %reported,
                    "Payment notification invoice id mismatch, keeping stored id"
                );
            }
            _ => {}
        }
        tx.updated_at = Utc::now();
        {
            let json = serde_json::to_vec(&tx)?;
            let mut table = write_txn.open_table(TRANSACTIONS)?;
            table.insert(order_id, json.as_slice())?;
        }
        let user = credit_in(&write_txn, tx.user_id, tx.amount)?;
        write_txn.commit()?;

        Ok(PaymentSettlement::Credited {
            transaction: tx,
            user,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    pub(crate) fn temp_ledger() -> (Ledger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&dir.path().join("ledger.redb")).unwrap();
        (ledger, dir)
    }

    fn user_with_balance(ledger: &Ledger, user_id: UserId, balance: u64) -> StoredUser {
        let mut user = ledger.get_or_create_user(user_id, Some("alice")).unwrap();
        user.balance = balance;
        ledger.put_user(&user).unwrap();
        user
    }

    fn sample_device(id: &str, user_id: UserId) -> StoredDevice {
        let now = Utc::now();
        StoredDevice {
            device_id: id.to_string(),
            user_id,
            name: format!("Device {id}"),
            account_handle: format!("user{user_id}_{id}"),
            connection_link: Some("vless://example".to_string()),
            plan_id: Some("1month".to_string()),
            subscription_until: Some(now + Duration::days(30)),
            trial_used: false,
            panel_sync_pending: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn get_or_create_user_creates_once_and_updates_handle() {
        let (ledger, _dir) = temp_ledger();
        let created = ledger.get_or_create_user(1, Some("alice")).unwrap();
        assert_eq!(created.balance, 0);
        assert!(!created.trial_used);

        let same = ledger.get_or_create_user(1, None).unwrap();
        assert_eq!(same.username.as_deref(), Some("alice"));

        let renamed = ledger.get_or_create_user(1, Some("alice2")).unwrap();
        assert_eq!(renamed.username.as_deref(), Some("alice2"));
        assert_eq!(renamed.created_at, created.created_at);
    }

    #[test]
    fn debit_rejects_overdraft_and_keeps_balance() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 50);

        let err = ledger.debit_if_sufficient(1, 99).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                required: 99,
                current: 50
            }
        ));
        assert_eq!(ledger.get_user(1).unwrap().unwrap().balance, 50);

        let after = ledger.debit_if_sufficient(1, 50).unwrap();
        assert_eq!(after.balance, 0);
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 100);
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.debit_if_sufficient(1, 30).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 3);
        assert_eq!(ledger.get_user(1).unwrap().unwrap().balance, 10);
    }

    #[test]
    fn credit_increments_balance() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 5);
        assert_eq!(ledger.credit_balance(1, 20).unwrap().balance, 25);
        assert!(matches!(
            ledger.credit_balance(2, 20),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn device_ordinals_are_monotonic() {
        let (ledger, _dir) = temp_ledger();
        ledger.get_or_create_user(1, None).unwrap();
        assert_eq!(ledger.reserve_device_ordinal(1).unwrap(), 1);
        assert_eq!(ledger.reserve_device_ordinal(1).unwrap(), 2);
        assert_eq!(ledger.reserve_device_ordinal(1).unwrap(), 3);
    }

    #[test]
    fn paid_device_commit_is_all_or_nothing() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 50);

        let err = ledger
            .create_paid_device(&sample_device("a", 1), 99, 5)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.count_devices(1).unwrap(), 0);
        assert_eq!(ledger.get_user(1).unwrap().unwrap().balance, 50);

        let (_, user) = ledger
            .create_paid_device(&sample_device("b", 1), 30, 5)
            .unwrap();
        assert_eq!(user.balance, 20);
        assert_eq!(ledger.count_devices(1).unwrap(), 1);
    }

    #[test]
    fn trial_device_consumes_trial_once() {
        let (ledger, _dir) = temp_ledger();
        ledger.get_or_create_user(1, None).unwrap();

        let (_, user) = ledger
            .create_trial_device(&sample_device("a", 1), 5)
            .unwrap();
        assert!(user.trial_used);

        let err = ledger
            .create_trial_device(&sample_device("b", 1), 5)
            .unwrap_err();
        assert!(matches!(err, LedgerError::TrialAlreadyUsed));
        assert_eq!(ledger.count_devices(1).unwrap(), 1);
    }

    #[test]
    fn device_capacity_is_enforced_in_commit() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 1000);
        for id in ["a", "b"] {
            ledger.create_paid_device(&sample_device(id, 1), 10, 2).unwrap();
        }
        let err = ledger
            .create_paid_device(&sample_device("c", 1), 10, 2)
            .unwrap_err();
        assert!(matches!(err, LedgerError::DeviceLimitReached { max: 2 }));
        assert_eq!(ledger.get_user(1).unwrap().unwrap().balance, 980);
    }

    #[test]
    fn device_access_is_scoped_to_owner() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 100);
        user_with_balance(&ledger, 2, 100);
        ledger.create_paid_device(&sample_device("a", 1), 10, 5).unwrap();

        assert!(ledger.get_device("a", 1).unwrap().is_some());
        assert!(ledger.get_device("a", 2).unwrap().is_none());
        assert!(ledger.list_devices(2).unwrap().is_empty());
        assert!(ledger.delete_device("a", 2).unwrap().is_none());
        assert!(matches!(
            ledger.renew_device("a", 2, 10, "1month", Duration::days(30), None),
            Err(LedgerError::NotFound(_))
        ));
        assert_eq!(ledger.get_user(2).unwrap().unwrap().balance, 100);

        let removed = ledger.delete_device("a", 1).unwrap().unwrap();
        assert_eq!(removed.device_id, "a");
        assert_eq!(ledger.count_devices(1).unwrap(), 0);
    }

    #[test]
    fn list_devices_is_oldest_first() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 100);
        let mut newer = sample_device("a", 1);
        newer.created_at = Utc::now();
        let mut older = sample_device("b", 1);
        older.created_at = Utc::now() - Duration::days(1);
        ledger.create_paid_device(&newer, 0, 5).unwrap();
        ledger.create_paid_device(&older, 0, 5).unwrap();

        let ids: Vec<_> = ledger
            .list_devices(1)
            .unwrap()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn renew_flags_pending_until_matching_clear() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 100);
        ledger.create_paid_device(&sample_device("a", 1), 0, 5).unwrap();

        let (device, user) = ledger
            .renew_device("a", 1, 30, "2months", Duration::days(10), None)
            .unwrap();
        let first = device.subscription_until.unwrap();
        assert_eq!(user.balance, 70);
        assert!(device.panel_sync_pending);
        assert_eq!(device.plan_id.as_deref(), Some("2months"));

        // A stale push does not clear the flag.
        let stale = Some(first - Duration::days(1));
        assert!(!ledger.clear_panel_sync_pending("a", 1, stale).unwrap());
        assert_eq!(ledger.list_pending_sync_devices().unwrap().len(), 1);

        assert!(ledger.clear_panel_sync_pending("a", 1, Some(first)).unwrap());
        assert!(ledger.list_pending_sync_devices().unwrap().is_empty());

        ledger.mark_panel_sync_pending("a", 1).unwrap();
        assert_eq!(ledger.list_pending_sync_devices().unwrap().len(), 1);
    }

    #[test]
    fn renewal_extends_from_latest_known_expiry() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 100);
        let committed = Utc::now() + Duration::days(30);
        ledger.create_paid_device(&sample_device("a", 1), 0, 5).unwrap();

        // A stale remote value never pulls the base below the committed expiry.
        let stale = Some(Utc::now() + Duration::days(2));
        let (device, _) = ledger
            .renew_device("a", 1, 10, "1month", Duration::days(30), stale)
            .unwrap();
        let after_first = device.subscription_until.unwrap();
        assert!((after_first - (committed + Duration::days(30))).num_seconds().abs() < 60);

        // A panel that is further ahead wins.
        let ahead = after_first + Duration::days(5);
        let (device, _) = ledger
            .renew_device("a", 1, 10, "1month", Duration::days(30), Some(ahead))
            .unwrap();
        assert_eq!(device.subscription_until, Some(ahead + Duration::days(30)));
    }

    #[test]
    fn renewal_of_lapsed_device_starts_now() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 100);
        let mut lapsed = sample_device("a", 1);
        lapsed.subscription_until = Some(Utc::now() - Duration::days(3));
        ledger.create_paid_device(&lapsed, 0, 5).unwrap();

        let remote = Some(Utc::now() - Duration::days(1));
        let (device, _) = ledger
            .renew_device("a", 1, 10, "1month", Duration::days(30), remote)
            .unwrap();
        let expected = Utc::now() + Duration::days(30);
        let until = device.subscription_until.unwrap();
        assert!((until - expected).num_seconds().abs() < 60);
    }

    #[test]
    fn open_reports_unusable_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = Ledger::open(&blocker.join("ledger.redb")).err().unwrap();
        assert!(matches!(err, LedgerError::Io(_)));
    }

    #[test]
    fn settlement_keeps_stored_invoice_id() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 0);
        let tx = StoredTransaction::new_pending("order-1".into(), 1, Some("inv-1".into()), 100);
        ledger.create_transaction(&tx).unwrap();

        match ledger.mark_success_once("order-1", Some("inv-forged")).unwrap() {
            PaymentSettlement::Credited { transaction, .. } => {
                assert_eq!(transaction.invoice_id.as_deref(), Some("inv-1"));
            }
            other => panic!("expected credit, got {other:?}"),
        }
        let stored = ledger.get_transaction("order-1").unwrap().unwrap();
        assert_eq!(stored.invoice_id.as_deref(), Some("inv-1"));
    }

    #[test]
    fn transaction_order_ids_are_unique() {
        let (ledger, _dir) = temp_ledger();
        ledger.get_or_create_user(1, None).unwrap();
        let tx = StoredTransaction::new_pending("order-1".into(), 1, Some("inv-1".into()), 100);
        ledger.create_transaction(&tx).unwrap();
        assert!(matches!(
            ledger.create_transaction(&tx),
            Err(LedgerError::AlreadyExists(_))
        ));
        let loaded = ledger.get_transaction("order-1").unwrap().unwrap();
        assert_eq!(loaded.status, TransactionStatus::Pending);
    }

    #[test]
    fn mark_success_once_credits_exactly_once() {
        let (ledger, _dir) = temp_ledger();
        user_with_balance(&ledger, 1, 10);
        let tx = StoredTransaction::new_pending("order-1".into(), 1, None, 100);
        ledger.create_transaction(&tx).unwrap();

        let first = ledger.mark_success_once("order-1", Some("inv-9")).unwrap();
        match first {
            PaymentSettlement::Credited { transaction, user } => {
                assert_eq!(transaction.status, TransactionStatus::Success);
                assert_eq!(transaction.invoice_id.as_deref(), Some("inv-9"));
                assert_eq!(user.balance, 110);
            }
            other => panic!("expected credit, got {other:?}"),
        }

        let second = ledger.mark_success_once("order-1", Some("inv-9")).unwrap();
        assert!(matches!(second, PaymentSettlement::AlreadySettled(_)));
        assert_eq!(ledger.get_user(1).unwrap().unwrap().balance, 110);

        assert!(matches!(
            ledger.mark_success_once("missing", None),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn index_keys_do_not_cross_users() {
        let key = make_index_key(1, "zzz");
        assert!(key.as_slice() < make_prefix_end(1).as_slice());
        assert!(key.as_slice() >= make_prefix(1).as_slice());
        assert!(key.as_slice() < make_prefix(2).as_slice());
    }
}
