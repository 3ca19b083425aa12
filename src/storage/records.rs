// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Platform-assigned user identifier (stable, unique).
pub type UserId = i64;

/// Persisted user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StoredUser {
    /// Platform user identifier.
    pub user_id: UserId,
    /// Optional display handle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Balance in currency minor units.
    pub balance: u64,
    /// Whether the one-time free trial has been consumed. Never reverts.
    pub trial_used: bool,
    /// Next ordinal used to derive a panel account handle.
    #[serde(default = "first_ordinal")]
    pub next_device_ordinal: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn first_ordinal() -> u32 {
    1
}

impl StoredUser {
    pub fn new(user_id: UserId, username: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            username,
            balance: 0,
            trial_used: false,
            next_device_ordinal: first_ordinal(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persisted device row.
///
/// A device is the local record of one remote panel account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StoredDevice {
    /// Unique device identifier.
    pub device_id: String,
    /// Owning user.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Remote panel account handle (`user{user_id}_{ordinal}`).
    pub account_handle: String,
    /// Preferred connection link returned by the panel at creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_link: Option<String>,
    /// Plan of the most recent purchase, `None` for trial devices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// End of the paid or trial window. `None` means never provisioned.
    pub subscription_until: Option<DateTime<Utc>>,
    /// Whether this device was created from the one-time trial.
    pub trial_used: bool,
    /// Set when the panel has not yet received the latest local expiry.
    #[serde(default)]
    pub panel_sync_pending: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredDevice {
    /// Whether the subscription window is still open at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.subscription_until.is_some_and(|until| until > now)
    }
}

/// Top-up transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Invoice issued, payment not yet confirmed.
    Pending,
    /// Payment confirmed and balance credited. Terminal.
    Success,
}

/// Persisted top-up transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StoredTransaction {
    /// Order identifier generated by this service (unique).
    pub order_id: String,
    /// Owning user.
    pub user_id: UserId,
    /// Payment processor invoice identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    /// Amount in currency minor units.
    pub amount: u64,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredTransaction {
    pub fn new_pending(
        order_id: String,
        user_id: UserId,
        invoice_id: Option<String>,
        amount: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            user_id,
            invoice_id,
            amount,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
