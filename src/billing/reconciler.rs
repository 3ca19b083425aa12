// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provisioning reconciler.
//!
//! Sequences every billable action across the ledger, the provisioning panel
//! and the payment processor:
//!
//! - Money moves only in the same ledger commit as the device row it pays for.
//! - Panel accounts are created before any ledger mutation, so a provisioning
//!   failure never charges the user.
//! - Panel pushes that happen after a commit are best effort. A failed push
//!   leaves the device flagged `panel_sync_pending` and is reported as
//!   [`UpstreamSync::Pending`] instead of an error.
//!
//! Panel and payment calls never run inside a ledger write transaction.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::{BillingError, BillingResult};
use super::plans::{find_plan, Plan};
use crate::providers::lava::{signed_text, InvoiceRequest, LavaNotification, PaymentGateway};
use crate::providers::panel::{AccountStatus, AccountUpdate, NewAccount, ProvisioningPanel};
use crate::storage::{
    Ledger, PaymentSettlement, StoredDevice, StoredTransaction, StoredUser, UserId,
};

pub const MIN_TOP_UP: i64 = 10;
pub const MAX_TOP_UP: i64 = 100_000;
const MAX_DEVICE_NAME_CHARS: usize = 64;
const SECONDS_PER_DAY: i64 = 86_400;

/// Tunables for billing behaviour.
#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub max_devices: usize,
    pub trial_days: u32,
    /// Public base URL used for payment callback and return links.
    pub public_url: String,
    /// Reject payment notifications that carry no signature.
    pub require_signature: bool,
}

/// Whether the panel reflects a change that already committed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpstreamSync {
    Synced,
    Pending { reason: String },
}

impl UpstreamSync {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }
}

/// Panel-side view of a device, as seen on the last read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PanelStatus {
    Active,
    Disabled,
    Limited,
    Expired,
    OnHold,
    /// The panel has no account for this device.
    Missing,
    /// The panel could not be reached.
    Unknown,
}

impl From<AccountStatus> for PanelStatus {
    fn from(status: AccountStatus) -> Self {
        match status {
            AccountStatus::Active => Self::Active,
            AccountStatus::Disabled => Self::Disabled,
            AccountStatus::Limited => Self::Limited,
            AccountStatus::Expired => Self::Expired,
            AccountStatus::OnHold => Self::OnHold,
            AccountStatus::Unknown => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AddDeviceOutcome {
    pub device: StoredDevice,
    pub connection_link: Option<String>,
    pub links: Vec<String>,
    pub subscription_url: Option<String>,
    pub trial: bool,
    pub balance: u64,
}

#[derive(Debug, Clone)]
pub struct RenewOutcome {
    pub device: StoredDevice,
    pub plan: &'static Plan,
    pub balance: u64,
    pub upstream: UpstreamSync,
}

#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub device: StoredDevice,
    /// Whole paid days left at deletion, rounded up.
    pub remaining_days: i64,
    pub remaining_until: Option<DateTime<Utc>>,
    /// The deleted device consumed the one-time trial, which does not return.
    pub trial_notice: bool,
    pub upstream: UpstreamSync,
}

#[derive(Debug, Clone)]
pub struct TopUpOutcome {
    pub order_id: String,
    pub payment_url: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Not a completion event; nothing changed.
    Ignored,
    Credited {
        order_id: String,
        amount: u64,
        balance: u64,
    },
    /// Replay of an order that was already credited.
    AlreadyProcessed { order_id: String },
}

#[derive(Debug, Clone)]
pub struct DeviceView {
    pub device: StoredDevice,
    pub is_active: bool,
    pub panel_status: PanelStatus,
    pub used_traffic: Option<u64>,
    pub links: Vec<String>,
    pub subscription_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeviceListing {
    pub devices: Vec<DeviceView>,
    pub max_devices: usize,
    pub can_add: bool,
}

#[derive(Debug, Clone)]
pub struct UserStatus {
    pub user: StoredUser,
    pub device_count: usize,
    pub active_devices: usize,
    pub max_devices: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSweep {
    pub attempted: usize,
    pub synced: usize,
}

enum Grant {
    Trial { until: DateTime<Utc> },
    Paid { plan: &'static Plan, until: DateTime<Utc> },
}

impl Grant {
    fn until(&self) -> DateTime<Utc> {
        match self {
            Self::Trial { until } | Self::Paid { until, .. } => *until,
        }
    }
}

fn days(n: u32) -> TimeDelta {
    TimeDelta::days(i64::from(n))
}

fn ceil_days(remaining: TimeDelta) -> i64 {
    let secs = remaining.num_seconds().max(0);
    (secs + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
}

fn account_handle(user_id: UserId, ordinal: u32) -> String {
    format!("user{user_id}_{ordinal}")
}

pub struct Reconciler {
    ledger: Arc<Ledger>,
    panel: Arc<dyn ProvisioningPanel>,
    payments: Arc<dyn PaymentGateway>,
    settings: BillingSettings,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<Ledger>,
        panel: Arc<dyn ProvisioningPanel>,
        payments: Arc<dyn PaymentGateway>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            ledger,
            panel,
            payments,
            settings,
        }
    }

    pub fn settings(&self) -> &BillingSettings {
        &self.settings
    }

    fn require_user(&self, user_id: UserId) -> BillingResult<StoredUser> {
        self.ledger
            .get_user(user_id)?
            .ok_or_else(|| BillingError::NotFound(format!("User {user_id}")))
    }

    // =========================================================================
    // Add device
    // =========================================================================

    pub async fn add_device(
        &self,
        user_id: UserId,
        name: Option<&str>,
        plan_id: Option<&str>,
    ) -> BillingResult<AddDeviceOutcome> {
        let user = self.require_user(user_id)?;
        let count = self.ledger.count_devices(user_id)?;
        if count >= self.settings.max_devices {
            return Err(BillingError::DeviceLimitReached {
                max: self.settings.max_devices,
            });
        }

        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) if n.chars().count() > MAX_DEVICE_NAME_CHARS => {
                return Err(BillingError::Validation(format!(
                    "Device name must be at most {MAX_DEVICE_NAME_CHARS} characters"
                )));
            }
            Some(n) => n.to_string(),
            None => format!("Device {}", count + 1),
        };

        let now = Utc::now();
        let grant = if !user.trial_used {
            Grant::Trial {
                until: now + days(self.settings.trial_days),
            }
        } else {
            let plan_id = plan_id
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or(BillingError::PlanRequired)?;
            let plan =
                find_plan(plan_id).ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))?;
            if user.balance < plan.price {
                return Err(BillingError::InsufficientBalance {
                    required: plan.price,
                    current: user.balance,
                });
            }
            Grant::Paid {
                plan,
                until: now + days(plan.days),
            }
        };

        let ordinal = self.ledger.reserve_device_ordinal(user_id)?;
        let handle = account_handle(user_id, ordinal);
        let until = grant.until();

        let account = self
            .panel
            .create_account(
                &handle,
                NewAccount {
                    expire: until.timestamp(),
                    status: AccountStatus::Active,
                },
            )
            .await?;

        let device = StoredDevice {
            device_id: Uuid::new_v4().to_string(),
            user_id,
            name,
            account_handle: handle.clone(),
            connection_link: account.preferred_link(),
            plan_id: match &grant {
                Grant::Paid { plan, .. } => Some(plan.id.to_string()),
                Grant::Trial { .. } => None,
            },
            subscription_until: Some(until),
            trial_used: matches!(grant, Grant::Trial { .. }),
            panel_sync_pending: false,
            created_at: now,
            updated_at: now,
        };

        let committed = match &grant {
            Grant::Trial { .. } => self
                .ledger
                .create_trial_device(&device, self.settings.max_devices),
            Grant::Paid { plan, .. } => {
                self.ledger
                    .create_paid_device(&device, plan.price, self.settings.max_devices)
            }
        };
        let (device, user) = match committed {
            Ok(rows) => rows,
            Err(e) => {
                warn!(user_id = %user_id, handle = %handle, error = %e, "Device commit failed after panel account creation");
                self.remove_orphaned_account(&handle).await;
                return Err(e.into());
            }
        };

        info!(
            user_id = %user_id,
            device_id = %device.device_id,
            handle = %handle,
            trial = device.trial_used,
            until = %until,
            "Device provisioned"
        );

        Ok(AddDeviceOutcome {
            connection_link: device.connection_link.clone(),
            links: account.links,
            subscription_url: account.subscription_url,
            trial: device.trial_used,
            balance: user.balance,
            device,
        })
    }

    async fn remove_orphaned_account(&self, handle: &str) {
        match self.panel.delete_account(handle).await {
            Ok(()) => info!(handle = %handle, "Removed orphaned panel account"),
            Err(e) => {
                error!(handle = %handle, error = %e, "Failed to remove orphaned panel account")
            }
        }
    }

    // =========================================================================
    // Renew
    // =========================================================================

    pub async fn renew(
        &self,
        user_id: UserId,
        device_id: &str,
        plan_id: &str,
    ) -> BillingResult<RenewOutcome> {
        let plan =
            find_plan(plan_id).ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))?;
        let device = self
            .ledger
            .get_device(device_id, user_id)?
            .ok_or_else(|| BillingError::NotFound(format!("Device {device_id}")))?;
        let user = self.require_user(user_id)?;
        if user.balance < plan.price {
            return Err(BillingError::InsufficientBalance {
                required: plan.price,
                current: user.balance,
            });
        }

        let remote_expiry = match self.panel.get_account(&device.account_handle).await {
            Ok(Some(account)) => account.expires_at(),
            Ok(None) => {
                warn!(handle = %device.account_handle, "Panel account missing during renewal");
                None
            }
            Err(e) => {
                warn!(handle = %device.account_handle, error = %e, "Panel expiry unavailable, renewing from ledger");
                None
            }
        };

        // The base is resolved inside the write transaction so a concurrent
        // renewal of the same device stacks on top of this one.
        let (device, user) = self.ledger.renew_device(
            device_id,
            user_id,
            plan.price,
            plan.id,
            days(plan.days),
            remote_expiry,
        )?;
        info!(
            user_id = %user_id,
            device_id = %device_id,
            plan = plan.id,
            until = ?device.subscription_until,
            "Device renewed"
        );

        let upstream = self.sync_device_expiry(&device).await;
        Ok(RenewOutcome {
            device: StoredDevice {
                panel_sync_pending: !upstream.is_synced(),
                ..device
            },
            plan,
            balance: user.balance,
            upstream,
        })
    }

    /// Push the locally committed expiry of `device` to the panel and clear
    /// its pending flag on success.
    pub async fn sync_device_expiry(&self, device: &StoredDevice) -> UpstreamSync {
        let Some(until) = device.subscription_until else {
            return UpstreamSync::Synced;
        };
        let update = AccountUpdate {
            expire: Some(until.timestamp()),
            status: (until > Utc::now()).then_some(AccountStatus::Active),
            data_limit: None,
        };

        if let Err(e) = self
            .panel
            .update_account(&device.account_handle, update)
            .await
        {
            warn!(
                device_id = %device.device_id,
                handle = %device.account_handle,
                error = %e,
                "Panel expiry push failed, left pending"
            );
            return UpstreamSync::Pending {
                reason: "provisioning panel unreachable, expiry will be re-sent".to_string(),
            };
        }

        if let Err(e) =
            self.ledger
                .clear_panel_sync_pending(&device.device_id, device.user_id, Some(until))
        {
            warn!(device_id = %device.device_id, error = %e, "Failed to clear panel sync flag");
        }
        UpstreamSync::Synced
    }

    /// Re-push every device whose panel account is behind the ledger.
    pub async fn resync_pending(&self) -> BillingResult<SyncSweep> {
        let pending = self.ledger.list_pending_sync_devices()?;
        let mut sweep = SyncSweep::default();
        for device in &pending {
            sweep.attempted += 1;
            if self.sync_device_expiry(device).await.is_synced() {
                sweep.synced += 1;
            }
        }
        Ok(sweep)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    pub async fn delete_device(
        &self,
        user_id: UserId,
        device_id: &str,
    ) -> BillingResult<DeleteOutcome> {
        let device = self
            .ledger
            .get_device(device_id, user_id)?
            .ok_or_else(|| BillingError::NotFound(format!("Device {device_id}")))?;

        let now = Utc::now();
        let remaining_until = device.subscription_until.filter(|t| *t > now);
        let remaining_days = remaining_until.map_or(0, |t| ceil_days(t - now));

        let upstream = match self.panel.delete_account(&device.account_handle).await {
            Ok(()) => UpstreamSync::Synced,
            Err(e) => {
                warn!(handle = %device.account_handle, error = %e, "Panel account delete failed");
                UpstreamSync::Pending {
                    reason: "provisioning panel unreachable, remote account not removed"
                        .to_string(),
                }
            }
        };

        let device = self
            .ledger
            .delete_device(device_id, user_id)?
            .ok_or_else(|| BillingError::NotFound(format!("Device {device_id}")))?;
        info!(user_id = %user_id, device_id = %device_id, remaining_days, "Device deleted");

        Ok(DeleteOutcome {
            trial_notice: device.trial_used,
            device,
            remaining_days,
            remaining_until,
            upstream,
        })
    }

    // =========================================================================
    // Top-up and payment notifications
    // =========================================================================

    pub async fn top_up(&self, user_id: UserId, amount: i64) -> BillingResult<TopUpOutcome> {
        if !(MIN_TOP_UP..=MAX_TOP_UP).contains(&amount) {
            return Err(BillingError::Validation(format!(
                "Amount must be between {MIN_TOP_UP} and {MAX_TOP_UP}"
            )));
        }
        let amount = amount.unsigned_abs();

        let order_id = Uuid::new_v4().to_string();
        let base = self.settings.public_url.trim_end_matches('/');
        let hook_url = format!("{base}/v1/webhooks/lava");
        let success_url = format!("{base}/payment/success");

        let invoice = self
            .payments
            .create_invoice(InvoiceRequest {
                order_id: &order_id,
                amount,
                hook_url: &hook_url,
                success_url: &success_url,
            })
            .await?;

        let tx = StoredTransaction::new_pending(
            order_id.clone(),
            user_id,
            Some(invoice.id.clone()),
            amount,
        );
        self.ledger.create_transaction(&tx)?;
        info!(user_id = %user_id, order_id = %order_id, amount, "Top-up invoice issued");

        Ok(TopUpOutcome {
            order_id,
            payment_url: invoice.url,
            amount,
        })
    }

    pub async fn handle_webhook(
        &self,
        notification: &LavaNotification,
    ) -> BillingResult<WebhookOutcome> {
        if !notification.is_success() {
            debug!(status = %notification.status, "Ignoring non-success payment notification");
            return Ok(WebhookOutcome::Ignored);
        }

        match notification.signature() {
            Some(sign) => {
                let verified = self.payments.verify_notification(
                    notification.invoice_id.as_deref().unwrap_or_default(),
                    &signed_text(&notification.amount),
                    &signed_text(&notification.pay_time),
                    sign,
                );
                if !verified {
                    warn!(order_id = ?notification.order_id, "Payment notification signature mismatch");
                    return Err(BillingError::InvalidSignature);
                }
            }
            None if self.settings.require_signature => {
                warn!(order_id = ?notification.order_id, "Unsigned payment notification rejected");
                return Err(BillingError::InvalidSignature);
            }
            None => {
                warn!(order_id = ?notification.order_id, "Accepting unsigned payment notification");
            }
        }

        let order_id = notification
            .order_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BillingError::Validation("order_id is required".to_string()))?;

        match self
            .ledger
            .mark_success_once(order_id, notification.invoice_id.as_deref())?
        {
            PaymentSettlement::Credited { transaction, user } => {
                info!(
                    order_id = %order_id,
                    user_id = %user.user_id,
                    amount = transaction.amount,
                    "Top-up credited"
                );
                Ok(WebhookOutcome::Credited {
                    order_id: transaction.order_id,
                    amount: transaction.amount,
                    balance: user.balance,
                })
            }
            PaymentSettlement::AlreadySettled(transaction) => {
                debug!(order_id = %order_id, "Payment notification replayed");
                Ok(WebhookOutcome::AlreadyProcessed {
                    order_id: transaction.order_id,
                })
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Devices with their live panel state. Pending expiry pushes are retried
    /// on the way.
    pub async fn list_devices(&self, user_id: UserId) -> BillingResult<DeviceListing> {
        let devices = self.ledger.list_devices(user_id)?;
        let now = Utc::now();
        let mut panel_reachable = true;
        let mut views = Vec::with_capacity(devices.len());

        for mut device in devices {
            if panel_reachable
                && device.panel_sync_pending
                && self.sync_device_expiry(&device).await.is_synced()
            {
                device.panel_sync_pending = false;
            }

            let remote = if panel_reachable {
                match self.panel.get_account(&device.account_handle).await {
                    Ok(account) => Some(account),
                    Err(e) => {
                        warn!(handle = %device.account_handle, error = %e, "Panel read failed");
                        panel_reachable = false;
                        None
                    }
                }
            } else {
                None
            };

            let stored_links: Vec<String> = device.connection_link.iter().cloned().collect();
            let view = match remote {
                Some(Some(account)) => DeviceView {
                    is_active: device.is_active_at(now),
                    panel_status: account.status.into(),
                    used_traffic: Some(account.used_traffic),
                    links: account.links,
                    subscription_url: account.subscription_url,
                    device,
                },
                Some(None) => DeviceView {
                    is_active: device.is_active_at(now),
                    panel_status: PanelStatus::Missing,
                    used_traffic: None,
                    links: Vec::new(),
                    subscription_url: None,
                    device,
                },
                None => DeviceView {
                    is_active: device.is_active_at(now),
                    panel_status: PanelStatus::Unknown,
                    used_traffic: None,
                    links: stored_links,
                    subscription_url: None,
                    device,
                },
            };
            views.push(view);
        }

        Ok(DeviceListing {
            can_add: views.len() < self.settings.max_devices,
            max_devices: self.settings.max_devices,
            devices: views,
        })
    }

    pub fn user_status(&self, user_id: UserId) -> BillingResult<UserStatus> {
        let user = self.require_user(user_id)?;
        let devices = self.ledger.list_devices(user_id)?;
        let now = Utc::now();
        Ok(UserStatus {
            device_count: devices.len(),
            active_devices: devices.iter().filter(|d| d.is_active_at(now)).count(),
            max_devices: self.settings.max_devices,
            user,
        })
    }
}
