// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Billing: plan table, error taxonomy and the provisioning reconciler.

pub mod error;
pub mod plans;
pub mod reconciler;
#[cfg(test)]
pub(crate) mod testing;

pub use error::{BillingError, BillingResult};
pub use plans::{find_plan, Plan, PLANS};
pub use reconciler::{
    AddDeviceOutcome, BillingSettings, DeleteOutcome, DeviceListing, DeviceView, PanelStatus,
    Reconciler, RenewOutcome, SyncSweep, TopUpOutcome, UpstreamSync, UserStatus, WebhookOutcome,
};
