// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Upstream service clients.
//!
//! - `panel` - remote VPN provisioning panel (account lifecycle)
//! - `lava` - payment processor (invoices and completion notifications)

pub mod lava;
pub mod panel;

pub use lava::{LavaClient, LavaConfig, LavaNotification, PaymentError, PaymentGateway};
pub use panel::{PanelClient, PanelConfig, PanelError, ProvisioningPanel, TokenCache};
