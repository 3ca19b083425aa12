// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! VPN Billing Server - balance ledger and panel provisioning
//!
//! Sells VPN access to users of a messaging mini-app. Keeps user balances,
//! device subscriptions and accounts on a remote provisioning panel
//! consistent when any of the three calls in a flow fails.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Launch-token (initData) authentication
//! - `billing` - Plans and the reconciliation engine
//! - `providers` - Provisioning panel and payment processor clients
//! - `storage` - Durable ledger (redb)
//! - `sync_worker` - Background re-push of pending panel expiries

pub mod api;
pub mod auth;
pub mod billing;
pub mod config;
pub mod error;
pub mod providers;
pub mod state;
pub mod storage;
pub mod sync_worker;
