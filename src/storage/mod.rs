// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger & Subscription Store
//!
//! Durable record of user balances, devices and top-up transactions, kept in
//! a single embedded redb file under `DATA_DIR`.
//!
//! ## Storage Layout
//!
//! ```text
//! $DATA_DIR/
//!   ledger.redb     # users, devices, user_devices index, transactions
//! ```
//!
//! ## Guarantees
//!
//! - Device reads and writes always filter by `(device_id, user_id)`; a
//!   device owned by another user is indistinguishable from a missing one.
//! - A balance debit and the device mutation it pays for commit together or
//!   not at all.
//! - A top-up transaction moves PENDING → SUCCESS at most once.

pub mod ledger;
pub mod records;

pub use ledger::{Ledger, LedgerError, LedgerResult, PaymentSettlement};
pub use records::{StoredDevice, StoredTransaction, StoredUser, TransactionStatus, UserId};
