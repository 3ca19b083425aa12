// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authenticated user representation.

use serde::Serialize;
use utoipa::ToSchema;

use crate::storage::{StoredUser, UserId};

/// Identity and billing snapshot resolved by the authentication gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Platform user identifier.
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Balance at authentication time.
    pub balance: u64,
    pub trial_used: bool,
}

impl From<StoredUser> for AuthenticatedUser {
    fn from(user: StoredUser) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username,
            balance: user.balance,
            trial_used: user.trial_used,
        }
    }
}
