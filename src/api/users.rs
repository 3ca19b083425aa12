// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints.

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Auth, AuthenticatedUser};
use crate::billing::UserStatus;
use crate::error::ApiError;
use crate::state::AppState;

/// Response for GET /v1/user/status
#[derive(Debug, Serialize, ToSchema)]
pub struct UserStatusResponse {
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub balance: u64,
    pub trial_used: bool,
    pub device_count: usize,
    pub active_devices: usize,
    pub max_devices: usize,
    pub can_add_device: bool,
}

impl From<UserStatus> for UserStatusResponse {
    fn from(status: UserStatus) -> Self {
        Self {
            user_id: status.user.user_id,
            username: status.user.username,
            balance: status.user.balance,
            trial_used: status.user.trial_used,
            device_count: status.device_count,
            active_devices: status.active_devices,
            max_devices: status.max_devices,
            can_add_device: status.device_count < status.max_devices,
        }
    }
}

/// Authenticate with a launch token.
///
/// Creates the user on first contact.
#[utoipa::path(
    post,
    path = "/v1/auth",
    tag = "Users",
    security(("tma" = [])),
    responses(
        (status = 200, description = "Authenticated user", body = AuthenticatedUser),
        (status = 401, description = "Unauthorized - invalid or missing launch token"),
    )
)]
pub async fn login(Auth(user): Auth) -> Json<AuthenticatedUser> {
    Json(user)
}

/// Balance, trial and device counters of the current user.
#[utoipa::path(
    get,
    path = "/v1/user/status",
    tag = "Users",
    security(("tma" = [])),
    responses(
        (status = 200, description = "User status", body = UserStatusResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
pub async fn user_status(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<UserStatusResponse>, ApiError> {
    let status = state.reconciler.user_status(user.user_id)?;
    Ok(Json(status.into()))
}
