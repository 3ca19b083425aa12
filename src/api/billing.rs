// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Billing endpoints: plan renewal and balance top-up.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::devices::DeviceResponse;
use crate::auth::Auth;
use crate::billing::{Plan, RenewOutcome, TopUpOutcome, UpstreamSync};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub device_id: String,
    pub plan_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscribeResponse {
    pub device: DeviceResponse,
    pub plan: Plan,
    /// Balance after the charge.
    pub balance: u64,
    /// Whether the panel already carries the new expiry.
    pub upstream: UpstreamSync,
}

impl From<RenewOutcome> for SubscribeResponse {
    fn from(outcome: RenewOutcome) -> Self {
        Self {
            device: outcome.device.into(),
            plan: *outcome.plan,
            balance: outcome.balance,
            upstream: outcome.upstream,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TopUpRequest {
    /// Whole currency units, 10 to 100000 inclusive.
    pub amount: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TopUpResponse {
    pub order_id: String,
    /// Hosted payment page.
    pub url: String,
    pub amount: u64,
}

impl From<TopUpOutcome> for TopUpResponse {
    fn from(outcome: TopUpOutcome) -> Self {
        Self {
            order_id: outcome.order_id,
            url: outcome.payment_url,
            amount: outcome.amount,
        }
    }
}

/// Renew a device with a plan, charged from the balance.
#[utoipa::path(
    post,
    path = "/v1/billing/subscribe",
    tag = "Billing",
    request_body = SubscribeRequest,
    security(("tma" = [])),
    responses(
        (status = 200, description = "Device renewed", body = SubscribeResponse),
        (status = 400, description = "Unknown plan or invalid body"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Insufficient balance"),
        (status = 404, description = "Device not found")
    )
)]
pub async fn subscribe(
    Auth(user): Auth,
    State(state): State<AppState>,
    body: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let Json(request) = body?;
    let outcome = state
        .reconciler
        .renew(user.user_id, &request.device_id, &request.plan_id)
        .await?;
    Ok(Json(outcome.into()))
}

/// Start a balance top-up and return the hosted payment page.
#[utoipa::path(
    post,
    path = "/v1/billing/topup",
    tag = "Billing",
    request_body = TopUpRequest,
    security(("tma" = [])),
    responses(
        (status = 200, description = "Invoice created", body = TopUpResponse),
        (status = 400, description = "Amount out of range"),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "Payment processor unavailable")
    )
)]
pub async fn top_up(
    Auth(user): Auth,
    State(state): State<AppState>,
    body: Result<Json<TopUpRequest>, JsonRejection>,
) -> Result<Json<TopUpResponse>, ApiError> {
    let Json(request) = body?;
    let outcome = state.reconciler.top_up(user.user_id, request.amount).await?;
    Ok(Json(outcome.into()))
}
