// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::billing::{Plan, PLANS};

#[derive(Debug, Serialize, ToSchema)]
pub struct PlanListResponse {
    pub plans: Vec<Plan>,
}

/// Purchasable subscription plans.
#[utoipa::path(
    get,
    path = "/v1/plans",
    tag = "Billing",
    responses(
        (status = 200, description = "Plan table", body = PlanListResponse)
    )
)]
pub async fn list_plans() -> Json<PlanListResponse> {
    Json(PlanListResponse {
        plans: PLANS.to_vec(),
    })
}
