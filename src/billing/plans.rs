// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Subscription plan table.
//!
//! Device creation and renewal both resolve plans through [`find_plan`], so
//! the two call sites can never disagree on price or duration.

use serde::Serialize;
use utoipa::ToSchema;

/// A purchasable subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Plan {
    /// Stable plan identifier used by clients.
    #[schema(value_type = String)]
    pub id: &'static str,
    /// Price in currency minor units.
    pub price: u64,
    /// Subscription length in days.
    pub days: u32,
}

pub const PLANS: &[Plan] = &[
    Plan {
        id: "1month",
        price: 99,
        days: 30,
    },
    Plan {
        id: "2months",
        price: 169,
        days: 60,
    },
    Plan {
        id: "3months",
        price: 249,
        days: 90,
    },
];

/// Look up a plan by identifier.
pub fn find_plan(plan_id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|plan| plan.id == plan_id.trim())
}
