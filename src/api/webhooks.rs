// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment processor callbacks.
//!
//! Authenticated by the notification signature, not by a launch token.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::billing::WebhookOutcome;
use crate::error::ApiError;
use crate::providers::LavaNotification;
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub ok: bool,
    /// `ignored`, `credited` or `already_processed`.
    pub outcome: String,
}

impl From<WebhookOutcome> for WebhookAck {
    fn from(outcome: WebhookOutcome) -> Self {
        let outcome = match outcome {
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Credited { .. } => "credited",
            WebhookOutcome::AlreadyProcessed { .. } => "already_processed",
        };
        Self {
            ok: true,
            outcome: outcome.to_string(),
        }
    }
}

/// Payment completion notification.
#[utoipa::path(
    post,
    path = "/v1/webhooks/lava",
    tag = "Webhooks",
    request_body = LavaNotification,
    responses(
        (status = 200, description = "Notification accepted", body = WebhookAck),
        (status = 403, description = "Signature mismatch"),
        (status = 404, description = "Unknown order")
    )
)]
pub async fn lava_webhook(
    State(state): State<AppState>,
    body: Result<Json<LavaNotification>, JsonRejection>,
) -> Result<Json<WebhookAck>, ApiError> {
    let Json(notification) = body?;
    let outcome = state.reconciler.handle_webhook(&notification).await?;
    Ok(Json(outcome.into()))
}
