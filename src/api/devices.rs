// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Auth;
use crate::billing::{
    AddDeviceOutcome, DeleteOutcome, DeviceListing, DeviceView, PanelStatus, UpstreamSync,
};
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::StoredDevice;

const TRIAL_NOTICE: &str =
    "This device used your free trial. The trial is one-time and will not be available again.";

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateDeviceRequest {
    /// Display name; defaults to "Device N".
    #[serde(default)]
    pub name: Option<String>,
    /// Required once the free trial has been used.
    #[serde(default)]
    pub plan_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceResponse {
    pub device_id: String,
    pub name: String,
    pub account_handle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    pub subscription_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub trial_used: bool,
    /// The panel has not yet received the latest expiry.
    pub panel_sync_pending: bool,
    /// Live panel status; absent when the panel was not consulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel_status: Option<PanelStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_traffic: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_link: Option<String>,
    pub links: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<StoredDevice> for DeviceResponse {
    fn from(device: StoredDevice) -> Self {
        Self {
            is_active: device.is_active_at(Utc::now()),
            links: device.connection_link.iter().cloned().collect(),
            device_id: device.device_id,
            name: device.name,
            account_handle: device.account_handle,
            plan_id: device.plan_id,
            subscription_until: device.subscription_until,
            trial_used: device.trial_used,
            panel_sync_pending: device.panel_sync_pending,
            panel_status: None,
            used_traffic: None,
            connection_link: device.connection_link,
            subscription_url: None,
            created_at: device.created_at,
        }
    }
}

impl From<DeviceView> for DeviceResponse {
    fn from(view: DeviceView) -> Self {
        Self {
            is_active: view.is_active,
            panel_status: Some(view.panel_status),
            used_traffic: view.used_traffic,
            links: view.links,
            subscription_url: view.subscription_url,
            ..DeviceResponse::from(view.device)
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceResponse>,
    pub max_devices: usize,
    pub can_add: bool,
}

impl From<DeviceListing> for DeviceListResponse {
    fn from(listing: DeviceListing) -> Self {
        Self {
            devices: listing.devices.into_iter().map(Into::into).collect(),
            max_devices: listing.max_devices,
            can_add: listing.can_add,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateDeviceResponse {
    pub device: DeviceResponse,
    /// Preferred connection link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_link: Option<String>,
    pub trial: bool,
    /// Balance after any plan charge.
    pub balance: u64,
}

impl From<AddDeviceOutcome> for CreateDeviceResponse {
    fn from(outcome: AddDeviceOutcome) -> Self {
        let mut device = DeviceResponse::from(outcome.device);
        device.links = outcome.links;
        device.subscription_url = outcome.subscription_url;
        Self {
            device,
            connection_link: outcome.connection_link,
            trial: outcome.trial,
            balance: outcome.balance,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteDeviceResponse {
    pub device_id: String,
    /// Paid days forfeited by the deletion, rounded up.
    pub remaining_days: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_notice: Option<String>,
    pub upstream: UpstreamSync,
}

impl From<DeleteOutcome> for DeleteDeviceResponse {
    fn from(outcome: DeleteOutcome) -> Self {
        Self {
            device_id: outcome.device.device_id,
            remaining_days: outcome.remaining_days,
            remaining_until: outcome.remaining_until,
            trial_notice: outcome.trial_notice.then(|| TRIAL_NOTICE.to_string()),
            upstream: outcome.upstream,
        }
    }
}

/// List the current user's devices with live panel state.
#[utoipa::path(
    get,
    path = "/v1/devices",
    tag = "Devices",
    security(("tma" = [])),
    responses(
        (status = 200, description = "Devices", body = DeviceListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_devices(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<DeviceListResponse>, ApiError> {
    let listing = state.reconciler.list_devices(user.user_id).await?;
    Ok(Json(listing.into()))
}

/// Provision a new device: a free trial on first use, a paid plan afterwards.
#[utoipa::path(
    post,
    path = "/v1/devices",
    tag = "Devices",
    request_body = CreateDeviceRequest,
    security(("tma" = [])),
    responses(
        (status = 201, description = "Device provisioned", body = CreateDeviceResponse),
        (status = 400, description = "Validation, device limit or plan error"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Insufficient balance"),
        (status = 502, description = "Provisioning panel unavailable")
    )
)]
pub async fn create_device(
    Auth(user): Auth,
    State(state): State<AppState>,
    body: Result<Json<CreateDeviceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateDeviceResponse>), ApiError> {
    let Json(request) = body?;
    let outcome = state
        .reconciler
        .add_device(
            user.user_id,
            request.name.as_deref(),
            request.plan_id.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

/// Delete a device and its panel account.
#[utoipa::path(
    delete,
    path = "/v1/devices/{device_id}",
    tag = "Devices",
    params(("device_id" = String, Path, description = "Device identifier")),
    security(("tma" = [])),
    responses(
        (status = 200, description = "Device deleted", body = DeleteDeviceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Device not found")
    )
)]
pub async fn delete_device(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeleteDeviceResponse>, ApiError> {
    let outcome = state
        .reconciler
        .delete_device(user.user_id, &device_id)
        .await?;
    Ok(Json(outcome.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn stored(trial: bool) -> StoredDevice {
        let now = Utc::now();
        StoredDevice {
            device_id: "dev-1".to_string(),
            user_id: 7,
            name: "Phone".to_string(),
            account_handle: "user7_1".to_string(),
            connection_link: Some("vless://abc".to_string()),
            plan_id: None,
            subscription_until: Some(now + TimeDelta::days(3)),
            trial_used: trial,
            panel_sync_pending: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn stored_device_maps_without_panel_fields() {
        let response = DeviceResponse::from(stored(true));
        assert!(response.is_active);
        assert!(response.panel_status.is_none());
        assert_eq!(response.links, vec!["vless://abc".to_string()]);
    }

    #[test]
    fn trial_notice_only_for_trial_devices() {
        let outcome = |trial| DeleteOutcome {
            device: stored(trial),
            remaining_days: 3,
            remaining_until: None,
            trial_notice: trial,
            upstream: UpstreamSync::Synced,
        };
        let response = DeleteDeviceResponse::from(outcome(true));
        assert_eq!(response.trial_notice.as_deref(), Some(TRIAL_NOTICE));
        let response = DeleteDeviceResponse::from(outcome(false));
        assert!(response.trial_notice.is_none());
    }
}
