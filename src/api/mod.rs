// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

pub mod billing;
pub mod devices;
pub mod health;
pub mod plans;
pub mod users;
pub mod webhooks;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/auth", post(users::login))
        .route("/user/status", get(users::user_status))
        .route("/plans", get(plans::list_plans))
        .route(
            "/devices",
            get(devices::list_devices).post(devices::create_device),
        )
        .route("/devices/{device_id}", delete(devices::delete_device))
        .route("/billing/subscribe", post(billing::subscribe))
        .route("/billing/topup", post(billing::top_up))
        .route("/webhooks/lava", post(webhooks::lava_webhook));

    Router::new()
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Registers the `Authorization: tma <initData>` scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "tma",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "Authorization",
                    "Mini-app launch token: `tma <initData>`",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::liveness,
        health::readiness,
        users::login,
        users::user_status,
        plans::list_plans,
        devices::list_devices,
        devices::create_device,
        devices::delete_device,
        billing::subscribe,
        billing::top_up,
        webhooks::lava_webhook
    ),
    components(
        schemas(
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks,
            crate::auth::AuthenticatedUser,
            users::UserStatusResponse,
            plans::PlanListResponse,
            crate::billing::Plan,
            crate::billing::PanelStatus,
            crate::billing::UpstreamSync,
            devices::CreateDeviceRequest,
            devices::DeviceResponse,
            devices::DeviceListResponse,
            devices::CreateDeviceResponse,
            devices::DeleteDeviceResponse,
            billing::SubscribeRequest,
            billing::SubscribeResponse,
            billing::TopUpRequest,
            billing::TopUpResponse,
            crate::providers::LavaNotification,
            webhooks::WebhookAck
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Users", description = "Launch-token login and account status"),
        (name = "Plans", description = "Subscription plan catalogue"),
        (name = "Devices", description = "Device provisioning on the VPN panel"),
        (name = "Billing", description = "Plan renewal and balance top-up"),
        (name = "Webhooks", description = "Payment processor callbacks")
    )
)]
struct ApiDoc;
