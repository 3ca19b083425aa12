// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Billing error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use tracing::error;

use crate::error::ApiError;
use crate::providers::{PanelError, PaymentError};
use crate::storage::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Insufficient balance: required {required}, current {current}")]
    InsufficientBalance { required: u64, current: u64 },

    #[error("Device limit of {max} reached")]
    DeviceLimitReached { max: usize },

    #[error("A plan is required once the trial has been used")]
    PlanRequired,

    #[error("Unknown plan: {0}")]
    PlanNotFound(String),

    #[error("Provisioning panel unavailable: {0}")]
    PanelUnavailable(String),

    #[error("Payment processor unavailable: {0}")]
    PaymentUnavailable(String),

    #[error("Invalid notification signature")]
    InvalidSignature,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl From<LedgerError> for BillingError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(what) => Self::NotFound(what),
            LedgerError::InsufficientBalance { required, current } => {
                Self::InsufficientBalance { required, current }
            }
            LedgerError::DeviceLimitReached { max } => Self::DeviceLimitReached { max },
            LedgerError::TrialAlreadyUsed => Self::PlanRequired,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<PanelError> for BillingError {
    fn from(err: PanelError) -> Self {
        Self::PanelUnavailable(err.to_string())
    }
}

impl From<PaymentError> for BillingError {
    fn from(err: PaymentError) -> Self {
        Self::PaymentUnavailable(err.to_string())
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => ApiError::validation(msg),
            BillingError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            BillingError::InsufficientBalance { required, current } => ApiError::new(
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
                "Insufficient balance",
            )
            .with_detail("required", required)
            .with_detail("current", current),
            BillingError::DeviceLimitReached { max } => ApiError::new(
                StatusCode::BAD_REQUEST,
                "device_limit_reached",
                format!("Maximum of {max} devices reached"),
            )
            .with_detail("max_devices", max),
            e @ BillingError::PlanRequired => {
                ApiError::new(StatusCode::BAD_REQUEST, "plan_required", e.to_string())
            }
            e @ BillingError::PlanNotFound(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "plan_not_found", e.to_string())
            }
            BillingError::PanelUnavailable(cause) => {
                error!(error = %cause, "Provisioning panel call failed");
                ApiError::bad_gateway(
                    "panel_unavailable",
                    "Provisioning panel is unavailable, try again later",
                )
            }
            BillingError::PaymentUnavailable(cause) => {
                error!(error = %cause, "Payment processor call failed");
                ApiError::bad_gateway(
                    "payment_unavailable",
                    "Payment processor is unavailable, try again later",
                )
            }
            e @ BillingError::InvalidSignature => {
                ApiError::new(StatusCode::FORBIDDEN, "invalid_signature", e.to_string())
            }
            BillingError::Internal(cause) => {
                error!(error = %cause, "Billing operation failed");
                ApiError::internal()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_taxonomy() {
        let err: BillingError = LedgerError::InsufficientBalance {
            required: 99,
            current: 50,
        }
        .into();
        assert!(matches!(
            err,
            BillingError::InsufficientBalance {
                required: 99,
                current: 50
            }
        ));

        let err: BillingError = LedgerError::TrialAlreadyUsed.into();
        assert!(matches!(err, BillingError::PlanRequired));

        let err: BillingError = LedgerError::AlreadyExists("Transaction x".into()).into();
        assert!(matches!(err, BillingError::Internal(_)));
    }

    #[test]
    fn http_statuses_follow_error_kind() {
        let cases = [
            (BillingError::Validation("x".into()), StatusCode::BAD_REQUEST, "validation"),
            (BillingError::NotFound("Device d".into()), StatusCode::NOT_FOUND, "not_found"),
            (
                BillingError::InsufficientBalance { required: 1, current: 0 },
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
            ),
            (
                BillingError::DeviceLimitReached { max: 5 },
                StatusCode::BAD_REQUEST,
                "device_limit_reached",
            ),
            (BillingError::PlanRequired, StatusCode::BAD_REQUEST, "plan_required"),
            (
                BillingError::PlanNotFound("1year".into()),
                StatusCode::BAD_REQUEST,
                "plan_not_found",
            ),
            (
                BillingError::PanelUnavailable("down".into()),
                StatusCode::BAD_GATEWAY,
                "panel_unavailable",
            ),
            (
                BillingError::PaymentUnavailable("down".into()),
                StatusCode::BAD_GATEWAY,
                "payment_unavailable",
            ),
            (BillingError::InvalidSignature, StatusCode::FORBIDDEN, "invalid_signature"),
            (
                BillingError::Internal("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
            ),
        ];
        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status, status);
            assert_eq!(api.code, code);
        }
    }

    #[test]
    fn internal_details_stay_out_of_the_body() {
        let api: ApiError = BillingError::Internal("redb commit failed at /data".into()).into();
        assert!(!api.message.contains("redb"));

        let api: ApiError = BillingError::DeviceLimitReached { max: 5 }.into();
        assert_eq!(api.details["max_devices"], 5);
    }
}
