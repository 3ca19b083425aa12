// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Authentication error type.
///
/// Every identity failure is a 401 with `error_code = "unauthorized"`; the
/// finer-grained `reason` is informational only.
#[derive(Debug)]
pub enum AuthError {
    /// No authorization header present
    MissingAuthHeader,
    /// Header is not `tma <launch-token>`
    InvalidAuthHeader,
    /// Token could not be parsed or lacks required fields
    MalformedToken,
    /// HMAC over the token does not match
    InvalidSignature,
    /// `auth_date` older than the allowed age
    TokenExpired,
    /// User lookup or creation failed
    InternalError(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: &'static str,
    reason: &'static str,
}

impl AuthError {
    /// Fine-grained reason for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::InternalError(_) => "internal_error",
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InternalError(_) => "internal",
            _ => "unauthorized",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingAuthHeader => write!(f, "Authorization header is required"),
            AuthError::InvalidAuthHeader => {
                write!(f, "Invalid authorization header format (expected 'tma <token>')")
            }
            AuthError::MalformedToken => write!(f, "Launch token is malformed"),
            AuthError::InvalidSignature => write!(f, "Launch token signature is invalid"),
            AuthError::TokenExpired => write!(f, "Launch token has expired"),
            AuthError::InternalError(msg) => write!(f, "Internal authentication error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = match &self {
            AuthError::InternalError(msg) => {
                tracing::error!(error = %msg, "Authentication failed internally");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(AuthErrorBody {
            error,
            error_code: self.error_code(),
            reason: self.reason(),
        });
        (status, body).into_response()
    }
}
