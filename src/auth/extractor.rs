// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for authenticated users.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::{AuthError, AuthenticatedUser};
use crate::state::AppState;

/// Authorization scheme for mini-app launch tokens.
const TMA_SCHEME: &str = "tma ";

#[cfg(feature = "dev")]
pub const DEV_TOKEN: &str = "dev_mode";
#[cfg(feature = "dev")]
pub const DEV_USER_ID: i64 = 123_456_789;
#[cfg(feature = "dev")]
const DEV_USERNAME: &str = "dev_user";
#[cfg(feature = "dev")]
const DEV_STARTING_BALANCE: u64 = 500;

/// Extractor for authenticated users.
///
/// Reads `Authorization: tma <launch-token>`, verifies the token and resolves
/// the user row, creating it on first contact.
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = auth_header
            .strip_prefix(TMA_SCHEME)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidAuthHeader)?;

        authenticate(token, state).map(Auth)
    }
}

/// Verify a launch token and resolve its user.
pub fn authenticate(token: &str, state: &AppState) -> Result<AuthenticatedUser, AuthError> {
    #[cfg(feature = "dev")]
    if token == DEV_TOKEN {
        return dev_user(state);
    }

    let launch = state.launch_tokens.validate(token).inspect_err(|e| {
        tracing::debug!(reason = e.reason(), "Launch token rejected");
    })?;
    let user = state
        .ledger
        .get_or_create_user(launch.id, launch.username.as_deref())
        .map_err(|e| AuthError::InternalError(e.to_string()))?;
    Ok(user.into())
}

/// Development identity. Never compiled into production builds.
#[cfg(feature = "dev")]
fn dev_user(state: &AppState) -> Result<AuthenticatedUser, AuthError> {
    use crate::storage::StoredUser;

    let existing = state
        .ledger
        .get_user(DEV_USER_ID)
        .map_err(|e| AuthError::InternalError(e.to_string()))?;
    let user = match existing {
        Some(user) => user,
        None => {
            let mut user = StoredUser::new(DEV_USER_ID, Some(DEV_USERNAME.to_string()));
            user.balance = DEV_STARTING_BALANCE;
            state
                .ledger
                .put_user(&user)
                .map_err(|e| AuthError::InternalError(e.to_string()))?;
            tracing::warn!(user_id = DEV_USER_ID, "Seeded development user");
            user
        }
    };
    Ok(user.into())
}
