// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Mini-app launch-token (init data) verification.
//!
//! The launch token is a URL-encoded query string signed by the messaging
//! platform:
//!
//! 1. `secret = HMAC_SHA256(key = "WebAppData", msg = bot_token)`
//! 2. `check = join("\n", sorted("key=value" for every pair except hash))`
//! 3. `hash == hex(HMAC_SHA256(key = secret, msg = check))`
//!
//! `auth_date` bounds the token's age and the `user` field carries the
//! platform identity as JSON.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use url::form_urlencoded;

use super::AuthError;

type HmacSha256 = Hmac<Sha256>;

const SECRET_DERIVATION_KEY: &[u8] = b"WebAppData";

/// Identity carried by a verified launch token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LaunchUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Verifies launch tokens against one bot token.
#[derive(Clone)]
pub struct InitDataValidator {
    secret: Vec<u8>,
    max_age: Duration,
}

impl std::fmt::Debug for InitDataValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitDataValidator")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl InitDataValidator {
    pub fn new(bot_token: &str, max_age: Duration) -> Result<Self, AuthError> {
        let mut mac = HmacSha256::new_from_slice(SECRET_DERIVATION_KEY)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        mac.update(bot_token.as_bytes());
        Ok(Self {
            secret: mac.finalize().into_bytes().to_vec(),
            max_age,
        })
    }

    pub fn validate(&self, raw: &str) -> Result<LaunchUser, AuthError> {
        self.validate_at(raw, Utc::now().timestamp())
    }

    fn validate_at(&self, raw: &str, now: i64) -> Result<LaunchUser, AuthError> {
        let mut pairs: Vec<(String, String)> = form_urlencoded::parse(raw.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let hash_at = pairs
            .iter()
            .position(|(k, _)| k == "hash")
            .ok_or(AuthError::MalformedToken)?;
        let (_, hash) = pairs.remove(hash_at);
        let supplied = hex::decode(hash).map_err(|_| AuthError::InvalidSignature)?;

        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let check = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        mac.update(check.as_bytes());
        mac.verify_slice(&supplied)
            .map_err(|_| AuthError::InvalidSignature)?;

        let field = |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        let auth_date: i64 = field("auth_date")
            .and_then(|v| v.parse().ok())
            .ok_or(AuthError::MalformedToken)?;
        let age = now.saturating_sub(auth_date);
        if age > i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX) {
            return Err(AuthError::TokenExpired);
        }

        let user = field("user").ok_or(AuthError::MalformedToken)?;
        serde_json::from_str(user).map_err(|_| AuthError::MalformedToken)
    }
}
