// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote VPN provisioning panel client.
//!
//! ## Credential lifecycle
//!
//! The panel issues short-lived bearer tokens from a password exchange. The
//! token lives in a [`TokenCache`] owned by whoever composes the client, with
//! an expiry set a safety margin below the real lifetime. A 401 from any
//! account call invalidates the cache, re-authenticates once and retries the
//! call once; a second 401 is a hard failure.
//!
//! Concurrent callers may race to refresh. The worst case is one redundant
//! token exchange.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

const TOKEN_PATH: &str = "/api/admin/token";
const USER_PATH: &str = "/api/user";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Scheme of the links produced by the single inbound profile we provision.
const PREFERRED_LINK_SCHEME: &str = "vless://";

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("panel auth failed: {0}")]
    Auth(String),

    #[error("panel request failed: {0}")]
    Request(String),

    #[error("panel response was invalid: {0}")]
    InvalidResponse(String),
}

// =============================================================================
// Wire types
// =============================================================================

/// Account status as reported and accepted by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Disabled,
    Limited,
    Expired,
    OnHold,
    #[serde(other)]
    Unknown,
}

/// Panel account as returned by create/read/update.
///
/// `username` and `status` are required; a response without them is
/// rejected instead of propagating half-filled state. Unknown fields are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PanelAccount {
    pub username: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub used_traffic: u64,
    #[serde(default)]
    pub data_limit: Option<u64>,
    /// Expiry as epoch seconds; `None` or `0` means no expiry.
    #[serde(default)]
    pub expire: Option<i64>,
    #[serde(default)]
    pub subscription_url: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl PanelAccount {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expire
            .filter(|secs| *secs > 0)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn preferred_link(&self) -> Option<String> {
        select_connection_link(&self.links)
    }
}

/// Parameters for a new account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewAccount {
    pub expire: i64,
    pub status: AccountStatus,
}

/// Partial account update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Pick the link whose scheme matches the provisioned protocol, falling back
/// to the first link.
pub fn select_connection_link(links: &[String]) -> Option<String> {
    links
        .iter()
        .find(|link| link.starts_with(PREFERRED_LINK_SCHEME))
        .or_else(|| links.first())
        .cloned()
}

// =============================================================================
// Provisioning seam
// =============================================================================

/// Account lifecycle operations the reconciler needs from a panel.
#[async_trait]
pub trait ProvisioningPanel: Send + Sync {
    async fn create_account(
        &self,
        handle: &str,
        account: NewAccount,
    ) -> Result<PanelAccount, PanelError>;

    /// `Ok(None)` when the panel reports the account as not found.
    async fn get_account(&self, handle: &str) -> Result<Option<PanelAccount>, PanelError>;

    async fn update_account(
        &self,
        handle: &str,
        update: AccountUpdate,
    ) -> Result<PanelAccount, PanelError>;

    /// Idempotent: a missing account counts as deleted.
    async fn delete_account(&self, handle: &str) -> Result<(), PanelError>;
}

// =============================================================================
// Token cache
// =============================================================================

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Bearer credential cache with an explicit `(value, expiry)` state.
pub struct TokenCache {
    state: RwLock<Option<CachedToken>>,
    safety_margin: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_SAFETY_MARGIN)
    }
}

impl TokenCache {
    pub fn new(safety_margin: Duration) -> Self {
        Self {
            state: RwLock::new(None),
            safety_margin,
        }
    }

    /// The cached token, if it has not reached its (shortened) expiry.
    pub async fn current(&self) -> Option<String> {
        let state = self.state.read().await;
        state
            .as_ref()
            .filter(|token| Instant::now() < token.expires_at)
            .map(|token| token.value.clone())
    }

    /// Cache `value` for `lifetime` minus the safety margin.
    pub async fn store(&self, value: String, lifetime: Duration) {
        let usable = lifetime.saturating_sub(self.safety_margin);
        let mut state = self.state.write().await;
        *state = Some(CachedToken {
            value,
            expires_at: Instant::now() + usable,
        });
    }

    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        *state = None;
    }
}

// =============================================================================
// HTTP client
// =============================================================================

#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Lifetime assumed when the token response carries no `expires_in`.
    pub token_lifetime: Duration,
}

pub struct PanelClient {
    config: PanelConfig,
    tokens: Arc<TokenCache>,
    http: Client,
}

impl PanelClient {
    pub fn new(config: PanelConfig, tokens: Arc<TokenCache>) -> Result<Self, PanelError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| PanelError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            tokens,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Return the cached bearer token, exchanging credentials only when the
    /// cache is empty or expired.
    pub async fn authenticate(&self) -> Result<String, PanelError> {
        if let Some(token) = self.tokens.current().await {
            return Ok(token);
        }
        self.refresh_token().await
    }

    /// Exchange credentials for a fresh token and cache it.
    pub async fn refresh_token(&self) -> Result<String, PanelError> {
        let url = self.url(TOKEN_PATH);
        info!(url = %url, "Authenticating with provisioning panel");

        let form = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| PanelError::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PanelError::Auth(format!(
                "token request returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PanelError::Auth(format!("invalid token response: {e}")))?;

        if token.access_token.trim().is_empty() {
            return Err(PanelError::Auth(
                "token response did not include access_token".to_string(),
            ));
        }

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(self.config.token_lifetime);
        self.tokens
            .store(token.access_token.clone(), lifetime)
            .await;
        Ok(token.access_token)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<Response, PanelError> {
        let mut request = self
            .http
            .request(method.clone(), self.url(path))
            .header("Authorization", format!("Bearer {token}"));
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .map_err(|e| PanelError::Request(format!("{method} {path} failed: {e}")))
    }

    /// Authenticated request with a single re-authenticate-and-retry on 401.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, PanelError> {
        let token = self.authenticate().await?;
        let response = self.send(method.clone(), path, body, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!(path = %path, "Panel rejected cached token, re-authenticating");
        self.tokens.invalidate().await;
        let token = self.refresh_token().await?;
        let retry = self.send(method.clone(), path, body, &token).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
            return Err(PanelError::Auth(format!(
                "{method} {path} rejected a freshly issued token"
            )));
        }
        Ok(retry)
    }
}

async fn ensure_success(response: Response, what: &str) -> Result<Response, PanelError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(PanelError::Request(format!("{what} returned {status}: {body}")))
}

async fn parse_account(response: Response, what: &str) -> Result<PanelAccount, PanelError> {
    let response = ensure_success(response, what).await?;
    response
        .json()
        .await
        .map_err(|e| PanelError::InvalidResponse(format!("{what} invalid account: {e}")))
}

fn user_path(handle: &str) -> String {
    format!("{USER_PATH}/{handle}")
}

#[async_trait]
impl ProvisioningPanel for PanelClient {
    async fn create_account(
        &self,
        handle: &str,
        account: NewAccount,
    ) -> Result<PanelAccount, PanelError> {
        let payload = json!({
            "username": handle,
            "proxies": { "vless": { "flow": "xtls-rprx-vision" } },
            "inbounds": { "vless": ["VLESS_REALITY"] },
            "expire": account.expire,
            "data_limit": 0,
            "data_limit_reset_strategy": "no_reset",
            "status": account.status,
        });
        let response = self.request(Method::POST, USER_PATH, Some(&payload)).await?;
        let created = parse_account(response, "create account").await?;
        debug!(handle = %handle, status = ?created.status, "Panel account created");
        Ok(created)
    }

    async fn get_account(&self, handle: &str) -> Result<Option<PanelAccount>, PanelError> {
        let response = self.request(Method::GET, &user_path(handle), None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse_account(response, "get account").await.map(Some)
    }

    async fn update_account(
        &self,
        handle: &str,
        update: AccountUpdate,
    ) -> Result<PanelAccount, PanelError> {
        let payload = serde_json::to_value(&update)
            .map_err(|e| PanelError::InvalidResponse(format!("serialize update failed: {e}")))?;
        let response = self
            .request(Method::PUT, &user_path(handle), Some(&payload))
            .await?;
        parse_account(response, "update account").await
    }

    async fn delete_account(&self, handle: &str) -> Result<(), PanelError> {
        let response = self.request(Method::DELETE, &user_path(handle), None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(handle = %handle, "Panel account already absent");
            return Ok(());
        }
        ensure_success(response, "delete account").await?;
        Ok(())
    }
}
