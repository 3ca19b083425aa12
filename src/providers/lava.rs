// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Lava payment processor integration for balance top-ups.
//!
//! Invoices are created with an HMAC-SHA256 `Signature` header computed over
//! the exact JSON bytes sent. Completion notifications carry an MD5 `sign`
//! over `invoice_id:amount:pay_time:secret2`, compared in constant time.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use utoipa::ToSchema;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_API_URL: &str = "https://api.lava.ru/business/invoice/create";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Hosted invoice lifetime in minutes.
const INVOICE_EXPIRE_MINUTES: u32 = 300;
const INVOICE_COMMENT: &str = "VPN balance top-up";

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment signing failed: {0}")]
    Signing(String),

    #[error("payment request failed: {0}")]
    Request(String),

    #[error("payment response was invalid: {0}")]
    InvalidResponse(String),
}

pub struct InvoiceRequest<'a> {
    pub order_id: &'a str,
    pub amount: u64,
    pub hook_url: &'a str,
    pub success_url: &'a str,
}

/// Hosted invoice returned by the processor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceEnvelope {
    data: Invoice,
}

/// Field order is part of the signed byte string.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceBody<'a> {
    sum: u64,
    order_id: &'a str,
    shop_id: &'a str,
    hook_url: &'a str,
    success_url: &'a str,
    expire: u32,
    comment: &'a str,
}

/// Payment-completion notification as posted by the processor.
///
/// `amount` and `pay_time` arrive as numbers or strings depending on the
/// processor version, so they are kept raw and canonicalized with
/// [`signed_text`] before signature checks.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LavaNotification {
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub pay_time: Value,
    #[serde(default)]
    pub sign: Option<String>,
}

impl LavaNotification {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Supplied signature, treating an empty string as absent.
    pub fn signature(&self) -> Option<&str> {
        self.sign.as_deref().filter(|s| !s.is_empty())
    }
}

/// Text form of a notification field as it enters the signature string.
///
/// Integral numbers drop their fractional part (`100.0` signs as `100`).
pub fn signed_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
                    Some(f) => f.to_string(),
                    None => n.to_string(),
                }
            }
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Invoice creation and notification verification.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, request: InvoiceRequest<'_>) -> Result<Invoice, PaymentError>;

    /// Never fails: malformed input verifies as `false`.
    fn verify_notification(
        &self,
        invoice_id: &str,
        amount: &str,
        pay_time: &str,
        signature: &str,
    ) -> bool;
}

#[derive(Debug, Clone)]
pub struct LavaConfig {
    pub api_url: String,
    pub shop_id: String,
    /// Request-signing secret.
    pub secret_key: String,
    /// Notification-signing secret.
    pub secret_key_2: String,
}

#[derive(Debug, Clone)]
pub struct LavaClient {
    config: LavaConfig,
    http: Client,
}

impl LavaClient {
    pub fn new(config: LavaConfig) -> Result<Self, PaymentError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    fn sign_body(&self, body: &[u8]) -> Result<String, PaymentError> {
        let mut mac = HmacSha256::new_from_slice(self.config.secret_key.as_bytes())
            .map_err(|e| PaymentError::Signing(e.to_string()))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Constant-time check of a hex MD5 signature over
/// `invoice_id:amount:pay_time:secret`.
pub fn verify_sign(
    secret: &str,
    invoice_id: &str,
    amount: &str,
    pay_time: &str,
    signature: &str,
) -> bool {
    let Ok(supplied) = hex::decode(signature.trim()) else {
        return false;
    };
    let expected = Md5::digest(format!("{invoice_id}:{amount}:{pay_time}:{secret}").as_bytes());
    if supplied.len() != expected.len() {
        return false;
    }
    expected.as_slice().ct_eq(&supplied).into()
}

#[async_trait]
impl PaymentGateway for LavaClient {
    async fn create_invoice(&self, request: InvoiceRequest<'_>) -> Result<Invoice, PaymentError> {
        let body = InvoiceBody {
            sum: request.amount,
            order_id: request.order_id,
            shop_id: &self.config.shop_id,
            hook_url: request.hook_url,
            success_url: request.success_url,
            expire: INVOICE_EXPIRE_MINUTES,
            comment: INVOICE_COMMENT,
        };
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| PaymentError::InvalidResponse(format!("serialize body failed: {e}")))?;
        let signature = self.sign_body(&bytes)?;

        info!(order_id = %request.order_id, amount = request.amount, "Creating payment invoice");

        let response = self
            .http
            .post(&self.config.api_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("Signature", signature)
            .body(bytes)
            .send()
            .await
            .map_err(|e| PaymentError::Request(format!("create invoice failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Request(format!(
                "create invoice returned {status}: {body}"
            )));
        }

        let envelope: InvoiceEnvelope = response
            .json()
            .await
            .map_err(|e| PaymentError::InvalidResponse(format!("invalid invoice response: {e}")))?;
        debug!(invoice_id = %envelope.data.id, "Payment invoice created");
        Ok(envelope.data)
    }

    fn verify_notification(
        &self,
        invoice_id: &str,
        amount: &str,
        pay_time: &str,
        signature: &str,
    ) -> bool {
        verify_sign(
            &self.config.secret_key_2,
            invoice_id,
            amount,
            pay_time,
            signature,
        )
    }
}
