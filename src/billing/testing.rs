// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory panel and payment fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::providers::lava::{verify_sign, Invoice, InvoiceRequest, PaymentError, PaymentGateway};
use crate::providers::panel::{
    AccountUpdate, NewAccount, PanelAccount, PanelError, ProvisioningPanel,
};

pub(crate) const WEBHOOK_SECRET: &str = "secret-b";

pub(crate) type CreateHook = Box<dyn FnOnce() + Send>;

/// Panel fake keyed by account handle, with per-operation failure switches.
#[derive(Default)]
pub(crate) struct FakePanel {
    pub accounts: Mutex<HashMap<String, PanelAccount>>,
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub updates: AtomicUsize,
    pub reads: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_delete: AtomicBool,
    /// Runs once, right after the next successful create.
    pub on_create: Mutex<Option<CreateHook>>,
}

fn unreachable_panel() -> PanelError {
    PanelError::Request("connection refused".to_string())
}

impl FakePanel {
    pub fn set_expire(&self, handle: &str, expire: DateTime<Utc>) {
        let mut accounts = self.accounts.lock().unwrap();
        accounts.get_mut(handle).unwrap().expire = Some(expire.timestamp());
    }

    pub fn expire_of(&self, handle: &str) -> Option<i64> {
        self.accounts
            .lock()
            .unwrap()
            .get(handle)
            .and_then(|a| a.expire)
    }

    pub fn remove(&self, handle: &str) {
        self.accounts.lock().unwrap().remove(handle);
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl ProvisioningPanel for FakePanel {
    async fn create_account(
        &self,
        handle: &str,
        account: NewAccount,
    ) -> Result<PanelAccount, PanelError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(unreachable_panel());
        }
        let created = PanelAccount {
            username: handle.to_string(),
            status: account.status,
            used_traffic: 0,
            data_limit: None,
            expire: Some(account.expire),
            subscription_url: Some(format!("/sub/{handle}")),
            links: vec![format!("trojan://{handle}"), format!("vless://{handle}")],
            created_at: None,
        };
        self.accounts
            .lock()
            .unwrap()
            .insert(handle.to_string(), created.clone());
        self.created.lock().unwrap().push(handle.to_string());
        let hook = self.on_create.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(created)
    }

    async fn get_account(&self, handle: &str) -> Result<Option<PanelAccount>, PanelError> {
        // Suspend like a network read so concurrent callers interleave here.
        tokio::task::yield_now().await;
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(unreachable_panel());
        }
        Ok(self.accounts.lock().unwrap().get(handle).cloned())
    }

    async fn update_account(
        &self,
        handle: &str,
        update: AccountUpdate,
    ) -> Result<PanelAccount, PanelError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(unreachable_panel());
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .get_mut(handle)
            .ok_or_else(|| PanelError::Request("update account returned 404".to_string()))?;
        if let Some(expire) = update.expire {
            account.expire = Some(expire);
        }
        if let Some(status) = update.status {
            account.status = status;
        }
        Ok(account.clone())
    }

    async fn delete_account(&self, handle: &str) -> Result<(), PanelError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(unreachable_panel());
        }
        self.accounts.lock().unwrap().remove(handle);
        self.deleted.lock().unwrap().push(handle.to_string());
        Ok(())
    }
}

/// Payment fake that records invoices and verifies with [`WEBHOOK_SECRET`].
#[derive(Default)]
pub(crate) struct FakePayments {
    /// `(order_id, amount, hook_url)` per issued invoice.
    pub invoices: Mutex<Vec<(String, u64, String)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl PaymentGateway for FakePayments {
    async fn create_invoice(&self, request: InvoiceRequest<'_>) -> Result<Invoice, PaymentError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::Request(
                "create invoice returned 503".to_string(),
            ));
        }
        let mut invoices = self.invoices.lock().unwrap();
        invoices.push((
            request.order_id.to_string(),
            request.amount,
            request.hook_url.to_string(),
        ));
        Ok(Invoice {
            id: format!("inv-{}", invoices.len()),
            url: format!("https://pay.test/{}", request.order_id),
            status: None,
        })
    }

    fn verify_notification(
        &self,
        invoice_id: &str,
        amount: &str,
        pay_time: &str,
        signature: &str,
    ) -> bool {
        verify_sign(WEBHOOK_SECRET, invoice_id, amount, pay_time, signature)
    }
}
