// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Panel Sync Worker
//!
//! Background task that re-pushes device expiries the panel has not yet
//! acknowledged. A renewal whose panel update failed leaves its device
//! flagged `panel_sync_pending`; this worker closes that gap even when the
//! user never lists their devices again.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::billing::Reconciler;

pub struct PanelSyncWorker {
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl PanelSyncWorker {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Run sweeps until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(worker.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Panel sync worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => break,
            }
        }
        info!("Panel sync worker shutting down");
    }

    async fn sweep(&self) {
        match self.reconciler.resync_pending().await {
            Ok(sweep) if sweep.attempted == 0 => debug!("Panel sync: nothing pending"),
            Ok(sweep) => info!(
                attempted = sweep.attempted,
                synced = sweep.synced,
                "Panel sync: sweep finished"
            ),
            Err(e) => warn!(error = %e, "Panel sync: failed to list pending devices"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::testing::{FakePanel, FakePayments};
    use crate::billing::BillingSettings;
    use crate::storage::ledger::tests::temp_ledger;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn worker_pushes_pending_devices_until_cancelled() {
        let (ledger, _dir) = temp_ledger();
        let ledger = Arc::new(ledger);
        let mut user = ledger.get_or_create_user(7, None).unwrap();
        user.balance = 200;
        ledger.put_user(&user).unwrap();

        let panel = Arc::new(FakePanel::default());
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            panel.clone(),
            Arc::new(FakePayments::default()),
            BillingSettings {
                max_devices: 5,
                trial_days: 3,
                public_url: "https://app.test".to_string(),
                require_signature: false,
            },
        ));

        let added = reconciler.add_device(7, None, None).await.unwrap();
        panel.fail_update.store(true, Ordering::SeqCst);
        let renewed = reconciler
            .renew(7, &added.device.device_id, "1month")
            .await
            .unwrap();
        assert!(!renewed.upstream.is_synced());
        panel.fail_update.store(false, Ordering::SeqCst);

        let shutdown = CancellationToken::new();
        let worker = PanelSyncWorker::new(reconciler, Duration::from_millis(10));
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !ledger.list_pending_sync_devices().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(panel.updates.load(Ordering::SeqCst), 1);
        assert_eq!(
            panel.expire_of(&added.device.account_handle),
            renewed.device.subscription_until.map(|t| t.timestamp())
        );
    }
}
