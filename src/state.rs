// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::InitDataValidator;
use crate::billing::Reconciler;
use crate::storage::Ledger;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub reconciler: Arc<Reconciler>,
    pub launch_tokens: Arc<InitDataValidator>,
}

impl AppState {
    pub fn new(
        ledger: Arc<Ledger>,
        reconciler: Arc<Reconciler>,
        launch_tokens: InitDataValidator,
    ) -> Self {
        Self {
            ledger,
            reconciler,
            launch_tokens: Arc::new(launch_tokens),
        }
    }
}
