// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Gate
//!
//! Every user-facing endpoint requires a mini-app launch token.
//!
//! ## Auth Flow
//!
//! 1. The messaging client opens the mini-app with signed launch data
//! 2. Frontend sends `Authorization: tma <launch-token>`
//! 3. Server:
//!    - Verifies the HMAC against the bot token
//!    - Rejects tokens older than `AUTH_MAX_AGE_SECS`
//!    - Resolves (or creates) the user row from the `user.id` field
//!
//! The payment webhook is authenticated by its own signature instead.

pub mod error;
pub mod extractor;
pub mod identity;
pub mod init_data;

pub use error::AuthError;
pub use extractor::{authenticate, Auth};
pub use identity::AuthenticatedUser;
pub use init_data::{InitDataValidator, LaunchUser};
