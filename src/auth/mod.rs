// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication against the platform.
//!
//! ## Modules
//!
//! - `token` - Session token state machine (`TokenManager`)
//! - `search` - Locating the token in a decrypted login response
//! - `error` - Authentication error types

pub mod error;
pub mod search;
pub mod token;

pub use error::AuthError;
pub use token::{AuthState, SessionToken, TokenManager};
