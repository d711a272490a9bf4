// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Platform Client - signed request and decryption pipeline
//!
//! This crate authenticates against a remote financial platform, signs
//! outgoing requests with HMAC-SHA256, decrypts RSA/AES protected
//! responses and drives scheduled execution runs against one endpoint.
//!
//! ## Modules
//!
//! - `crypto` - Request signing and response decryption
//! - `auth` - Session token lifecycle
//! - `transport` - HTTP boundary (reqwest)
//! - `dispatcher` - Signed dispatch with retry and statistics
//! - `scheduler` - Repeated execution with cooperative cancellation
//! - `client` - `PlatformClient` facade

pub mod auth;
pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::PlatformClient;
pub use config::ClientConfig;
pub use models::{DecryptionMethod, Envelope};
pub use scheduler::{ScheduleConfig, ScheduleHandle, ScheduleSummary};
