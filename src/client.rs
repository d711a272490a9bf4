// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Platform Client
//!
//! One authenticated session against the platform. Wires the token
//! manager, dispatcher and scheduler together and exposes the two narrow
//! entry points the rest of an application needs:
//!
//! - [`PlatformClient::sign_and_send`] for a single decrypted request
//! - [`PlatformClient::schedule`] for a repeated run against one endpoint

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::auth::{AuthError, AuthState, TokenManager};
use crate::config::ClientConfig;
use crate::dispatcher::{DispatchOptions, DispatchStatsSnapshot, RequestDispatcher};
use crate::error::{ConfigError, DispatchError};
use crate::models::Envelope;
use crate::scheduler::{ExecutionScheduler, ScheduleConfig, ScheduleError, ScheduleHandle};
use crate::transport::{HttpTransport, Transport};

pub struct PlatformClient {
    dispatcher: Arc<RequestDispatcher>,
    scheduler: ExecutionScheduler,
}

impl PlatformClient {
    /// Build a client talking HTTP to `config.settings.base_url`.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.settings.validate()?;
        let transport = Arc::new(HttpTransport::new(&config.settings)?);
        info!(
            base_url = %config.settings.base_url,
            account = %config.credentials.account,
            "Platform client configured"
        );
        Ok(Self::with_transport(config, transport))
    }

    /// Build a client over any transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let tokens = Arc::new(TokenManager::new(&config, transport.clone()));
        let dispatcher = Arc::new(RequestDispatcher::new(&config, tokens, transport));
        Self {
            scheduler: ExecutionScheduler::new(dispatcher.clone()),
            dispatcher,
        }
    }

    pub async fn authenticate(&self) -> Result<(), AuthError> {
        self.dispatcher.authenticate().await
    }

    pub async fn ensure_authenticated(&self) -> Result<(), AuthError> {
        self.dispatcher.ensure_authenticated().await
    }

    pub async fn logout(&self) {
        self.dispatcher.logout().await;
    }

    pub async fn auth_state(&self) -> AuthState {
        self.dispatcher.tokens().state().await
    }

    /// Sign, send and decrypt one request with the default retry policy.
    pub async fn sign_and_send(
        &self,
        endpoint: &str,
        params: Map<String, Value>,
    ) -> Result<Envelope, DispatchError> {
        self.dispatcher
            .dispatch(endpoint, params, DispatchOptions::default())
            .await
    }

    pub async fn sign_and_send_with(
        &self,
        endpoint: &str,
        params: Map<String, Value>,
        options: DispatchOptions,
    ) -> Result<Envelope, DispatchError> {
        self.dispatcher.dispatch(endpoint, params, options).await
    }

    /// Start a schedule run. Returns immediately.
    pub fn schedule(&self, config: ScheduleConfig) -> Result<ScheduleHandle, ScheduleError> {
        self.scheduler.start(config)
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.dispatcher.stats()
    }
}
