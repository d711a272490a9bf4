// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Network boundary.
//!
//! Every logical operation is a single JSON `POST`. The [`Transport`] trait
//! is the seam the dispatcher and token manager talk through; the reqwest
//! implementation adds the platform headers and enforces the per-call
//! timeout.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::ClientSettings;
use crate::error::{ConfigError, TransportError};

/// Sends one signed request body and returns the raw (still encrypted)
/// response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(
        &self,
        endpoint: &str,
        body: &Value,
        token: Option<&str>,
    ) -> Result<Value, TransportError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: Url,
    locale: String,
    token_header: String,
    http: Client,
}

impl HttpTransport {
    pub fn new(settings: &ClientSettings) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::invalid("http_client", e.to_string()))?;

        Ok(Self {
            base_url: settings.base_url.clone(),
            locale: settings.locale.clone(),
            token_header: settings.token_header.clone(),
            http,
        })
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        endpoint: &str,
        body: &Value,
        token: Option<&str>,
    ) -> Result<Value, TransportError> {
        let mut request = self
            .http
            .post(self.url_for(endpoint))
            .header("Content-Type", "application/json")
            .header("Accept-Language", &self.locale)
            .json(body);
        if let Some(token) = token {
            request = request.header(self.token_header.as_str(), token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(format!("POST {endpoint}: {e}"))
            } else {
                TransportError::Request(format!("POST {endpoint}: {e}"))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Request(format!("POST {endpoint} body: {e}")))?;
        debug!(endpoint = %endpoint, status = status.as_u16(), "Platform response received");

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| TransportError::InvalidBody(format!("POST {endpoint}: {e}")))
    }
}
