// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error types shared across the request pipeline.
//!
//! Authentication and scheduling errors live next to the code that raises
//! them (`auth::error`, `scheduler`). Decryption failure is deliberately not
//! represented here: the cipher returns the envelope untouched instead.

/// Missing or malformed configuration. Fatal at construction, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration missing: {0}")]
    Missing(String),

    #[error("invalid configuration value for {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("malformed key material: {0}")]
    KeyMaterial(String),
}

impl ConfigError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Failure while talking to the platform over the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("platform returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response body was not valid JSON: {0}")]
    InvalidBody(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// A 2xx response with an unparseable body is an application-level
    /// failure and is returned as-is.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidBody(_))
    }
}

/// Failure of a signed dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no valid session token; authenticate first")]
    NotAuthenticated,

    #[error("dispatch failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

impl DispatchError {
    /// The transport error behind this failure, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            DispatchError::Transport { source, .. } => Some(source),
            DispatchError::NotAuthenticated => None,
        }
    }
}
