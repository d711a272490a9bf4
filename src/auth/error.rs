// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use crate::error::TransportError;

use super::token::AuthState;

/// Why a login attempt did not produce a session token.
///
/// Returned to the caller, never raised past the token manager; the
/// caller decides whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Login request never got a usable response
    #[error("login request failed: {0}")]
    Transport(#[from] TransportError),

    /// Response decrypted but no `token` field was found
    #[error("login response did not contain a session token")]
    TokenNotFound,

    /// `authenticate` called while already authenticated or mid-login
    #[error("cannot authenticate while {0}")]
    InvalidState(AuthState),
}

impl AuthError {
    /// Stable machine-readable code, for logs and metrics labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::Transport(_) => "login_transport_error",
            AuthError::TokenNotFound => "token_not_found",
            AuthError::InvalidState(_) => "invalid_auth_state",
        }
    }
}
