// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token lifecycle.
//!
//! ```text
//! Unauthenticated -> Authenticating -> Authenticated -> Expired | LoggedOut
//! ```
//!
//! Expiry is a local policy (`token_ttl`, 24 h by default): the platform
//! never states one. An expired token is simply not handed out any more;
//! no explicit transition is needed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::error::AuthError;
use super::search::extract_token;
use crate::config::{ClientConfig, Credentials};
use crate::crypto::{ResponseCipher, Signer};
use crate::models::Envelope;
use crate::transport::Transport;

/// Externally visible authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
    LoggedOut,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticating => "authenticating",
            AuthState::Authenticated => "authenticated",
            AuthState::Expired => "expired",
            AuthState::LoggedOut => "logged out",
        };
        f.write_str(label)
    }
}

/// A token extracted from a successful login.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    value: String,
    pub issued_at: DateTime<Utc>,
    pub assumed_expiry: DateTime<Utc>,
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("assumed_expiry", &self.assumed_expiry)
            .finish()
    }
}

impl SessionToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.assumed_expiry
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

#[derive(Debug)]
struct TokenState {
    phase: AuthState,
    token: Option<SessionToken>,
}

impl TokenState {
    fn effective_phase(&self, now: DateTime<Utc>) -> AuthState {
        match (&self.phase, &self.token) {
            (AuthState::Authenticated, Some(token)) if !token.is_valid_at(now) => {
                AuthState::Expired
            }
            (phase, _) => *phase,
        }
    }
}

/// Owns authentication state for one client.
pub struct TokenManager {
    credentials: Credentials,
    signer: Signer,
    cipher: ResponseCipher,
    transport: Arc<dyn Transport>,
    login_endpoint: String,
    token_ttl: chrono::Duration,
    state: RwLock<TokenState>,
}

impl TokenManager {
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            credentials: config.credentials.clone(),
            signer: config.keys.signer(),
            cipher: config.keys.cipher(),
            transport,
            login_endpoint: config.settings.login_endpoint.clone(),
            token_ttl: chrono::Duration::from_std(config.settings.token_ttl)
                .unwrap_or(chrono::Duration::MAX),
            state: RwLock::new(TokenState {
                phase: AuthState::Unauthenticated,
                token: None,
            }),
        }
    }

    pub async fn state(&self) -> AuthState {
        self.state.read().await.effective_phase(Utc::now())
    }

    /// The current token while authenticated and unexpired.
    pub async fn token(&self) -> Option<String> {
        let now = Utc::now();
        let state = self.state.read().await;
        match state.effective_phase(now) {
            AuthState::Authenticated => state.token.as_ref().map(|t| t.value.clone()),
            _ => None,
        }
    }

    pub async fn session(&self) -> Option<SessionToken> {
        self.state.read().await.token.clone()
    }

    /// Log in and store the session token.
    ///
    /// Valid from `Unauthenticated`, `Expired` and `LoggedOut`. On failure
    /// the manager is back in `Unauthenticated`.
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        {
            let mut state = self.state.write().await;
            match state.effective_phase(Utc::now()) {
                phase @ (AuthState::Authenticated | AuthState::Authenticating) => {
                    return Err(AuthError::InvalidState(phase));
                }
                AuthState::Unauthenticated | AuthState::Expired | AuthState::LoggedOut => {}
            }
            state.phase = AuthState::Authenticating;
            state.token = None;
        }

        let outcome = self.login().await;

        let mut state = self.state.write().await;
        match outcome {
            Ok(value) => {
                let issued_at = Utc::now();
                let token = SessionToken {
                    value,
                    issued_at,
                    assumed_expiry: issued_at
                        .checked_add_signed(self.token_ttl)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                };
                info!(
                    account = %self.credentials.account,
                    expires_at = %token.assumed_expiry,
                    "Authenticated with platform"
                );
                state.phase = AuthState::Authenticated;
                state.token = Some(token);
                Ok(())
            }
            Err(err) => {
                warn!(
                    account = %self.credentials.account,
                    error = %err,
                    error_code = err.error_code(),
                    "Authentication failed"
                );
                state.phase = AuthState::Unauthenticated;
                Err(err)
            }
        }
    }

    /// Authenticate only if no valid token is held.
    pub async fn ensure_authenticated(&self) -> Result<(), AuthError> {
        if self.token().await.is_some() {
            return Ok(());
        }
        self.authenticate().await
    }

    pub async fn logout(&self) {
        let mut state = self.state.write().await;
        state.phase = AuthState::LoggedOut;
        state.token = None;
        info!(account = %self.credentials.account, "Logged out");
    }

    async fn login(&self) -> Result<String, AuthError> {
        let payload = self.signer.prepare(self.credentials.login_fields());
        let raw = self
            .transport
            .post(&self.login_endpoint, &payload.into_value(), None)
            .await?;
        let envelope = self.cipher.decrypt(Envelope::from_value(raw));
        extract_token(&envelope.into_value()).ok_or(AuthError::TokenNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signer::verify;
    use crate::error::TransportError;
    use crate::testing::{test_config, FakeTransport, API_SECRET, LOGIN_ENDPOINT};
    use serde_json::json;
    use std::time::Duration;

    fn manager(transport: &Arc<FakeTransport>) -> TokenManager {
        TokenManager::new(&test_config(), transport.clone())
    }

    #[tokio::test]
    async fn starts_unauthenticated_without_token() {
        let transport = Arc::new(FakeTransport::new());
        let tokens = manager(&transport);
        assert_eq!(tokens.state().await, AuthState::Unauthenticated);
        assert_eq!(tokens.token().await, None);
    }

    #[tokio::test]
    async fn authenticate_extracts_nested_token_from_encrypted_response() {
        let transport = Arc::new(FakeTransport::new());
        let tokens = manager(&transport);

        tokens.authenticate().await.unwrap();

        assert_eq!(tokens.state().await, AuthState::Authenticated);
        assert_eq!(tokens.token().await.as_deref(), Some("session-token-1"));
        let session = tokens.session().await.unwrap();
        assert_eq!(
            session.assumed_expiry - session.issued_at,
            chrono::Duration::hours(24)
        );
    }

    #[tokio::test]
    async fn login_request_is_signed_and_carries_credentials() {
        let transport = Arc::new(FakeTransport::new());
        manager(&transport).authenticate().await.unwrap();

        let calls = transport.calls_to(LOGIN_ENDPOINT);
        assert_eq!(calls.len(), 1);
        let body = calls[0].body.as_object().unwrap();
        assert_eq!(body.get("account"), Some(&json!("alice")));
        assert_eq!(body.get("prefix"), Some(&json!("+1")));
        assert!(body.contains_key("timestamp"));
        assert!(verify(body, API_SECRET));
        assert_eq!(calls[0].token, None);
    }

    #[tokio::test]
    async fn missing_token_leaves_manager_unauthenticated() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_login(Ok(json!({ "code": 200, "data": { "user": { "id": 1 } } })));
        let tokens = manager(&transport);

        assert_eq!(tokens.authenticate().await, Err(AuthError::TokenNotFound));
        assert_eq!(tokens.state().await, AuthState::Unauthenticated);
        assert_eq!(tokens.token().await, None);
    }

    #[tokio::test]
    async fn network_failure_is_reported_not_raised() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_login(Err(TransportError::Timeout("30s".into())));
        let tokens = manager(&transport);

        let err = tokens.authenticate().await.unwrap_err();
        assert!(matches!(err, AuthError::Transport(TransportError::Timeout(_))));
        assert_eq!(tokens.state().await, AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn authenticate_twice_is_rejected_while_valid() {
        let transport = Arc::new(FakeTransport::new());
        let tokens = manager(&transport);
        tokens.authenticate().await.unwrap();

        assert_eq!(
            tokens.authenticate().await,
            Err(AuthError::InvalidState(AuthState::Authenticated))
        );
        assert!(tokens.ensure_authenticated().await.is_ok());
        assert_eq!(transport.calls_to(LOGIN_ENDPOINT).len(), 1);
    }

    #[tokio::test]
    async fn logout_clears_token_and_allows_login_again() {
        let transport = Arc::new(FakeTransport::new());
        let tokens = manager(&transport);
        tokens.authenticate().await.unwrap();

        tokens.logout().await;
        assert_eq!(tokens.state().await, AuthState::LoggedOut);
        assert_eq!(tokens.token().await, None);

        tokens.authenticate().await.unwrap();
        assert_eq!(tokens.state().await, AuthState::Authenticated);
    }

    #[tokio::test]
    async fn zero_ttl_token_is_immediately_expired() {
        let transport = Arc::new(FakeTransport::new());
        let mut config = test_config();
        config.settings.token_ttl = Duration::ZERO;
        let tokens = TokenManager::new(&config, transport.clone());

        tokens.authenticate().await.unwrap();
        assert_eq!(tokens.state().await, AuthState::Expired);
        assert_eq!(tokens.token().await, None);

        // Expired is a valid starting point for a fresh login.
        tokens.authenticate().await.unwrap();
        assert_eq!(transport.calls_to(LOGIN_ENDPOINT).len(), 2);
    }

    #[test]
    fn session_token_debug_hides_value() {
        let now = Utc::now();
        let token = SessionToken {
            value: "secret-session".into(),
            issued_at: now,
            assumed_expiry: now,
        };
        assert!(!format!("{token:?}").contains("secret-session"));
    }
}
