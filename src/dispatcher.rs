// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Dispatcher
//!
//! Signs a request, attaches the session token, sends it, decrypts the
//! response and keeps running statistics.
//!
//! ## Retries
//!
//! Only transport failures are retried, up to `max_attempts` in total, with
//! a linear backoff of `retry_base_delay x attempt` (1 s, 2 s, ... by
//! default). Each attempt is re-signed with a fresh timestamp. A response
//! that fails to decrypt is not a failure: it is returned as-is.
//!
//! ## Serialization
//!
//! Dispatches and re-authentication share one async permit per client, so
//! a token read can never interleave with a concurrent login.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::{AuthError, TokenManager};
use crate::config::ClientConfig;
use crate::crypto::{looks_like_ciphertext, ResponseCipher, Signer};
use crate::error::DispatchError;
use crate::models::Envelope;
use crate::transport::Transport;

/// Per-call overrides of the client's retry policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    pub max_attempts: Option<u32>,
    pub retry_base_delay: Option<Duration>,
}

impl DispatchOptions {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }
}

/// Monotonic counters for the lifetime of a dispatcher.
///
/// `requests` counts network attempts, so one dispatch that needs three
/// attempts adds three.
#[derive(Debug, Default)]
pub struct DispatchStats {
    requests: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    encrypted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub encrypted: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            encrypted: self.encrypted.load(Ordering::Relaxed),
        }
    }

    fn record_attempt(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self, decrypted: bool) {
        self.successful.fetch_add(1, Ordering::Relaxed);
        if decrypted {
            self.encrypted.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Sends signed requests on behalf of one authenticated client.
pub struct RequestDispatcher {
    signer: Signer,
    cipher: ResponseCipher,
    tokens: Arc<TokenManager>,
    transport: Arc<dyn Transport>,
    max_attempts: u32,
    retry_base_delay: Duration,
    stats: DispatchStats,
    permit: Mutex<()>,
}

impl RequestDispatcher {
    pub fn new(
        config: &ClientConfig,
        tokens: Arc<TokenManager>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            signer: config.keys.signer(),
            cipher: config.keys.cipher(),
            tokens,
            transport,
            max_attempts: config.settings.max_attempts.max(1),
            retry_base_delay: config.settings.retry_base_delay,
            stats: DispatchStats::default(),
            permit: Mutex::new(()),
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Log in, holding the dispatch permit.
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        let _permit = self.permit.lock().await;
        self.tokens.authenticate().await
    }

    /// Log in unless a valid token is already held, holding the permit.
    pub async fn ensure_authenticated(&self) -> Result<(), AuthError> {
        let _permit = self.permit.lock().await;
        self.tokens.ensure_authenticated().await
    }

    pub async fn logout(&self) {
        let _permit = self.permit.lock().await;
        self.tokens.logout().await;
    }

    /// Sign, send and decrypt one request.
    ///
    /// Fails with [`DispatchError::NotAuthenticated`] before any network
    /// call when no valid token is held.
    pub async fn dispatch(
        &self,
        endpoint: &str,
        params: Map<String, Value>,
        options: DispatchOptions,
    ) -> Result<Envelope, DispatchError> {
        let _permit = self.permit.lock().await;
        let token = self
            .tokens
            .token()
            .await
            .ok_or(DispatchError::NotAuthenticated)?;

        let max_attempts = options.max_attempts.unwrap_or(self.max_attempts).max(1);
        let base_delay = options.retry_base_delay.unwrap_or(self.retry_base_delay);

        let mut attempt: u32 = 1;
        loop {
            let payload = self.signer.prepare(params.clone());
            self.stats.record_attempt();
            debug!(endpoint = %endpoint, attempt, "Dispatching signed request");

            match self
                .transport
                .post(endpoint, &payload.into_value(), Some(&token))
                .await
            {
                Ok(raw) => {
                    let envelope = self.cipher.decrypt(Envelope::from_value(raw));
                    self.stats.record_success(envelope.is_decrypted());
                    if let Some(data) = envelope.data_str().filter(|_| !envelope.is_decrypted()) {
                        if looks_like_ciphertext(data) {
                            warn!(
                                endpoint = %endpoint,
                                length = data.len(),
                                "Response data still looks encrypted"
                            );
                        }
                    }
                    return Ok(envelope);
                }
                Err(err) => {
                    self.stats.record_failure();
                    if !err.is_retryable() || attempt >= max_attempts {
                        warn!(
                            endpoint = %endpoint,
                            attempts = attempt,
                            error = %err,
                            "Dispatch failed"
                        );
                        return Err(DispatchError::Transport {
                            attempts: attempt,
                            source: err,
                        });
                    }

                    let delay = backoff_delay(base_delay, attempt);
                    warn!(
                        endpoint = %endpoint,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Dispatch attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Linear backoff before attempt `attempt + 1`, saturating at `Duration::MAX`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(attempt).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aes::encrypt_aes;
    use crate::crypto::signer::verify;
    use crate::error::TransportError;
    use crate::models::DecryptionMethod;
    use crate::testing::{test_config, FakeTransport, AES_PASSPHRASE, API_SECRET};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    /// Holds every call to `gated` until `release` is notified, logging each
    /// call as it reaches the transport.
    struct GatedTransport {
        inner: Arc<FakeTransport>,
        gated: &'static str,
        entered: Notify,
        release: Notify,
        arrivals: StdMutex<Vec<String>>,
    }

    impl GatedTransport {
        fn new(gated: &'static str) -> Self {
            Self {
                inner: Arc::new(FakeTransport::new()),
                gated,
                entered: Notify::new(),
                release: Notify::new(),
                arrivals: StdMutex::new(Vec::new()),
            }
        }

        fn arrivals(&self) -> Vec<String> {
            self.arrivals.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn post(
            &self,
            endpoint: &str,
            body: &Value,
            token: Option<&str>,
        ) -> Result<Value, TransportError> {
            self.arrivals.lock().unwrap().push(endpoint.to_string());
            if endpoint == self.gated {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.post(endpoint, body, token).await
        }
    }

    fn dispatcher(transport: &Arc<FakeTransport>) -> RequestDispatcher {
        let config = test_config();
        let tokens = Arc::new(TokenManager::new(&config, transport.clone()));
        RequestDispatcher::new(&config, tokens, transport.clone())
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn dispatch_without_token_fails_before_network() {
        let transport = Arc::new(FakeTransport::new());
        let dispatcher = dispatcher(&transport);

        let err = dispatcher
            .dispatch("/wallet/info", Map::new(), DispatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotAuthenticated));
        assert!(transport.calls().is_empty());
        assert_eq!(dispatcher.stats(), DispatchStatsSnapshot::default());
    }

    #[tokio::test]
    async fn dispatch_signs_attaches_token_and_decrypts() {
        let transport = Arc::new(FakeTransport::new());
        let dispatcher = dispatcher(&transport);
        dispatcher.authenticate().await.unwrap();

        let ciphertext = encrypt_aes(r#"{"balance":"42.00"}"#, AES_PASSPHRASE);
        transport.push(Ok(json!({ "code": 200, "data": ciphertext })));

        let envelope = dispatcher
            .dispatch(
                "/wallet/info",
                params(json!({ "currency": "USD", "memo": "" })),
                DispatchOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(envelope.decryption_method, Some(DecryptionMethod::Aes));
        assert_eq!(envelope.data, json!({ "balance": "42.00" }));
        assert_eq!(envelope.extra.get("code"), Some(&json!(200)));

        let call = transport.calls_to("/wallet/info").pop().unwrap();
        assert_eq!(call.token.as_deref(), Some("session-token-1"));
        let body = call.body.as_object().unwrap();
        assert!(verify(body, API_SECRET));
        assert!(!body.contains_key("memo"));
        assert_eq!(body.get("apiKey"), Some(&json!("test-api-key")));

        assert_eq!(
            dispatcher.stats(),
            DispatchStatsSnapshot {
                requests: 1,
                successful: 1,
                failed: 0,
                encrypted: 1
            }
        );
    }

    #[tokio::test]
    async fn plaintext_response_is_not_counted_as_encrypted() {
        let transport = Arc::new(FakeTransport::new());
        let dispatcher = dispatcher(&transport);
        dispatcher.authenticate().await.unwrap();

        let envelope = dispatcher
            .dispatch("/user/info", Map::new(), DispatchOptions::default())
            .await
            .unwrap();
        assert_eq!(envelope.data, json!({ "ok": true }));
        assert_eq!(dispatcher.stats().encrypted, 0);
        assert_eq!(dispatcher.stats().successful, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_retries_with_linear_backoff() {
        let transport = Arc::new(FakeTransport::new());
        let dispatcher = dispatcher(&transport);
        dispatcher.authenticate().await.unwrap();
        transport.set_fallback(Err(TransportError::Request("connection reset".into())));

        let err = dispatcher
            .dispatch("/ads/list", Map::new(), DispatchOptions::default())
            .await
            .unwrap_err();

        match &err {
            DispatchError::Transport { attempts, source } => {
                assert_eq!(*attempts, 3);
                assert_eq!(source, &TransportError::Request("connection reset".into()));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let calls = transport.calls_to("/ads/list");
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(1000));
        assert_eq!(calls[2].at - calls[1].at, Duration::from_millis(2000));

        let stats = dispatcher.stats();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.successful, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_and_resigns() {
        let transport = Arc::new(FakeTransport::new());
        let dispatcher = dispatcher(&transport);
        dispatcher.authenticate().await.unwrap();
        transport.push(Err(TransportError::Status {
            status: 502,
            body: "bad gateway".into(),
        }));
        transport.push(Ok(json!({ "data": { "income": 5 } })));

        let envelope = dispatcher
            .dispatch(
                "/income/summary",
                Map::new(),
                DispatchOptions::default().with_max_attempts(5),
            )
            .await
            .unwrap();
        assert_eq!(envelope.data, json!({ "income": 5 }));

        let calls = transport.calls_to("/income/summary");
        assert_eq!(calls.len(), 2);
        for call in &calls {
            assert!(verify(call.body.as_object().unwrap(), API_SECRET));
        }
        assert_eq!(
            dispatcher.stats(),
            DispatchStatsSnapshot {
                requests: 2,
                successful: 1,
                failed: 1,
                encrypted: 0
            }
        );
    }

    #[tokio::test]
    async fn invalid_body_is_not_retried() {
        let transport = Arc::new(FakeTransport::new());
        let dispatcher = dispatcher(&transport);
        dispatcher.authenticate().await.unwrap();
        transport.push(Err(TransportError::InvalidBody("expected value".into())));

        let err = dispatcher
            .dispatch("/user/info", Map::new(), DispatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport { attempts: 1, .. }));
        assert_eq!(transport.calls_to("/user/info").len(), 1);
    }

    #[tokio::test]
    async fn undecryptable_data_is_returned_as_is() {
        let transport = Arc::new(FakeTransport::new());
        let dispatcher = dispatcher(&transport);
        dispatcher.authenticate().await.unwrap();
        let opaque = "QUJD".repeat(40);
        transport.push(Ok(json!({ "data": opaque.clone() })));

        let envelope = dispatcher
            .dispatch("/financial/list", Map::new(), DispatchOptions::default())
            .await
            .unwrap();
        assert_eq!(envelope.data_str(), Some(opaque.as_str()));
        assert!(!envelope.is_decrypted());
        assert_eq!(dispatcher.stats().successful, 1);
        assert_eq!(dispatcher.stats().encrypted, 0);
    }

    #[tokio::test]
    async fn logout_blocks_further_dispatches() {
        let transport = Arc::new(FakeTransport::new());
        let dispatcher = dispatcher(&transport);
        dispatcher.authenticate().await.unwrap();
        dispatcher.logout().await;

        let err = dispatcher
            .dispatch("/user/info", Map::new(), DispatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotAuthenticated));
    }

    #[test]
    fn backoff_is_linear_and_saturates() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(Duration::MAX, 2), Duration::MAX);
        assert_eq!(backoff_delay(Duration::from_secs(u64::MAX / 2), 3), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_dispatch_holds_back_other_dispatches_and_logins() {
        let transport = Arc::new(GatedTransport::new("/slow"));
        let config = test_config();
        let tokens = Arc::new(TokenManager::new(&config, transport.clone()));
        let dispatcher = Arc::new(RequestDispatcher::new(&config, tokens, transport.clone()));
        dispatcher.authenticate().await.unwrap();

        let slow = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .dispatch("/slow", Map::new(), DispatchOptions::default())
                    .await
            }
        });
        transport.entered.notified().await;

        let fast = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .dispatch("/fast", Map::new(), DispatchOptions::default())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        // Drop the session behind the dispatcher's back so the login below
        // really has to reach the transport.
        dispatcher.tokens().logout().await;
        let relogin = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.authenticate().await }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.arrivals(), vec!["/user/login", "/slow"]);

        transport.release.notify_one();
        assert!(slow.await.unwrap().is_ok());
        assert!(matches!(
            fast.await.unwrap(),
            Err(DispatchError::NotAuthenticated)
        ));
        assert!(relogin.await.unwrap().is_ok());

        // `/fast` queued first and found the session gone, so only the
        // second login reached the transport.
        assert_eq!(
            transport.arrivals(),
            vec!["/user/login", "/slow", "/user/login"]
        );
    }
}
