// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for unit tests: one RSA-1024 key, an AES passphrase and
//! a scripted in-memory transport.

use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};

use crate::config::{ClientConfig, ClientSettings, Credentials, KeyMaterial};
use crate::crypto::aes::encrypt_aes;
use crate::error::TransportError;
use crate::transport::Transport;

pub(crate) const AES_PASSPHRASE: &str = "unit-test-passphrase";
pub(crate) const API_KEY: &str = "test-api-key";
pub(crate) const API_SECRET: &str = "test-api-secret";
pub(crate) const LOGIN_ENDPOINT: &str = "/user/login";

/// PKCS#1 v1.5 overhead for RSA-1024: 128 - 11.
const RSA_1024_MAX_PLAINTEXT: usize = 117;

pub(crate) fn test_private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate RSA-1024 key")
    })
}

pub(crate) fn test_private_key_pem() -> String {
    test_private_key()
        .to_pkcs8_pem(LineEnding::LF)
        .expect("encode PEM")
        .to_string()
}

pub(crate) fn rsa_encrypt_single(plaintext: &str) -> String {
    let public = RsaPublicKey::from(test_private_key());
    let ciphertext = public
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, plaintext.as_bytes())
        .expect("plaintext fits one block");
    Base64::encode_string(&ciphertext)
}

pub(crate) fn rsa_encrypt_chunked(plaintext: &[u8]) -> String {
    let public = RsaPublicKey::from(test_private_key());
    let mut ciphertext = Vec::new();
    for piece in plaintext.chunks(RSA_1024_MAX_PLAINTEXT) {
        let block = public
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, piece)
            .expect("encrypt block");
        ciphertext.extend_from_slice(&block);
    }
    Base64::encode_string(&ciphertext)
}

pub(crate) fn test_keys() -> KeyMaterial {
    KeyMaterial::new(API_KEY, API_SECRET, &test_private_key_pem(), AES_PASSPHRASE)
        .expect("test key material")
}

pub(crate) fn test_config() -> ClientConfig {
    let mut settings = ClientSettings::new("https://platform.test").expect("settings");
    settings.login_endpoint = LOGIN_ENDPOINT.to_string();
    ClientConfig::new(
        Credentials::new("+1", "alice", "246810").expect("credentials"),
        test_keys(),
        settings,
    )
}

/// Login response whose token sits three objects deep inside AES data.
pub(crate) fn encrypted_login_response(token: &str) -> Value {
    let plaintext = json!({
        "user": {
            "id": 7,
            "session": { "expires": "never", "token": token }
        }
    })
    .to_string();
    json!({ "code": 200, "msg": "ok", "data": encrypt_aes(&plaintext, AES_PASSPHRASE) })
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub endpoint: String,
    pub body: Value,
    pub token: Option<String>,
    pub at: tokio::time::Instant,
}

/// Transport that answers the login endpoint with a fixed response and
/// every other endpoint from a queue, falling back to a default.
pub(crate) struct FakeTransport {
    login: Mutex<Result<Value, TransportError>>,
    queue: Mutex<VecDeque<Result<Value, TransportError>>>,
    fallback: Mutex<Result<Value, TransportError>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            login: Mutex::new(Ok(encrypted_login_response("session-token-1"))),
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(json!({ "code": 200, "data": { "ok": true } }))),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_login(&self, response: Result<Value, TransportError>) {
        *self.login.lock().unwrap() = response;
    }

    pub fn push(&self, response: Result<Value, TransportError>) {
        self.queue.lock().unwrap().push_back(response);
    }

    pub fn set_fallback(&self, response: Result<Value, TransportError>) {
        *self.fallback.lock().unwrap() = response;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.endpoint == endpoint)
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn post(
        &self,
        endpoint: &str,
        body: &Value,
        token: Option<&str>,
    ) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            endpoint: endpoint.to_string(),
            body: body.clone(),
            token: token.map(str::to_string),
            at: tokio::time::Instant::now(),
        });

        if endpoint == LOGIN_ENDPOINT {
            return self.login.lock().unwrap().clone();
        }
        let queued = self.queue.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}
