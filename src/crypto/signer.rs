// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HMAC-SHA256 request signing.
//!
//! The canonical string is `k1=v1&k2=v2&...` over all fields sorted by key
//! (code point order). Empty strings and nulls are stripped before signing,
//! and `sign` is never part of its own input.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGN_FIELD: &str = "sign";
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const API_KEY_FIELD: &str = "apiKey";

/// A request body ready to send: caller fields plus `timestamp`, `apiKey`
/// and the `sign` computed over everything else.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SignedPayload(Map<String, Value>);

impl SignedPayload {
    pub fn signature(&self) -> Option<&str> {
        self.0.get(SIGN_FIELD).and_then(Value::as_str)
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.0.get(TIMESTAMP_FIELD).and_then(Value::as_i64)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Signs payloads with one API key pair.
#[derive(Clone)]
pub struct Signer {
    api_key: String,
    api_secret: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl Signer {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Build a signed payload from caller fields using the current time.
    pub fn prepare(&self, fields: Map<String, Value>) -> SignedPayload {
        prepare(
            fields,
            &self.api_key,
            &self.api_secret,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    pub fn verify(&self, payload: &Map<String, Value>) -> bool {
        verify(payload, &self.api_secret)
    }
}

/// Lowercase hex HMAC-SHA256 of the canonical form of `fields`.
pub fn sign(fields: &Map<String, Value>, secret: &str) -> String {
    let canonical = canonical_string(fields);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Add `timestamp` (if absent) and `apiKey` (if absent), strip empty
/// fields, then attach `sign`.
pub fn prepare(
    mut fields: Map<String, Value>,
    api_key: &str,
    secret: &str,
    now_millis: i64,
) -> SignedPayload {
    // A stale signature must never feed into the new one.
    fields.remove(SIGN_FIELD);

    if !fields.contains_key(TIMESTAMP_FIELD) {
        fields.insert(TIMESTAMP_FIELD.to_string(), Value::from(now_millis));
    }
    if !fields.contains_key(API_KEY_FIELD) {
        fields.insert(API_KEY_FIELD.to_string(), Value::String(api_key.to_string()));
    }
    fields.retain(|_, value| !is_empty_value(value));

    let signature = sign(&fields, secret);
    fields.insert(SIGN_FIELD.to_string(), Value::String(signature));
    SignedPayload(fields)
}

/// Recompute the signature over `payload` minus `sign`.
///
/// Returns `false` when `sign` is absent.
pub fn verify(payload: &Map<String, Value>, secret: &str) -> bool {
    let Some(expected) = payload.get(SIGN_FIELD).and_then(Value::as_str) else {
        return false;
    };
    let mut unsigned = payload.clone();
    unsigned.remove(SIGN_FIELD);
    sign(&unsigned, secret) == expected
}

/// `k1=v1&k2=v2&...` with keys in code point order.
pub fn canonical_string(fields: &Map<String, Value>) -> String {
    let ordered: BTreeMap<&str, &Value> = fields.iter().map(|(k, v)| (k.as_str(), v)).collect();
    ordered
        .into_iter()
        .map(|(key, value)| format!("{key}={}", render_value(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
