// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Response Data Models
//!
//! The platform wraps every response in an envelope whose `data` field is
//! either plaintext JSON or a ciphertext string. Once the cipher has run,
//! `data` holds the parsed plaintext and the envelope records which
//! algorithm succeeded together with the original ciphertext.
//!
//! All other top-level fields (`code`, `msg`, ...) are passed through
//! untouched in [`Envelope::extra`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Decryption Marker
// =============================================================================

/// Algorithm that successfully decrypted an envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DecryptionMethod {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "AES")]
    Aes,
}

impl DecryptionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecryptionMethod::Rsa => "RSA",
            DecryptionMethod::Aes => "AES",
        }
    }
}

impl std::fmt::Display for DecryptionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// A platform response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Envelope {
    /// Ciphertext string before decryption, parsed plaintext after.
    #[serde(default)]
    pub data: Value,

    /// Set only when decryption succeeded.
    #[serde(
        rename = "decryptionMethod",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub decryption_method: Option<DecryptionMethod>,

    /// The ciphertext as received, kept for diagnostics.
    #[serde(
        rename = "originalData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_data: Option<String>,

    /// Pass-through fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Wrap a raw response body.
    ///
    /// Objects are read field by field; any other JSON value becomes `data`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut fields) => {
                let data = fields.remove("data").unwrap_or(Value::Null);
                let decryption_method = fields
                    .remove("decryptionMethod")
                    .and_then(|v| serde_json::from_value(v).ok());
                let original_data = match fields.remove("originalData") {
                    Some(Value::String(s)) => Some(s),
                    _ => None,
                };
                Self {
                    data,
                    decryption_method,
                    original_data,
                    extra: fields,
                }
            }
            other => Self {
                data: other,
                ..Self::default()
            },
        }
    }

    pub fn is_decrypted(&self) -> bool {
        self.decryption_method.is_some()
    }

    /// The `data` field as a string, when it is still one.
    pub fn data_str(&self) -> Option<&str> {
        self.data.as_str()
    }

    pub fn into_value(self) -> Value {
        let mut fields = self.extra;
        fields.insert("data".to_string(), self.data);
        if let Some(method) = self.decryption_method {
            fields.insert(
                "decryptionMethod".to_string(),
                Value::String(method.as_str().to_string()),
            );
        }
        if let Some(original) = self.original_data {
            fields.insert("originalData".to_string(), Value::String(original));
        }
        Value::Object(fields)
    }
}
