// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Response decryption.
//!
//! Attempts run in order and the first success wins:
//!
//! 1. RSA (PKCS#1 v1.5) over the whole ciphertext as one block.
//! 2. RSA chunked: the decoded ciphertext split into modulus-sized blocks,
//!    each decrypted independently. Any failing block fails the attempt.
//! 3. AES with the passphrase, salted container first, then unsalted.
//!
//! RSA plaintext is URL-encoded by the platform: `+` must become `%20`
//! before percent-decoding, otherwise literal pluses in the plaintext are
//! corrupted.
//!
//! Decryption failure is not an error. The envelope comes back unchanged
//! and the caller decides whether a ciphertext string is acceptable.

use percent_encoding::percent_decode_str;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use serde_json::Value;
use tracing::{debug, warn};

use super::aes::{decode_base64, decrypt_aes, decrypt_unsalted};
use crate::models::{DecryptionMethod, Envelope};

/// Minimum length before a string is suspected to be ciphertext.
const SUSPECTED_CIPHERTEXT_MIN_LEN: usize = 100;

/// Decrypts selectively-encrypted response envelopes.
#[derive(Clone)]
pub struct ResponseCipher {
    private_key: RsaPrivateKey,
    aes_passphrase: String,
}

impl std::fmt::Debug for ResponseCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCipher")
            .field("rsa_block_size", &self.block_size())
            .finish_non_exhaustive()
    }
}

impl ResponseCipher {
    pub fn new(private_key: RsaPrivateKey, aes_passphrase: impl Into<String>) -> Self {
        Self {
            private_key,
            aes_passphrase: aes_passphrase.into(),
        }
    }

    /// RSA block size in bytes (128 for RSA-1024).
    pub fn block_size(&self) -> usize {
        self.private_key.size()
    }

    /// Decrypt `envelope.data` in place. No-op unless `data` is a string.
    pub fn decrypt(&self, mut envelope: Envelope) -> Envelope {
        let Some(ciphertext) = envelope.data.as_str().map(str::to_string) else {
            return envelope;
        };

        let (data, method) = if let Some(plaintext) = self.decrypt_rsa(&ciphertext) {
            match decode_rsa_plaintext(&plaintext) {
                Some(data) => (data, DecryptionMethod::Rsa),
                None => match self.decrypt_aes_fallback(&ciphertext) {
                    Some(data) => (data, DecryptionMethod::Aes),
                    None => return self.give_up(envelope, &ciphertext),
                },
            }
        } else {
            match self.decrypt_aes_fallback(&ciphertext) {
                Some(data) => (data, DecryptionMethod::Aes),
                None => return self.give_up(envelope, &ciphertext),
            }
        };

        debug!(method = %method, "Response payload decrypted");
        envelope.data = data;
        envelope.decryption_method = Some(method);
        envelope.original_data = Some(ciphertext);
        envelope
    }

    /// Raw RSA plaintext: single block first, then chunked.
    pub fn decrypt_rsa(&self, ciphertext_b64: &str) -> Option<String> {
        let raw = decode_base64(ciphertext_b64)?;
        if let Some(plaintext) = self.decrypt_rsa_block(&raw).filter(|p| !p.is_empty()) {
            return String::from_utf8(plaintext).ok();
        }
        let plaintext = self.decrypt_rsa_chunked(&raw)?;
        String::from_utf8(plaintext).ok().filter(|s| !s.is_empty())
    }

    fn decrypt_rsa_block(&self, block: &[u8]) -> Option<Vec<u8>> {
        self.private_key.decrypt(Pkcs1v15Encrypt, block).ok()
    }

    /// All-or-nothing: one bad block fails the whole attempt.
    fn decrypt_rsa_chunked(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let block_size = self.block_size();
        if raw.len() <= block_size {
            return None;
        }

        let mut plaintext = Vec::with_capacity(raw.len());
        for (index, block) in raw.chunks(block_size).enumerate() {
            match self.decrypt_rsa_block(block) {
                Some(bytes) => plaintext.extend_from_slice(&bytes),
                None => {
                    debug!(block = index, "RSA chunk failed to decrypt");
                    return None;
                }
            }
        }
        Some(plaintext)
    }

    fn decrypt_aes_fallback(&self, ciphertext: &str) -> Option<Value> {
        let plaintext = decrypt_aes(ciphertext, &self.aes_passphrase)
            .or_else(|| decrypt_unsalted(ciphertext, &self.aes_passphrase))?;
        Some(parse_json_or_string(plaintext))
    }

    fn give_up(&self, envelope: Envelope, ciphertext: &str) -> Envelope {
        warn!(
            length = ciphertext.len(),
            "Response payload could not be decrypted with RSA or AES"
        );
        envelope
    }
}

/// `+` to `%20`, percent-decode, then parse.
///
/// `None` when the decoded bytes are not UTF-8.
fn decode_rsa_plaintext(plaintext: &str) -> Option<Value> {
    let escaped = plaintext.replace('+', "%20");
    let decoded = percent_decode_str(&escaped).decode_utf8().ok()?;
    Some(parse_json_or_string(decoded.into_owned()))
}

fn parse_json_or_string(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Heuristic for human-facing warnings only; never gates decryption.
pub fn looks_like_ciphertext(value: &str) -> bool {
    value.len() > SUSPECTED_CIPHERTEXT_MIN_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}
