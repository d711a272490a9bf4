// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Passphrase-based AES-256-CBC compatible with OpenSSL `enc` / CryptoJS.
//!
//! Key and IV come from `EVP_BytesToKey` (MD5, one iteration) over the
//! passphrase and an optional 8-byte salt. The salted container is
//! `base64("Salted__" || salt || ciphertext)`.
//!
//! ## Security Note
//!
//! The unsalted form ([`decrypt_unsalted`]) derives the same key and IV for
//! every message under a passphrase. It exists only because the platform
//! emits it; do not use it for anything new.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64ct::{Base64, Encoding};
use md5::{Digest, Md5};
use rand::RngCore;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

const SALT_MAGIC: &[u8; 8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// Decrypt a salted OpenSSL container. `None` if anything fails or the
/// plaintext is empty.
pub fn decrypt_aes(ciphertext_b64: &str, passphrase: &str) -> Option<String> {
    let raw = decode_base64(ciphertext_b64)?;
    let body = raw.strip_prefix(SALT_MAGIC.as_slice())?;
    if body.len() < SALT_LEN {
        return None;
    }
    let (salt, ciphertext) = body.split_at(SALT_LEN);
    decrypt_with(ciphertext, passphrase, Some(salt))
}

/// Decrypt base64 ciphertext that carries no salt header.
pub fn decrypt_unsalted(ciphertext_b64: &str, passphrase: &str) -> Option<String> {
    let raw = decode_base64(ciphertext_b64)?;
    decrypt_with(&raw, passphrase, None)
}

/// Encrypt into a salted OpenSSL container with a random salt.
pub fn encrypt_aes(plaintext: &str, passphrase: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    encrypt_with_salt(plaintext, passphrase, &salt)
}

pub(crate) fn encrypt_with_salt(
    plaintext: &str,
    passphrase: &str,
    salt: &[u8; SALT_LEN],
) -> String {
    let (key, iv) = evp_bytes_to_key(passphrase.as_bytes(), Some(salt.as_slice()));
    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut container = Vec::with_capacity(SALT_MAGIC.len() + SALT_LEN + ciphertext.len());
    container.extend_from_slice(SALT_MAGIC);
    container.extend_from_slice(salt);
    container.extend_from_slice(&ciphertext);
    Base64::encode_string(&container)
}

pub(crate) fn encrypt_unsalted(plaintext: &str, passphrase: &str) -> String {
    let (key, iv) = evp_bytes_to_key(passphrase.as_bytes(), None);
    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    Base64::encode_string(&ciphertext)
}

fn decrypt_with(ciphertext: &[u8], passphrase: &str, salt: Option<&[u8]>) -> Option<String> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return None;
    }
    let (key, iv) = evp_bytes_to_key(passphrase.as_bytes(), salt);
    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .ok()?;
    String::from_utf8(plaintext).ok().filter(|s| !s.is_empty())
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single round.
fn evp_bytes_to_key(passphrase: &[u8], salt: Option<&[u8]>) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut derived = Vec::with_capacity(KEY_LEN + IV_LEN + 16);
    let mut previous: Vec<u8> = Vec::new();
    while derived.len() < KEY_LEN + IV_LEN {
        let mut hasher = Md5::new();
        hasher.update(&previous);
        hasher.update(passphrase);
        if let Some(salt) = salt {
            hasher.update(salt);
        }
        previous = hasher.finalize().to_vec();
        derived.extend_from_slice(&previous);
    }

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}

/// Standard padded base64, tolerating embedded whitespace.
pub(crate) fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    Base64::decode_vec(&compact).ok()
}
