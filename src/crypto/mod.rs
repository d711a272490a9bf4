// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pure cryptographic building blocks: request signing and response
//! decryption. Nothing in this module performs I/O.

pub mod aes;
pub mod cipher;
pub mod signer;

pub use cipher::{looks_like_ciphertext, ResponseCipher};
pub use signer::{SignedPayload, Signer};
