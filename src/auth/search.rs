// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Locating the session token in a decrypted login response.
//!
//! The platform does not fix where the token lives. Known locations are
//! checked first; after that a depth-first search walks nested objects
//! (arrays are not entered) up to [`MAX_SEARCH_DEPTH`] levels.

use serde_json::Value;

pub const TOKEN_FIELD: &str = "token";

/// Nesting limit for the generic search.
pub const MAX_SEARCH_DEPTH: usize = 32;

const KNOWN_TOKEN_POINTERS: &[&str] = &["/data/token", "/token", "/data/user/token"];

/// Find the session token in a decrypted response.
pub fn extract_token(response: &Value) -> Option<String> {
    KNOWN_TOKEN_POINTERS
        .iter()
        .find_map(|pointer| non_empty_str(response.pointer(pointer)?))
        .or_else(|| find_token(response, MAX_SEARCH_DEPTH))
        .map(str::to_string)
}

/// Depth-first search for a non-empty string field named `token`.
///
/// An object's own `token` wins over any nested one. `Value` trees are
/// owned and cannot alias, so the depth bound is the only guard needed.
pub fn find_token(value: &Value, max_depth: usize) -> Option<&str> {
    search(value, 0, max_depth)
}

fn search(value: &Value, depth: usize, max_depth: usize) -> Option<&str> {
    let Value::Object(fields) = value else {
        return None;
    };
    if let Some(token) = fields.get(TOKEN_FIELD).and_then(non_empty_str) {
        return Some(token);
    }
    if depth >= max_depth {
        return None;
    }
    fields
        .values()
        .filter(|child| child.is_object())
        .find_map(|child| search(child, depth + 1, max_depth))
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}
