// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Image Cache Key
//!
//! Content-addressed key under which a rendered image is stored and
//! retrieved. The key is the first 128 bits of the SHA-256 digest of the
//! canonical JSON of `{prompt, negative_prompt, style}` with object keys
//! sorted. Two tasks with identical keys must return byte-identical outputs;
//! any mutation of prompt or style forces a new key.
//!
//! Canonicalisation relies on `serde_json`'s map type being ordered by key,
//! so equal inputs always serialize to the same bytes regardless of how the
//! style map was populated.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content-addressed image cache key (32 hex characters, 128 bits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageCacheKey(String);

impl ImageCacheKey {
    /// Computes the key for an image generation request.
    pub fn compute(prompt: &str, negative_prompt: &str, style: &BTreeMap<String, String>) -> Self {
        let mut doc = serde_json::Map::new();
        doc.insert("negative_prompt".to_string(), serde_json::Value::from(negative_prompt));
        doc.insert("prompt".to_string(), serde_json::Value::from(prompt));
        doc.insert(
            "style".to_string(),
            serde_json::Value::Object(
                style
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v.as_str())))
                    .collect(),
            ),
        );
        // serde_json maps iterate in key order, so this serialization is canonical
        let canonical = serde_json::Value::Object(doc).to_string();

        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
