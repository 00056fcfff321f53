// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shared Image Cache
//!
//! Process-wide content-addressed cache of rendered images, shared across
//! sessions. Keys are the stable hash of (prompt, negative prompt, style);
//! two tasks with identical keys return byte-identical outputs.
//!
//! Entries expire by quality level (lower quality, shorter retention).
//! Concurrent producers with the same key write identical payloads, so
//! last-writer-wins is harmless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use comicforge_domain::{ImageCacheKey, ImagePayload, QualityLevel};

struct CacheEntry {
    image: ImagePayload,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

/// Content-addressed image cache with per-quality TTL.
pub struct ImageCache {
    entries: RwLock<HashMap<ImageCacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ImageCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up a key, recording the hit or miss. Expired entries miss and
    /// are evicted lazily.
    pub fn get(&self, key: &ImageCacheKey) -> Option<ImagePayload> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(key) {
                if !entry.is_expired(now) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.image.clone());
                }
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }
        // Expired: evict under the write lock, count as a miss
        self.entries.write().remove(key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores a rendered image under its content key. TTL follows the
    /// requested quality level.
    pub fn insert(&self, key: ImageCacheKey, image: ImagePayload, quality: QualityLevel) {
        self.insert_with_ttl(key, image, quality.cache_ttl());
    }

    /// Stores with an explicit TTL.
    pub fn insert_with_ttl(&self, key: ImageCacheKey, image: ImagePayload, ttl: Duration) {
        let entry = CacheEntry {
            image,
            stored_at: Instant::now(),
            ttl,
        };
        self.entries.write().insert(key, entry);
    }

    /// Removes all expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Lifetime hit rate in [0, 1]; `None` before any lookup.
    pub fn hit_rate(&self) -> Option<f64> {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            None
        } else {
            Some(hits as f64 / total as f64)
        }
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}
