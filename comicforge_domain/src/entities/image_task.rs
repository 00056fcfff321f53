// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Image Task Entity
//!
//! One unit of stage-5 fan-out work, identified by (session id, panel id).
//! Tasks are admitted in priority order - higher priority first, ties broken
//! by earliest panel id - under the per-session and global concurrency caps.
//!
//! ## Priority Formula
//!
//! Base 5; +2 if the panel sits on page 1; +2 if its emotional tone is a
//! peak (climax or tension); +1 if the panel size is prominent (splash or
//! large); clamped to [1, 10].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value_objects::cache_key::ImageCacheKey;
use crate::value_objects::generic_id::SessionId;
use crate::value_objects::panel_id::PanelId;
use crate::value_objects::stage_output::{EmotionalTone, ImagePayload, PanelSize};

/// One image rendering task of the stage-5 fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTask {
    pub session_id: SessionId,
    pub panel_id: PanelId,
    pub prompt: String,
    pub negative_prompt: String,
    pub style: BTreeMap<String, String>,
    /// Admission priority in [1, 10]; higher runs earlier.
    pub priority: u8,
    pub max_attempts: u32,
}

impl ImageTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        panel_id: PanelId,
        prompt: String,
        negative_prompt: String,
        style: BTreeMap<String, String>,
        tone: EmotionalTone,
        size: PanelSize,
        max_attempts: u32,
    ) -> Self {
        let priority = Self::priority_for(&panel_id, tone, size);
        Self {
            session_id,
            panel_id,
            prompt,
            negative_prompt,
            style,
            priority,
            max_attempts,
        }
    }

    /// Computes admission priority from panel placement, tone, and size.
    pub fn priority_for(panel_id: &PanelId, tone: EmotionalTone, size: PanelSize) -> u8 {
        let mut priority: i32 = 5;
        if panel_id.on_first_page() {
            priority += 2;
        }
        if tone.is_peak() {
            priority += 2;
        }
        if size.is_prominent() {
            priority += 1;
        }
        priority.clamp(1, 10) as u8
    }

    /// Content-addressed cache key over (prompt, negative prompt, style).
    pub fn cache_key(&self) -> ImageCacheKey {
        ImageCacheKey::compute(&self.prompt, &self.negative_prompt, &self.style)
    }

    /// Ordering key for admission: higher priority first, then reading order.
    pub fn admission_key(&self) -> (std::cmp::Reverse<u8>, PanelId) {
        (std::cmp::Reverse(self.priority), self.panel_id)
    }
}

/// Outcome of one image task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub panel_id: PanelId,
    pub image: ImagePayload,
    pub prompt: String,
    pub cache_hit: bool,
    /// Attempts spent, including the successful one.
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// Set when the task terminated without a rendered image.
    pub placeholder: bool,
}
