// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Scripted Image Model
//!
//! Deterministic implementation of the image model port. Renders a small
//! inline SVG derived from the prompt hash - byte-identical for identical
//! (prompt, negative prompt, style) inputs, which is what the content-
//! addressed cache contract requires.
//!
//! Failure injection mirrors the scripted text model: transient errors keyed
//! by prompt substring (consumed per call) and a content-policy trigger
//! substring that rejects immediately and non-retryably.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use comicforge_domain::services::{ImageGenRequest, ImageGenResponse, ImageModelService};
use comicforge_domain::{EngineError, ImagePayload};

/// Deterministic image backend with failure injection.
pub struct ScriptedImageModel {
    /// Prompt substring -> remaining transient failures to emit.
    transient_failures: Mutex<HashMap<String, u32>>,
    /// Prompts containing this substring are rejected as policy violations.
    content_policy_trigger: Option<String>,
}

impl ScriptedImageModel {
    pub fn new() -> Self {
        Self {
            transient_failures: Mutex::new(HashMap::new()),
            content_policy_trigger: None,
        }
    }

    /// Returns a model that rejects prompts containing `trigger`.
    pub fn with_content_policy_trigger(trigger: impl Into<String>) -> Self {
        Self {
            transient_failures: Mutex::new(HashMap::new()),
            content_policy_trigger: Some(trigger.into()),
        }
    }

    /// The next `count` renders of prompts containing `marker` fail with a
    /// retryable error.
    pub fn inject_transient_failures(&self, marker: impl Into<String>, count: u32) {
        self.transient_failures.lock().insert(marker.into(), count);
    }

    fn take_transient(&self, prompt: &str) -> bool {
        let mut failures = self.transient_failures.lock();
        let marker = failures
            .iter()
            .find(|(marker, remaining)| prompt.contains(marker.as_str()) && **remaining > 0)
            .map(|(marker, _)| marker.clone());
        match marker {
            Some(marker) => {
                if let Some(remaining) = failures.get_mut(&marker) {
                    *remaining -= 1;
                }
                true
            }
            None => false,
        }
    }
}

impl Default for ScriptedImageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageModelService for ScriptedImageModel {
    async fn render(&self, request: ImageGenRequest) -> Result<ImageGenResponse, EngineError> {
        if let Some(trigger) = &self.content_policy_trigger {
            if request.prompt.contains(trigger.as_str()) {
                return Err(EngineError::content_policy(format!(
                    "prompt rejected (matched '{}')",
                    trigger
                )));
            }
        }
        if self.take_transient(&request.prompt) {
            return Err(EngineError::ai_retryable("scripted transient render failure"));
        }

        let image = render_svg(&request);
        Ok(ImageGenResponse {
            image,
            model: "scripted-image-v1".to_string(),
            latency_ms: 8,
        })
    }
}

/// Renders the deterministic placeholder SVG for a request.
fn render_svg(request: &ImageGenRequest) -> ImagePayload {
    // The digest covers exactly the cache-key fields, so equal keys yield
    // equal bytes.
    let style_canonical = serde_json::to_string(&request.style).unwrap_or_default();
    let digest = Sha256::digest(format!("{}\u{1f}{}\u{1f}{}", request.prompt, request.negative_prompt, style_canonical).as_bytes());
    let hue = (u32::from(digest[0]) * 360) / 256;
    let tag = hex::encode(&digest[..6]);

    let svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"512\" height=\"512\">\
<rect width=\"512\" height=\"512\" fill=\"hsl({hue},40%,70%)\"/>\
<text x=\"16\" y=\"496\" font-size=\"14\" fill=\"#222\">{tag}</text>\
</svg>"
    );

    ImagePayload::Inline {
        media_type: "image/svg+xml".to_string(),
        base64: BASE64.encode(svg.as_bytes()),
    }
}
