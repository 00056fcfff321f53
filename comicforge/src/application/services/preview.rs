// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Preview Service
//!
//! Derives rendering-ready previews from stage results at the session's
//! quality level. The stage result is the single source of truth; previews
//! are memoised by (stage, quality, output fingerprint) and invalidated when
//! the underlying result is superseded on the active branch.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;

use comicforge_domain::{PreviewPayload, QualityLevel, StageIndex, StageOutput, StageResult};

/// Memoising preview deriver.
#[derive(Default)]
pub struct PreviewService {
    cache: Mutex<HashMap<(u8, QualityLevel, String), PreviewPayload>>,
}

impl PreviewService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives (or recalls) the preview of a stage result.
    pub fn derive(&self, quality: QualityLevel, result: &StageResult) -> PreviewPayload {
        let fingerprint = result.output_fingerprint();
        let key = (result.stage().value(), quality, fingerprint.clone());

        if let Some(preview) = self.cache.lock().get(&key) {
            return preview.clone();
        }

        let preview = PreviewPayload {
            stage: result.stage(),
            quality,
            source_fingerprint: fingerprint,
            summary: summarize(result.output()),
            detail: project(result.output(), quality),
            generated_at: Utc::now(),
        };
        self.cache.lock().insert(key, preview.clone());
        preview
    }

    /// Drops memoised previews of a stage after its result is superseded.
    pub fn invalidate_stage(&self, stage: StageIndex) {
        self.cache.lock().retain(|(s, _, _), _| *s != stage.value());
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }
}

/// One-line human-readable summary of a stage output.
fn summarize(output: &StageOutput) -> String {
    match output {
        StageOutput::Concept(concept) => format!(
            "Concept: '{}' for a {}-page {} story",
            concept.theme,
            concept.estimated_pages,
            concept.genres.first().map(String::as_str).unwrap_or("genre-less")
        ),
        StageOutput::Characters(characters) => {
            let names: Vec<&str> = characters.characters.iter().map(|c| c.name.as_str()).collect();
            format!("Cast of {}: {}", names.len(), names.join(", "))
        }
        StageOutput::Plot(plot) => format!("Three acts, {} scenes", plot.scene_breakdown.len()),
        StageOutput::Storyboard(storyboard) => format!(
            "{} pages, {} panels",
            storyboard.pages.len(),
            storyboard.panel_count()
        ),
        StageOutput::SceneImages(images) => {
            let rendered = images.images.iter().filter(|i| !i.placeholder).count();
            format!("{}/{} panels rendered", rendered, images.images.len())
        }
        StageOutput::Dialogue(dialogue) => format!(
            "{} dialogue lines, {} sound effects",
            dialogue.dialogues.len(),
            dialogue.sound_effects.len()
        ),
        StageOutput::Final(fin) => format!("Final artifact: {} pages", fin.pages.len()),
        StageOutput::Placeholder { stage, reason } => format!("Stage {} placeholder: {}", stage, reason),
    }
}

/// Quality-dependent projection of the payload.
///
/// Lower levels carry only the summary fields; `ultra-high` carries the full
/// payload. The projection never includes inline image bytes below `high`.
fn project(output: &StageOutput, quality: QualityLevel) -> serde_json::Value {
    let detail = quality.preview_detail();
    let mut value = output.to_json();

    if detail >= 5 {
        return value;
    }
    if let Some(map) = value.as_object_mut() {
        map.remove("stage-output");
    }
    match (output, detail) {
        (_, 1) => serde_json::json!({ "summary": summarize(output) }),
        (StageOutput::SceneImages(images), _) if detail < 4 => {
            // Strip inline bytes; keep per-panel metadata
            let panels: Vec<serde_json::Value> = images
                .images
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "panel_id": p.panel_id.to_string(),
                        "cache_hit": p.cache_hit,
                        "placeholder": p.placeholder,
                    })
                })
                .collect();
            serde_json::json!({ "images": panels, "efficiency": images.efficiency })
        }
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comicforge_domain::{ConceptOutput, QualityScore, SessionId};

    fn result(theme: &str) -> StageResult {
        StageResult::new(
            SessionId::new(),
            StageIndex::first(),
            1,
            "fp".to_string(),
            StageOutput::Concept(ConceptOutput {
                theme: theme.to_string(),
                genres: vec!["drama".to_string()],
                world_setting: "w".to_string(),
                target_audience: "teen".to_string(),
                estimated_pages: 3,
            }),
            QualityScore::clamped(0.8),
            10,
            vec![],
        )
    }

    #[test]
    fn test_derivation_is_memoised_by_fingerprint() {
        let service = PreviewService::new();
        let a = service.derive(QualityLevel::Medium, &result("tides"));
        let b = service.derive(QualityLevel::Medium, &result("tides"));
        assert_eq!(a.generated_at, b.generated_at, "second derivation served from cache");
        assert_eq!(service.cached_count(), 1);

        // A different quality level is a distinct projection
        service.derive(QualityLevel::UltraLow, &result("tides"));
        assert_eq!(service.cached_count(), 2);
    }

    #[test]
    fn test_supersession_invalidates() {
        let service = PreviewService::new();
        service.derive(QualityLevel::Medium, &result("tides"));
        service.invalidate_stage(StageIndex::first());
        assert_eq!(service.cached_count(), 0);
    }

    #[test]
    fn test_projection_depth_follows_quality() {
        let service = PreviewService::new();
        let low = service.derive(QualityLevel::UltraLow, &result("tides"));
        assert!(low.detail.get("summary").is_some());
        assert!(low.detail.get("theme").is_none());

        let high = service.derive(QualityLevel::UltraHigh, &result("tides"));
        assert_eq!(high.detail.pointer("/theme").and_then(|v| v.as_str()), Some("tides"));
    }
}
