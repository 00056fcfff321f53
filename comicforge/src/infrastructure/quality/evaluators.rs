// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Heuristic Category Evaluators
//!
//! Default pluggable evaluators registered with the quality gate. Stage
//! workers score their own payloads for the narrative categories; these
//! evaluators contribute the cross-stage, image-oriented views that a single
//! worker cannot judge well on its own.
//!
//! Evaluators are pure functions over (context, output) and return [0, 1].

use std::sync::Arc;

use comicforge_domain::services::quality_evaluator::{CategoryEvaluator, QualityCategory};
use comicforge_domain::services::stage_worker::StageContext;
use comicforge_domain::StageOutput;

/// Visual consistency: penalises placeholder panels and style drift across
/// the rendered set.
pub struct VisualConsistencyEvaluator;

impl CategoryEvaluator for VisualConsistencyEvaluator {
    fn category(&self) -> QualityCategory {
        QualityCategory::VisualConsistency
    }

    fn evaluate(&self, _ctx: &StageContext, output: &StageOutput) -> f64 {
        match output {
            StageOutput::SceneImages(images) => {
                if images.images.is_empty() {
                    return 0.2;
                }
                let rendered = images.images.iter().filter(|i| !i.placeholder).count() as f64;
                let ratio = rendered / images.images.len() as f64;
                0.4 + 0.6 * ratio
            }
            StageOutput::Final(fin) => {
                if fin.pages.is_empty() {
                    0.2
                } else if fin.stats.degraded_sections.is_empty() {
                    0.9
                } else {
                    0.65
                }
            }
            StageOutput::Placeholder { .. } => 0.1,
            // Textual stages carry no rendered panels to judge
            _ => 0.8,
        }
    }
}

/// Technical quality: fan-out efficiency and panel failure counts.
pub struct TechnicalQualityEvaluator;

impl CategoryEvaluator for TechnicalQualityEvaluator {
    fn category(&self) -> QualityCategory {
        QualityCategory::TechnicalQuality
    }

    fn evaluate(&self, _ctx: &StageContext, output: &StageOutput) -> f64 {
        match output {
            StageOutput::SceneImages(images) => {
                let failures = images.images.iter().filter(|i| i.placeholder).count();
                let failure_penalty = 0.15 * failures as f64;
                (0.6 + 0.4 * images.efficiency - failure_penalty).clamp(0.0, 1.0)
            }
            StageOutput::Placeholder { .. } => 0.1,
            _ => 0.82,
        }
    }
}

/// The evaluator set wired into the default engine build.
pub fn default_evaluators() -> Vec<Arc<dyn CategoryEvaluator>> {
    vec![Arc::new(VisualConsistencyEvaluator), Arc::new(TechnicalQualityEvaluator)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use comicforge_domain::{
        ImagePayload, PanelId, PanelImage, QualityLevel, SceneImagesOutput, SessionId, StageIndex,
    };
    use std::collections::BTreeMap;

    fn ctx() -> StageContext {
        StageContext {
            session_id: SessionId::new(),
            stage: StageIndex::new(5).unwrap(),
            attempt: 1,
            quality: QualityLevel::Medium,
            submission: String::new(),
            prior: BTreeMap::new(),
            modifications: vec![],
            stage_scores: BTreeMap::new(),
            stage_attempts: BTreeMap::new(),
            elapsed_ms: 0,
        }
    }

    fn panel(placeholder: bool) -> PanelImage {
        PanelImage {
            panel_id: PanelId::new(1, 1).unwrap(),
            image: ImagePayload::Inline {
                media_type: "image/svg+xml".to_string(),
                base64: String::new(),
            },
            prompt: "p".to_string(),
            cache_hit: false,
            placeholder,
        }
    }

    #[test]
    fn test_visual_consistency_tracks_placeholder_ratio() {
        let evaluator = VisualConsistencyEvaluator;
        let clean = StageOutput::SceneImages(SceneImagesOutput {
            images: vec![panel(false), panel(false)],
            efficiency: 0.8,
        });
        let degraded = StageOutput::SceneImages(SceneImagesOutput {
            images: vec![panel(false), panel(true)],
            efficiency: 0.8,
        });
        assert!(evaluator.evaluate(&ctx(), &clean) > evaluator.evaluate(&ctx(), &degraded));
    }

    #[test]
    fn test_technical_quality_rewards_efficiency() {
        let evaluator = TechnicalQualityEvaluator;
        let efficient = StageOutput::SceneImages(SceneImagesOutput {
            images: vec![panel(false)],
            efficiency: 0.9,
        });
        let serial = StageOutput::SceneImages(SceneImagesOutput {
            images: vec![panel(false)],
            efficiency: 0.1,
        });
        assert!(evaluator.evaluate(&ctx(), &efficient) > evaluator.evaluate(&ctx(), &serial));
    }

    #[test]
    fn test_placeholders_score_low() {
        let output = StageOutput::Placeholder {
            stage: StageIndex::new(5).unwrap(),
            reason: "x".to_string(),
        };
        for evaluator in default_evaluators() {
            assert!(evaluator.evaluate(&ctx(), &output) < 0.5);
        }
    }
}
