// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage 4: storyboard ("name") layout.
//!
//! Pages and panels with sizes, camera angles, and draft dialogue. This is
//! the stage where pacing feedback lands: a pacing modifier in the merged
//! input shifts panel density.

use std::sync::Arc;

use async_trait::async_trait;

use comicforge_domain::services::quality_evaluator::QualityCategory;
use comicforge_domain::services::{
    CategoryScores, ProgressSink, StageContext, StageWorker, TextGenRequest, TextModelService,
};
use comicforge_domain::{EngineError, StageIndex, StageOutput, StoryboardOutput};

use super::{modifications_json, parse_draft, prior_json, require_priors};

pub struct StoryboardWorker {
    model: Arc<dyn TextModelService>,
}

impl StoryboardWorker {
    pub fn new(model: Arc<dyn TextModelService>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageWorker for StoryboardWorker {
    fn stage(&self) -> StageIndex {
        StageIndex::new(4).expect("stage 4 is in range")
    }

    fn validate_input(&self, ctx: &StageContext) -> Result<(), EngineError> {
        require_priors(ctx, &[1, 2, 3])
    }

    async fn execute(&self, ctx: &StageContext, progress: &dyn ProgressSink) -> Result<StageOutput, EngineError> {
        progress.report(5);
        let request = TextGenRequest {
            stage: self.stage(),
            prompt: "Lay out the storyboard: pages of panels with sizes, camera angles, and draft dialogue."
                .to_string(),
            context: serde_json::json!({
                "submission": ctx.submission,
                "concept": prior_json(ctx, 1),
                "characters": prior_json(ctx, 2),
                "plot": prior_json(ctx, 3),
                "modifications": modifications_json(ctx),
            }),
            quality: ctx.quality,
        };
        let response = self.model.generate(request).await?;
        progress.report(80);

        let storyboard: StoryboardOutput = parse_draft(&response.content, "storyboard")?;
        if storyboard.pages.is_empty() {
            return Err(EngineError::ai_retryable("storyboard draft carries no pages"));
        }
        Ok(StageOutput::Storyboard(storyboard))
    }

    fn validate_output(&self, _ctx: &StageContext, output: &StageOutput) -> Result<(), EngineError> {
        match output {
            StageOutput::Storyboard(storyboard) => {
                for (i, page) in storyboard.pages.iter().enumerate() {
                    if page.number != i as u32 + 1 {
                        return Err(EngineError::internal(format!(
                            "storyboard page numbering broken at position {}",
                            i
                        )));
                    }
                    if page.panels.is_empty() {
                        return Err(EngineError::internal(format!("storyboard page {} has no panels", page.number)));
                    }
                }
                Ok(())
            }
            StageOutput::Placeholder { .. } => Ok(()),
            other => Err(EngineError::internal(format!(
                "storyboard worker produced stage {} payload",
                other.stage()
            ))),
        }
    }

    fn evaluate_quality(&self, _ctx: &StageContext, output: &StageOutput) -> CategoryScores {
        let mut scores = CategoryScores::new();
        match output {
            StageOutput::Storyboard(storyboard) => {
                let pages = storyboard.pages.len().max(1);
                let mean_panels = storyboard.panel_count() as f64 / pages as f64;
                // Two to four panels per page reads comfortably
                let pacing = if (2.0..=4.0).contains(&mean_panels) { 0.88 } else { 0.68 };
                let readability = if storyboard
                    .pages
                    .iter()
                    .flat_map(|p| p.panels.iter())
                    .any(|panel| panel.description.trim().is_empty())
                {
                    0.55
                } else {
                    0.84
                };
                scores.insert(QualityCategory::PacingFlow, pacing);
                scores.insert(QualityCategory::Readability, readability);
                scores.insert(QualityCategory::NarrativeCoherence, 0.82);
                scores.insert(QualityCategory::CharacterDevelopment, 0.76);
                scores.insert(QualityCategory::ArtisticAppeal, 0.8);
            }
            _ => {
                for category in QualityCategory::ALL {
                    scores.insert(category, 0.1);
                }
            }
        }
        scores
    }
}
