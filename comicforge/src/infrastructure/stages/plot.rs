// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage 3: three-act plot and scene breakdown.

use std::sync::Arc;

use async_trait::async_trait;

use comicforge_domain::services::quality_evaluator::QualityCategory;
use comicforge_domain::services::{
    CategoryScores, ProgressSink, StageContext, StageWorker, TextGenRequest, TextModelService,
};
use comicforge_domain::{EngineError, PlotOutput, StageIndex, StageOutput};

use super::{modifications_json, parse_draft, prior_json, require_priors};

pub struct PlotWorker {
    model: Arc<dyn TextModelService>,
}

impl PlotWorker {
    pub fn new(model: Arc<dyn TextModelService>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageWorker for PlotWorker {
    fn stage(&self) -> StageIndex {
        StageIndex::new(3).expect("stage 3 is in range")
    }

    fn validate_input(&self, ctx: &StageContext) -> Result<(), EngineError> {
        require_priors(ctx, &[1, 2])
    }

    async fn execute(&self, ctx: &StageContext, progress: &dyn ProgressSink) -> Result<StageOutput, EngineError> {
        progress.report(5);
        let request = TextGenRequest {
            stage: self.stage(),
            prompt: "Structure the story into three acts with key points and a scene breakdown.".to_string(),
            context: serde_json::json!({
                "submission": ctx.submission,
                "concept": prior_json(ctx, 1),
                "characters": prior_json(ctx, 2),
                "modifications": modifications_json(ctx),
            }),
            quality: ctx.quality,
        };
        let response = self.model.generate(request).await?;
        progress.report(75);

        let plot: PlotOutput = parse_draft(&response.content, "plot")?;
        if plot.scene_breakdown.is_empty() {
            return Err(EngineError::ai_retryable("plot draft carries no scenes"));
        }
        Ok(StageOutput::Plot(plot))
    }

    fn validate_output(&self, _ctx: &StageContext, output: &StageOutput) -> Result<(), EngineError> {
        match output {
            StageOutput::Plot(plot) => {
                if plot.act1.trim().is_empty() || plot.act2.trim().is_empty() || plot.act3.trim().is_empty() {
                    return Err(EngineError::internal("plot has an empty act"));
                }
                Ok(())
            }
            StageOutput::Placeholder { .. } => Ok(()),
            other => Err(EngineError::internal(format!(
                "plot worker produced stage {} payload",
                other.stage()
            ))),
        }
    }

    fn evaluate_quality(&self, _ctx: &StageContext, output: &StageOutput) -> CategoryScores {
        let mut scores = CategoryScores::new();
        match output {
            StageOutput::Plot(plot) => {
                let coherence = if plot.key_points.len() >= 3 { 0.88 } else { 0.72 };
                // Tonal variety across the breakdown reads as good pacing
                let tones: std::collections::BTreeSet<String> = plot
                    .scene_breakdown
                    .iter()
                    .map(|beat| format!("{:?}", beat.emotional_tone))
                    .collect();
                let pacing = match tones.len() {
                    0 | 1 => 0.6,
                    2 => 0.75,
                    _ => 0.87,
                };
                scores.insert(QualityCategory::NarrativeCoherence, coherence);
                scores.insert(QualityCategory::PacingFlow, pacing);
                scores.insert(QualityCategory::Readability, 0.82);
                scores.insert(QualityCategory::CharacterDevelopment, 0.8);
                scores.insert(QualityCategory::ArtisticAppeal, 0.78);
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
