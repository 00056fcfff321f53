// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage 1: concept extraction.
//!
//! Reads the raw submission and produces the story concept: theme, genres,
//! world setting, target audience, and the estimated page count that sizes
//! the rest of the pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use comicforge_domain::services::quality_evaluator::QualityCategory;
use comicforge_domain::services::{
    CategoryScores, ProgressSink, StageContext, StageWorker, TextGenRequest, TextModelService,
};
use comicforge_domain::{ConceptOutput, EngineError, StageIndex, StageOutput};

use super::{modifications_json, parse_draft};

pub struct ConceptWorker {
    model: Arc<dyn TextModelService>,
}

impl ConceptWorker {
    pub fn new(model: Arc<dyn TextModelService>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageWorker for ConceptWorker {
    fn stage(&self) -> StageIndex {
        StageIndex::first()
    }

    fn validate_input(&self, ctx: &StageContext) -> Result<(), EngineError> {
        if ctx.submission.trim().is_empty() {
            return Err(EngineError::invalid_input("submission text is empty"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &StageContext, progress: &dyn ProgressSink) -> Result<StageOutput, EngineError> {
        progress.report(5);
        let request = TextGenRequest {
            stage: self.stage(),
            prompt: "Extract the story concept: theme, genres, world setting, target audience, page estimate."
                .to_string(),
            context: serde_json::json!({
                "submission": ctx.submission,
                "modifications": modifications_json(ctx),
            }),
            quality: ctx.quality,
        };
        let response = self.model.generate(request).await?;
        progress.report(70);

        let mut concept: ConceptOutput = parse_draft(&response.content, "concept")?;
        concept.estimated_pages = concept.estimated_pages.clamp(1, 32);
        if concept.theme.trim().is_empty() {
            return Err(EngineError::ai_retryable("concept draft carries no theme"));
        }
        progress.report(95);
        Ok(StageOutput::Concept(concept))
    }

    fn validate_output(&self, _ctx: &StageContext, output: &StageOutput) -> Result<(), EngineError> {
        match output {
            StageOutput::Concept(concept) => {
                if concept.estimated_pages == 0 {
                    return Err(EngineError::internal("concept estimates zero pages"));
                }
                Ok(())
            }
            StageOutput::Placeholder { .. } => Ok(()),
            other => Err(EngineError::internal(format!(
                "concept worker produced stage {} payload",
                other.stage()
            ))),
        }
    }

    fn evaluate_quality(&self, _ctx: &StageContext, output: &StageOutput) -> CategoryScores {
        let mut scores = CategoryScores::new();
        match output {
            StageOutput::Concept(concept) => {
                let coherence = if concept.world_setting.trim().is_empty() { 0.6 } else { 0.86 };
                let appeal = match concept.genres.len() {
                    0 => 0.55,
                    1 => 0.78,
                    _ => 0.85,
                };
                scores.insert(QualityCategory::NarrativeCoherence, coherence);
                scores.insert(QualityCategory::ArtisticAppeal, appeal);
                scores.insert(QualityCategory::Readability, 0.85);
                scores.insert(QualityCategory::PacingFlow, 0.8);
                scores.insert(QualityCategory::CharacterDevelopment, 0.75);
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
