// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage 2: character design.

use std::sync::Arc;

use async_trait::async_trait;

use comicforge_domain::services::quality_evaluator::QualityCategory;
use comicforge_domain::services::{
    CategoryScores, ProgressSink, StageContext, StageWorker, TextGenRequest, TextModelService,
};
use comicforge_domain::{CharactersOutput, EngineError, StageIndex, StageOutput};

use super::{modifications_json, parse_draft, prior_json, require_priors};

pub struct CharactersWorker {
    model: Arc<dyn TextModelService>,
}

impl CharactersWorker {
    pub fn new(model: Arc<dyn TextModelService>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageWorker for CharactersWorker {
    fn stage(&self) -> StageIndex {
        StageIndex::new(2).expect("stage 2 is in range")
    }

    fn validate_input(&self, ctx: &StageContext) -> Result<(), EngineError> {
        require_priors(ctx, &[1])
    }

    async fn execute(&self, ctx: &StageContext, progress: &dyn ProgressSink) -> Result<StageOutput, EngineError> {
        progress.report(5);
        let request = TextGenRequest {
            stage: self.stage(),
            prompt: "Design the cast for this story: names, roles, appearance, personality, voice.".to_string(),
            context: serde_json::json!({
                "submission": ctx.submission,
                "concept": prior_json(ctx, 1),
                "modifications": modifications_json(ctx),
            }),
            quality: ctx.quality,
        };
        let response = self.model.generate(request).await?;
        progress.report(75);

        let characters: CharactersOutput = parse_draft(&response.content, "characters")?;
        if characters.characters.is_empty() {
            return Err(EngineError::ai_retryable("character draft carries an empty cast"));
        }
        Ok(StageOutput::Characters(characters))
    }

    fn validate_output(&self, _ctx: &StageContext, output: &StageOutput) -> Result<(), EngineError> {
        match output {
            StageOutput::Characters(characters) => {
                for sheet in &characters.characters {
                    if sheet.name.trim().is_empty() {
                        return Err(EngineError::internal("character sheet without a name"));
                    }
                }
                Ok(())
            }
            StageOutput::Placeholder { .. } => Ok(()),
            other => Err(EngineError::internal(format!(
                "characters worker produced stage {} payload",
                other.stage()
            ))),
        }
    }

    fn evaluate_quality(&self, _ctx: &StageContext, output: &StageOutput) -> CategoryScores {
        let mut scores = CategoryScores::new();
        match output {
            StageOutput::Characters(characters) => {
                let cast = characters.characters.len();
                let development = match cast {
                    0 => 0.1,
                    1 => 0.6,
                    2..=5 => 0.88,
                    _ => 0.7,
                };
                let distinct_roles = {
                    let mut roles: Vec<&str> = characters.characters.iter().map(|c| c.role.as_str()).collect();
                    roles.sort_unstable();
                    roles.dedup();
                    roles.len()
                };
                scores.insert(QualityCategory::CharacterDevelopment, development);
                scores.insert(
                    QualityCategory::NarrativeCoherence,
                    if distinct_roles > 1 { 0.85 } else { 0.7 },
                );
                scores.insert(QualityCategory::Readability, 0.84);
                scores.insert(QualityCategory::PacingFlow, 0.78);
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
