// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage 6: dialogue and sound effects.

use std::sync::Arc;

use async_trait::async_trait;

use comicforge_domain::services::quality_evaluator::QualityCategory;
use comicforge_domain::services::{
    CategoryScores, ProgressSink, StageContext, StageWorker, TextGenRequest, TextModelService,
};
use comicforge_domain::{DialogueOutput, EngineError, StageIndex, StageOutput};

use super::{modifications_json, parse_draft, prior_json, require_priors};

pub struct DialogueWorker {
    model: Arc<dyn TextModelService>,
}

impl DialogueWorker {
    pub fn new(model: Arc<dyn TextModelService>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageWorker for DialogueWorker {
    fn stage(&self) -> StageIndex {
        StageIndex::new(6).expect("stage 6 is in range")
    }

    fn validate_input(&self, ctx: &StageContext) -> Result<(), EngineError> {
        require_priors(ctx, &[2, 4])
    }

    async fn execute(&self, ctx: &StageContext, progress: &dyn ProgressSink) -> Result<StageOutput, EngineError> {
        if ctx.storyboard().is_err() {
            // No layout to letter against: degrade to an empty script rather
            // than failing the whole session this late.
            return Ok(StageOutput::Dialogue(DialogueOutput {
                dialogues: vec![],
                sound_effects: vec![],
            }));
        }

        progress.report(5);
        let request = TextGenRequest {
            stage: self.stage(),
            prompt: "Write the final dialogue and sound effects for each storyboard panel.".to_string(),
            context: serde_json::json!({
                "submission": ctx.submission,
                "characters": prior_json(ctx, 2),
                "storyboard": prior_json(ctx, 4),
                "modifications": modifications_json(ctx),
            }),
            quality: ctx.quality,
        };
        let response = self.model.generate(request).await?;
        progress.report(80);

        let dialogue: DialogueOutput = parse_draft(&response.content, "dialogue")?;
        Ok(StageOutput::Dialogue(dialogue))
    }

    fn validate_output(&self, ctx: &StageContext, output: &StageOutput) -> Result<(), EngineError> {
        match output {
            StageOutput::Dialogue(dialogue) => {
                // Every line must land on a panel the storyboard defines
                if let Ok(storyboard) = ctx.storyboard() {
                    for line in &dialogue.dialogues {
                        let page = line.panel_id.page();
                        let panel = line.panel_id.index();
                        let exists = storyboard
                            .pages
                            .iter()
                            .find(|p| p.number == page)
                            .map(|p| (panel as usize) <= p.panels.len())
                            .unwrap_or(false);
                        if !exists {
                            return Err(EngineError::internal(format!(
                                "dialogue addresses unknown panel {}",
                                line.panel_id
                            )));
                        }
                    }
                }
                Ok(())
            }
            StageOutput::Placeholder { .. } => Ok(()),
            other => Err(EngineError::internal(format!(
                "dialogue worker produced stage {} payload",
                other.stage()
            ))),
        }
    }

    fn evaluate_quality(&self, ctx: &StageContext, output: &StageOutput) -> CategoryScores {
        let mut scores = CategoryScores::new();
        match output {
            StageOutput::Dialogue(dialogue) => {
                let long_lines = dialogue.dialogues.iter().filter(|l| l.text.chars().count() > 90).count();
                let readability = if dialogue.dialogues.is_empty() {
                    0.6
                } else if long_lines == 0 {
                    0.88
                } else {
                    (0.88 - 0.08 * long_lines as f64).max(0.4)
                };
                let empty_script = dialogue.dialogues.is_empty() && ctx.storyboard().is_err();
                scores.insert(QualityCategory::Readability, readability);
                scores.insert(QualityCategory::NarrativeCoherence, if empty_script { 0.5 } else { 0.82 });
                scores.insert(QualityCategory::CharacterDevelopment, 0.8);
                scores.insert(QualityCategory::PacingFlow, 0.8);
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
