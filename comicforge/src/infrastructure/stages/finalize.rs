// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage 7: final assembly.
//!
//! Merges the rendered panels and the dialogue script into the final artifact:
//! pages with their panel lists, the per-stage quality block, generation
//! stats, and the artifact pointer. The model contributes the composition
//! order and title; missing or degraded priors are noted, never fatal.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use comicforge_domain::services::quality_evaluator::QualityCategory;
use comicforge_domain::services::{
    CategoryScores, ProgressSink, StageContext, StageWorker, TextGenRequest, TextModelService,
};
use comicforge_domain::{
    EngineError, FinalOutput, FinalPage, GenerationStats, ImagePayload, StageIndex, StageOutput,
};

use super::{parse_draft, prior_json};

/// Shape of the stage-7 composition draft the text model returns.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct FinalDraft {
    pub title: String,
    pub page_order: Vec<u32>,
}

pub struct FinalizeWorker {
    model: Arc<dyn TextModelService>,
}

impl FinalizeWorker {
    pub fn new(model: Arc<dyn TextModelService>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageWorker for FinalizeWorker {
    fn stage(&self) -> StageIndex {
        StageIndex::last()
    }

    fn validate_input(&self, ctx: &StageContext) -> Result<(), EngineError> {
        // Every prior stage must have recorded *something*; placeholders are
        // tolerated and reported as degraded sections.
        super::require_priors(ctx, &[1, 2, 3, 4, 5, 6])
    }

    async fn execute(&self, ctx: &StageContext, progress: &dyn ProgressSink) -> Result<StageOutput, EngineError> {
        progress.report(10);

        let page_count = ctx.storyboard().map(|s| s.pages.len()).unwrap_or(1).max(1);
        let request = TextGenRequest {
            stage: self.stage(),
            prompt: "Compose the final reading order and title for the assembled pages.".to_string(),
            context: serde_json::json!({
                "submission": ctx.submission,
                "concept": prior_json(ctx, 1),
                "pages": page_count,
            }),
            quality: ctx.quality,
        };
        let response = self.model.generate(request).await?;
        let draft: FinalDraft = parse_draft(&response.content, "final composition")?;
        progress.report(40);

        // Panel images grouped by page, in reading order.
        let mut panels_by_page: BTreeMap<u32, Vec<(comicforge_domain::PanelId, ImagePayload)>> = BTreeMap::new();
        if let Ok(images) = ctx.scene_images() {
            for panel in &images.images {
                panels_by_page
                    .entry(panel.panel_id.page())
                    .or_default()
                    .push((panel.panel_id, panel.image.clone()));
            }
        }

        let order: Vec<u32> = if draft.page_order.len() == page_count
            && (1..=page_count as u32).all(|n| draft.page_order.contains(&n))
        {
            draft.page_order
        } else {
            (1..=page_count as u32).collect()
        };

        let pages: Vec<FinalPage> = order
            .iter()
            .map(|number| {
                let panels = panels_by_page.get(number).cloned().unwrap_or_default();
                let image = panels
                    .first()
                    .map(|(_, image)| image.clone())
                    .unwrap_or(ImagePayload::Inline {
                        media_type: "image/svg+xml".to_string(),
                        base64: String::new(),
                    });
                FinalPage {
                    image,
                    panels: panels.into_iter().map(|(id, _)| id).collect(),
                }
            })
            .collect();
        progress.report(75);

        // Quality block: the settled gate scores of prior stages.
        let quality_scores: BTreeMap<String, f64> = ctx
            .stage_scores
            .iter()
            .filter_map(|(stage, score)| {
                StageIndex::new(*stage).ok().map(|s| (s.name().to_string(), *score))
            })
            .collect();

        let degraded_sections: Vec<String> = ctx
            .prior
            .values()
            .filter(|output| output.is_placeholder())
            .map(|output| output.stage().name().to_string())
            .collect();

        let (cache_hits, panels_rendered) = ctx
            .scene_images()
            .map(|images| {
                let hits = images.images.iter().filter(|i| i.cache_hit).count() as u32;
                let rendered = images.images.iter().filter(|i| !i.placeholder).count() as u32;
                (hits, rendered)
            })
            .unwrap_or((0, 0));

        let stats = GenerationStats {
            total_elapsed_ms: ctx.elapsed_ms,
            total_attempts: ctx.stage_attempts.values().sum::<u32>() + ctx.attempt,
            image_cache_hits: cache_hits,
            panels_rendered,
            degraded_sections,
        };

        Ok(StageOutput::Final(FinalOutput {
            pages,
            quality_scores,
            stats,
            output_pointer: format!("artifact://sessions/{}/final", ctx.session_id),
        }))
    }

    fn validate_output(&self, _ctx: &StageContext, output: &StageOutput) -> Result<(), EngineError> {
        match output {
            StageOutput::Final(fin) => {
                if fin.pages.is_empty() {
                    return Err(EngineError::internal("final artifact has no pages"));
                }
                if fin.output_pointer.is_empty() {
                    return Err(EngineError::internal("final artifact lacks an output pointer"));
                }
                Ok(())
            }
            StageOutput::Placeholder { .. } => Ok(()),
            other => Err(EngineError::internal(format!(
                "finalize worker produced stage {} payload",
                other.stage()
            ))),
        }
    }

    fn evaluate_quality(&self, _ctx: &StageContext, output: &StageOutput) -> CategoryScores {
        let mut scores = CategoryScores::new();
        match output {
            StageOutput::Final(fin) => {
                let degraded = fin.stats.degraded_sections.len();
                let technical = (0.9 - 0.12 * degraded as f64).max(0.3);
                scores.insert(QualityCategory::TechnicalQuality, technical);
                scores.insert(QualityCategory::VisualConsistency, if degraded == 0 { 0.88 } else { 0.66 });
                scores.insert(QualityCategory::NarrativeCoherence, 0.84);
                scores.insert(QualityCategory::Readability, 0.85);
                scores.insert(QualityCategory::PacingFlow, 0.82);
                scores.insert(QualityCategory::CharacterDevelopment, 0.8);
                scores.insert(QualityCategory::ArtisticAppeal, 0.82);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::scripted_text_model::ScriptedTextModel;
    use comicforge_domain::{
        CharactersOutput, ConceptOutput, DialogueOutput, NoopProgress, PanelId, PanelImage, PlotOutput,
        QualityLevel, SceneImagesOutput, SessionId, StoryboardOutput,
    };

    fn full_context() -> StageContext {
        let mut prior = BTreeMap::new();
        prior.insert(
            1,
            StageOutput::Concept(ConceptOutput {
                theme: "belonging".to_string(),
                genres: vec![],
                world_setting: "x".to_string(),
                target_audience: "teen".to_string(),
                estimated_pages: 1,
            }),
        );
        prior.insert(2, StageOutput::Characters(CharactersOutput { characters: vec![] }));
        prior.insert(
            3,
            StageOutput::Plot(PlotOutput {
                act1: "a".to_string(),
                act2: "b".to_string(),
                act3: "c".to_string(),
                key_points: vec![],
                scene_breakdown: vec![],
            }),
        );
        prior.insert(
            4,
            StageOutput::Storyboard(StoryboardOutput {
                pages: vec![comicforge_domain::PageSpec {
                    number: 1,
                    panels: vec![comicforge_domain::PanelSpec {
                        size: comicforge_domain::PanelSize::Splash,
                        camera_angle: "wide".to_string(),
                        description: "opening".to_string(),
                        emotional_tone: comicforge_domain::EmotionalTone::Calm,
                        dialogue: None,
                    }],
                }],
            }),
        );
        prior.insert(
            5,
            StageOutput::SceneImages(SceneImagesOutput {
                images: vec![PanelImage {
                    panel_id: PanelId::new(1, 1).unwrap(),
                    image: ImagePayload::Inline {
                        media_type: "image/svg+xml".to_string(),
                        base64: "QUJD".to_string(),
                    },
                    prompt: "opening".to_string(),
                    cache_hit: true,
                    placeholder: false,
                }],
                efficiency: 0.8,
            }),
        );
        prior.insert(
            6,
            StageOutput::Dialogue(DialogueOutput {
                dialogues: vec![],
                sound_effects: vec![],
            }),
        );

        let mut stage_scores = BTreeMap::new();
        stage_scores.insert(1, 0.9);
        stage_scores.insert(5, 0.8);
        let mut stage_attempts = BTreeMap::new();
        stage_attempts.insert(1, 1);
        stage_attempts.insert(5, 2);

        StageContext {
            session_id: SessionId::new(),
            stage: StageIndex::last(),
            attempt: 1,
            quality: QualityLevel::Medium,
            submission: "story".to_string(),
            prior,
            modifications: vec![],
            stage_scores,
            stage_attempts,
            elapsed_ms: 1234,
        }
    }

    #[tokio::test]
    async fn test_assembles_pages_with_quality_block() {
        let worker = FinalizeWorker::new(Arc::new(ScriptedTextModel::new()));
        let ctx = full_context();

        worker.validate_input(&ctx).unwrap();
        let output = worker.execute(&ctx, &NoopProgress).await.unwrap();
        worker.validate_output(&ctx, &output).unwrap();

        match &output {
            StageOutput::Final(fin) => {
                assert_eq!(fin.pages.len(), 1);
                assert_eq!(fin.pages[0].panels, vec![PanelId::new(1, 1).unwrap()]);
                assert_eq!(fin.quality_scores.get("concept"), Some(&0.9));
                assert_eq!(fin.stats.image_cache_hits, 1);
                assert_eq!(fin.stats.total_attempts, 4, "prior attempts plus this one");
                assert!(fin.stats.degraded_sections.is_empty());
                assert!(fin.output_pointer.starts_with("artifact://sessions/"));
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_degraded_priors_are_noted() {
        let worker = FinalizeWorker::new(Arc::new(ScriptedTextModel::new()));
        let mut ctx = full_context();
        ctx.prior.insert(
            5,
            StageOutput::Placeholder {
                stage: StageIndex::new(5).unwrap(),
                reason: "retries exhausted".to_string(),
            },
        );
        let output = worker.execute(&ctx, &NoopProgress).await.unwrap();
        match output {
            StageOutput::Final(fin) => {
                assert_eq!(fin.stats.degraded_sections, vec!["scene-images".to_string()]);
                assert_eq!(fin.stats.panels_rendered, 0);
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }
}
