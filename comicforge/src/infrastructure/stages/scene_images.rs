// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage 5: scene image rendering.
//!
//! Projects the storyboard into one image task per panel and delegates to
//! the fan-out executor. Prompts are derived from panel descriptions and the
//! cast's appearance notes; style parameters are stable per session so that
//! identical panels across retries hit the content-addressed cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use comicforge_bootstrap::CancellationToken;
use comicforge_domain::services::quality_evaluator::QualityCategory;
use comicforge_domain::services::{CategoryScores, ProgressSink, StageContext, StageWorker};
use comicforge_domain::{
    EngineError, ImageTask, PanelId, PanelImage, RetryPolicy, SceneImagesOutput, StageIndex, StageOutput,
    StoryboardOutput,
};

use super::require_priors;
use crate::infrastructure::runtime::image_executor::ImageExecutor;

pub struct SceneImagesWorker {
    executor: Arc<ImageExecutor>,
    per_session_limit: usize,
    retry: RetryPolicy,
}

impl SceneImagesWorker {
    pub fn new(executor: Arc<ImageExecutor>, per_session_limit: usize, retry: RetryPolicy) -> Self {
        Self {
            executor,
            per_session_limit,
            retry,
        }
    }

    /// One task per storyboard panel, in reading order.
    fn build_tasks(&self, ctx: &StageContext, storyboard: &StoryboardOutput) -> Result<Vec<ImageTask>, EngineError> {
        let appearance: Vec<String> = ctx
            .characters()
            .map(|cast| cast.characters.iter().map(|c| format!("{}: {}", c.name, c.appearance)).collect())
            .unwrap_or_default();
        let theme = ctx.concept().map(|c| c.theme.clone()).unwrap_or_default();

        let mut style = BTreeMap::new();
        style.insert("medium".to_string(), "ink and screentone".to_string());
        style.insert("palette".to_string(), format!("monochrome, keyed to {}", ctx.quality));
        if !theme.is_empty() {
            style.insert("mood".to_string(), theme);
        }

        let mut tasks = Vec::new();
        for page in &storyboard.pages {
            for (index, panel) in page.panels.iter().enumerate() {
                let panel_id = PanelId::new(page.number, index as u32 + 1)
                    .map_err(|e| EngineError::internal(format!("storyboard panel out of range: {}", e)))?;
                let mut prompt = format!("{} - {} angle", panel.description, panel.camera_angle);
                if !appearance.is_empty() {
                    prompt.push_str(&format!(" - cast: {}", appearance.join("; ")));
                }
                tasks.push(ImageTask::new(
                    ctx.session_id,
                    panel_id,
                    prompt,
                    "blurry, low detail, extra limbs".to_string(),
                    style.clone(),
                    panel.emotional_tone,
                    panel.size,
                    self.retry.max_attempts,
                ));
            }
        }
        Ok(tasks)
    }
}

#[async_trait]
impl StageWorker for SceneImagesWorker {
    fn stage(&self) -> StageIndex {
        StageIndex::new(5).expect("stage 5 is in range")
    }

    fn validate_input(&self, ctx: &StageContext) -> Result<(), EngineError> {
        require_priors(ctx, &[4])
    }

    async fn execute(&self, ctx: &StageContext, progress: &dyn ProgressSink) -> Result<StageOutput, EngineError> {
        let storyboard = ctx
            .storyboard()
            .map_err(|_| EngineError::ai_fatal("no storyboard available to render"))?;
        let tasks = self.build_tasks(ctx, storyboard)?;

        // Cancellation reaches the fan-out by the scheduler dropping this
        // future; the executor token covers direct programmatic use.
        let local_cancel = CancellationToken::new();
        let outcome = self
            .executor
            .execute(tasks, ctx.quality, self.per_session_limit, self.retry, &local_cancel, progress)
            .await?;

        let images: Vec<PanelImage> = outcome
            .results
            .into_iter()
            .map(|result| PanelImage {
                panel_id: result.panel_id,
                image: result.image,
                prompt: result.prompt,
                cache_hit: result.cache_hit,
                placeholder: result.placeholder,
            })
            .collect();

        Ok(StageOutput::SceneImages(SceneImagesOutput {
            images,
            efficiency: outcome.efficiency,
        }))
    }

    fn validate_output(&self, ctx: &StageContext, output: &StageOutput) -> Result<(), EngineError> {
        match output {
            StageOutput::SceneImages(images) => {
                let expected = ctx.storyboard().map(|s| s.panel_count()).unwrap_or(0);
                if expected != 0 && images.images.len() != expected {
                    return Err(EngineError::internal(format!(
                        "rendered {} panels, storyboard has {}",
                        images.images.len(),
                        expected
                    )));
                }
                if !(0.0..=1.0).contains(&images.efficiency) {
                    return Err(EngineError::internal("efficiency out of range"));
                }
                Ok(())
            }
            StageOutput::Placeholder { .. } => Ok(()),
            other => Err(EngineError::internal(format!(
                "scene images worker produced stage {} payload",
                other.stage()
            ))),
        }
    }

    fn evaluate_quality(&self, _ctx: &StageContext, output: &StageOutput) -> CategoryScores {
        let mut scores = CategoryScores::new();
        match output {
            StageOutput::SceneImages(images) => {
                let rendered = images.images.iter().filter(|i| !i.placeholder).count() as f64;
                let total = images.images.len().max(1) as f64;
                let ratio = rendered / total;
                scores.insert(QualityCategory::VisualConsistency, 0.4 + 0.6 * ratio);
                scores.insert(QualityCategory::TechnicalQuality, 0.5 + 0.5 * images.efficiency);
                scores.insert(QualityCategory::ArtisticAppeal, 0.8);
                scores.insert(QualityCategory::NarrativeCoherence, 0.8);
                scores.insert(QualityCategory::Readability, 0.8);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::image_cache::ImageCache;
    use crate::infrastructure::adapters::scripted_image_model::ScriptedImageModel;
    use crate::infrastructure::runtime::resource_pool::{PoolConfig, ResourcePool};
    use comicforge_domain::{
        EmotionalTone, NoopProgress, PageSpec, PanelSize, PanelSpec, QualityLevel, SessionId,
    };

    fn worker(model: ScriptedImageModel) -> SceneImagesWorker {
        let pool = Arc::new(ResourcePool::new(PoolConfig::default()).unwrap());
        let executor = Arc::new(ImageExecutor::new(Arc::new(model), Arc::new(ImageCache::new()), pool));
        SceneImagesWorker::new(
            executor,
            5,
            RetryPolicy {
                max_attempts: 3,
                cap_secs: 1,
                jitter: 0.0,
            },
        )
    }

    fn context() -> StageContext {
        let storyboard = StoryboardOutput {
            pages: vec![PageSpec {
                number: 1,
                panels: vec![
                    PanelSpec {
                        size: PanelSize::Splash,
                        camera_angle: "wide establishing".to_string(),
                        description: "the flooded avenue at dawn".to_string(),
                        emotional_tone: EmotionalTone::Climax,
                        dialogue: None,
                    },
                    PanelSpec {
                        size: PanelSize::Small,
                        camera_angle: "close-up".to_string(),
                        description: "a sealed letter".to_string(),
                        emotional_tone: EmotionalTone::Calm,
                        dialogue: None,
                    },
                ],
            }],
        };
        let mut prior = std::collections::BTreeMap::new();
        prior.insert(4, StageOutput::Storyboard(storyboard));
        StageContext {
            session_id: SessionId::new(),
            stage: StageIndex::new(5).unwrap(),
            attempt: 1,
            quality: QualityLevel::Medium,
            submission: "story".to_string(),
            prior,
            modifications: vec![],
            stage_scores: std::collections::BTreeMap::new(),
            stage_attempts: std::collections::BTreeMap::new(),
            elapsed_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_renders_one_image_per_panel() {
        let w = worker(ScriptedImageModel::new());
        let ctx = context();
        let output = w.execute(&ctx, &NoopProgress).await.unwrap();
        w.validate_output(&ctx, &output).unwrap();

        match &output {
            StageOutput::SceneImages(images) => {
                assert_eq!(images.images.len(), 2);
                assert!(images.images.iter().all(|i| !i.placeholder));
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_placeholder_storyboard_is_fatal() {
        let w = worker(ScriptedImageModel::new());
        let mut ctx = context();
        ctx.prior.insert(
            4,
            StageOutput::Placeholder {
                stage: StageIndex::new(4).unwrap(),
                reason: "fallback".to_string(),
            },
        );
        let err = w.execute(&ctx, &NoopProgress).await.unwrap_err();
        assert_eq!(err.kind(), "stage-ai-error-fatal");
    }
}
