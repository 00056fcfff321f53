// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared test helpers: engine assembly over the scripted backends, and
//! scripted quality evaluators for driving the gate to exact scores.

use std::sync::Arc;

use comicforge::infrastructure::adapters::{ScriptedImageModel, ScriptedTextModel};
use comicforge::infrastructure::config::EngineConfig;
use comicforge::infrastructure::persistence::MemoryJournal;
use comicforge::{EngineBuilder, SessionScheduler, SubmissionOptions};
use comicforge_domain::services::quality_evaluator::{CategoryEvaluator, QualityCategory};
use comicforge_domain::services::stage_worker::StageContext;
use comicforge_domain::StageOutput;

/// A config with tight backoffs so scenario tests stay fast.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.cap_secs = 1;
    config.retry.jitter = 0.0;
    config
}

/// Default engine over scripted backends and an in-memory journal.
pub fn build_engine(config: EngineConfig) -> (SessionScheduler, Arc<ScriptedTextModel>, Arc<ScriptedImageModel>) {
    let text = Arc::new(ScriptedTextModel::new());
    let image = Arc::new(ScriptedImageModel::new());
    let scheduler = EngineBuilder::new(
        config,
        Arc::clone(&text) as Arc<dyn comicforge_domain::TextModelService>,
        Arc::clone(&image) as Arc<dyn comicforge_domain::ImageModelService>,
        Arc::new(MemoryJournal::new()),
    )
    .build()
    .unwrap();
    (scheduler, text, image)
}

/// Engine whose gate scores one stage from a script (per attempt) and holds
/// every other stage at 0.9.
pub fn build_engine_with_scripted_scores(
    config: EngineConfig,
    target_stage: u8,
    values: Vec<f64>,
) -> (SessionScheduler, Arc<ScriptedTextModel>, Arc<ScriptedImageModel>) {
    let text = Arc::new(ScriptedTextModel::new());
    let image = Arc::new(ScriptedImageModel::new());
    let scheduler = EngineBuilder::new(
        config,
        Arc::clone(&text) as Arc<dyn comicforge_domain::TextModelService>,
        Arc::clone(&image) as Arc<dyn comicforge_domain::ImageModelService>,
        Arc::new(MemoryJournal::new()),
    )
    .with_evaluators(scripted_stage_scores(target_stage, values))
    .build()
    .unwrap();
    (scheduler, text, image)
}

pub fn options(hitl: bool) -> SubmissionOptions {
    SubmissionOptions {
        hitl_enabled: hitl,
        ..Default::default()
    }
}

/// A ~500 character story.
pub fn story() -> String {
    "A courier named Aki crosses a flooded city to deliver one letter before the tide turns. \
     The canals have swallowed the old tram lines, and the ferrymen charge in secrets rather than coin. \
     Aki's boat is patched cardboard and stubbornness; the letter is addressed to the lighthouse keeper \
     who vanished the night the sea rose. Halfway across, an old rival offers a shortcut through the \
     drowned market, where the water hums with things that remember being people. Aki must choose \
     between the fast route and the honest one."
        .to_string()
}

/// Per-category evaluator that replays a per-attempt score script for one
/// stage and returns a passing score everywhere else.
struct ScriptedCategory {
    category: QualityCategory,
    target_stage: u8,
    values: Vec<f64>,
}

impl CategoryEvaluator for ScriptedCategory {
    fn category(&self) -> QualityCategory {
        self.category
    }

    fn evaluate(&self, ctx: &StageContext, _output: &StageOutput) -> f64 {
        if ctx.stage.value() != self.target_stage {
            return 0.9;
        }
        let index = (ctx.attempt.max(1) as usize - 1).min(self.values.len().saturating_sub(1));
        self.values[index]
    }
}

/// Evaluators for all seven categories driven by the same script, so the
/// weighted overall equals the scripted value exactly.
pub fn scripted_stage_scores(target_stage: u8, values: Vec<f64>) -> Vec<Arc<dyn CategoryEvaluator>> {
    QualityCategory::ALL
        .iter()
        .map(|category| {
            Arc::new(ScriptedCategory {
                category: *category,
                target_stage,
                values: values.clone(),
            }) as Arc<dyn CategoryEvaluator>
        })
        .collect()
}
