// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Workers
//!
//! One worker per observable pipeline stage, each implementing the
//! `StageWorker` contract (validate input, execute, validate output,
//! evaluate quality) and registered by stage index. Stages 1-4 and 6-7
//! drive the text model; stage 5 delegates to the image fan-out executor.
//!
//! A worker tolerates placeholder outputs from earlier fallbacks: it
//! degrades its own output rather than failing, and the final assembly
//! notes the degraded sections.

pub mod characters;
pub mod concept;
pub mod dialogue;
pub mod finalize;
pub mod plot;
pub mod scene_images;
pub mod storyboard;

pub use characters::CharactersWorker;
pub use concept::ConceptWorker;
pub use dialogue::DialogueWorker;
pub use finalize::{FinalDraft, FinalizeWorker};
pub use plot::PlotWorker;
pub use scene_images::SceneImagesWorker;
pub use storyboard::StoryboardWorker;

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use comicforge_domain::services::{StageContext, StageWorker, TextModelService};
use comicforge_domain::EngineError;

use crate::infrastructure::config::engine_config::EngineConfig;
use crate::infrastructure::runtime::image_executor::ImageExecutor;

/// Builds the full worker registry for an engine instance.
pub fn build_stage_workers(
    text_model: Arc<dyn TextModelService>,
    image_executor: Arc<ImageExecutor>,
    config: &EngineConfig,
) -> HashMap<u8, Arc<dyn StageWorker>> {
    let mut workers: HashMap<u8, Arc<dyn StageWorker>> = HashMap::new();
    workers.insert(1, Arc::new(ConceptWorker::new(Arc::clone(&text_model))));
    workers.insert(2, Arc::new(CharactersWorker::new(Arc::clone(&text_model))));
    workers.insert(3, Arc::new(PlotWorker::new(Arc::clone(&text_model))));
    workers.insert(4, Arc::new(StoryboardWorker::new(Arc::clone(&text_model))));
    workers.insert(
        5,
        Arc::new(SceneImagesWorker::new(
            image_executor,
            config.limits.per_session_image_tasks,
            config.retry.policy(),
        )),
    );
    workers.insert(6, Arc::new(DialogueWorker::new(Arc::clone(&text_model))));
    workers.insert(7, Arc::new(FinalizeWorker::new(text_model)));
    workers
}

/// Parses a model draft into a typed payload.
///
/// A malformed draft is a transient model fault: the attempt is retried
/// under the stage's budget rather than failing the session.
pub(crate) fn parse_draft<T: DeserializeOwned>(content: &str, what: &str) -> Result<T, EngineError> {
    serde_json::from_str(content).map_err(|e| EngineError::ai_retryable(format!("malformed {} draft: {}", what, e)))
}

/// Serializes the context's modification descriptors for the model context.
pub(crate) fn modifications_json(ctx: &StageContext) -> serde_json::Value {
    serde_json::to_value(&ctx.modifications).unwrap_or(serde_json::Value::Array(Vec::new()))
}

/// A prior stage output as JSON, or `Null` when absent or placeholder.
pub(crate) fn prior_json(ctx: &StageContext, stage: u8) -> serde_json::Value {
    match ctx.prior.get(&stage) {
        Some(output) if !output.is_placeholder() => {
            // Strip the enum tag wrapper: workers and the scripted backend
            // exchange bare payload objects.
            let mut value = output.to_json();
            if let Some(map) = value.as_object_mut() {
                map.remove("stage-output");
            }
            value
        }
        _ => serde_json::Value::Null,
    }
}

/// Requires that every listed prior stage has *some* output recorded
/// (placeholders count: the pipeline continues past fallbacks).
pub(crate) fn require_priors(ctx: &StageContext, stages: &[u8]) -> Result<(), EngineError> {
    for stage in stages {
        if !ctx.prior.contains_key(stage) {
            return Err(EngineError::internal(format!(
                "stage {} input is missing stage {} output",
                ctx.stage, stage
            )));
        }
    }
    Ok(())
}
