// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Worker Port
//!
//! The contract every pipeline stage implements: validate input, execute,
//! validate output, evaluate quality. Stage workers are plain values behind
//! a common trait - composition over inheritance - registered by stage index
//! and invoked by the scheduler.
//!
//! A worker receives a [`StageContext`]: the submission text, the current
//! results of all prior stages on the active version path, and any
//! modification descriptors merged in by the HITL coordinator. The context's
//! fingerprint becomes the attempt's input fingerprint.
//!
//! Workers report coarse progress through a [`ProgressSink`]; the scheduler
//! turns reports into monotonic `stage-progress` events.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use crate::value_objects::feedback::ModificationDescriptor;
use crate::value_objects::generic_id::SessionId;
use crate::value_objects::quality_level::QualityLevel;
use crate::value_objects::stage_index::StageIndex;
use crate::value_objects::stage_output::{
    CharactersOutput, ConceptOutput, DialogueOutput, PlotOutput, SceneImagesOutput, StageOutput, StoryboardOutput,
};

/// Sink for coarse in-stage progress reports.
///
/// Implementations must accept non-monotonic reports gracefully; the
/// scheduler clamps percentages so observers only ever see monotonic
/// progress.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

/// Progress sink that discards reports, for tests and placeholder paths.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _percent: u8) {}
}

/// The merged input one stage attempt consumes.
#[derive(Debug, Clone, Serialize)]
pub struct StageContext {
    pub session_id: SessionId,
    pub stage: StageIndex,
    pub attempt: u32,
    pub quality: QualityLevel,
    pub submission: String,
    /// Current outputs of stages `< stage` on the active branch, keyed by
    /// stage number.
    pub prior: BTreeMap<u8, StageOutput>,
    /// Feedback-derived modifications to honour in this stage.
    pub modifications: Vec<ModificationDescriptor>,
    /// Settled gate scores of prior stages, for the final artifact's quality
    /// block. Not part of the input fingerprint.
    pub stage_scores: BTreeMap<u8, f64>,
    /// Attempts spent on prior stages. Not part of the input fingerprint.
    pub stage_attempts: BTreeMap<u8, u32>,
    /// Wall-clock elapsed since the session started, at context build time.
    /// Not part of the input fingerprint.
    pub elapsed_ms: u64,
}

impl StageContext {
    /// SHA-256 fingerprint of the merged input.
    ///
    /// Attempt number is excluded so retries with unchanged inputs share a
    /// fingerprint.
    pub fn fingerprint(&self) -> String {
        #[derive(Serialize)]
        struct FingerprintView<'a> {
            stage: u8,
            quality: &'a QualityLevel,
            submission: &'a str,
            prior: Vec<(u8, String)>,
            modifications: &'a [ModificationDescriptor],
        }
        let view = FingerprintView {
            stage: self.stage.value(),
            quality: &self.quality,
            submission: &self.submission,
            prior: self.prior.iter().map(|(k, v)| (*k, v.fingerprint())).collect(),
            modifications: &self.modifications,
        };
        let bytes = serde_json::to_vec(&view).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    pub fn prior(&self, stage: StageIndex) -> Option<&StageOutput> {
        self.prior.get(&stage.value())
    }

    fn require(&self, stage: u8) -> Result<&StageOutput, EngineError> {
        self.prior.get(&stage).ok_or_else(|| {
            EngineError::internal(format!("stage {} input missing prior stage {} output", self.stage, stage))
        })
    }

    pub fn concept(&self) -> Result<&ConceptOutput, EngineError> {
        match self.require(1)? {
            StageOutput::Concept(out) => Ok(out),
            other => Err(placeholder_input(1, other)),
        }
    }

    pub fn characters(&self) -> Result<&CharactersOutput, EngineError> {
        match self.require(2)? {
            StageOutput::Characters(out) => Ok(out),
            other => Err(placeholder_input(2, other)),
        }
    }

    pub fn plot(&self) -> Result<&PlotOutput, EngineError> {
        match self.require(3)? {
            StageOutput::Plot(out) => Ok(out),
            other => Err(placeholder_input(3, other)),
        }
    }

    pub fn storyboard(&self) -> Result<&StoryboardOutput, EngineError> {
        match self.require(4)? {
            StageOutput::Storyboard(out) => Ok(out),
            other => Err(placeholder_input(4, other)),
        }
    }

    pub fn scene_images(&self) -> Result<&SceneImagesOutput, EngineError> {
        match self.require(5)? {
            StageOutput::SceneImages(out) => Ok(out),
            other => Err(placeholder_input(5, other)),
        }
    }

    pub fn dialogue(&self) -> Result<&DialogueOutput, EngineError> {
        match self.require(6)? {
            StageOutput::Dialogue(out) => Ok(out),
            other => Err(placeholder_input(6, other)),
        }
    }
}

/// A placeholder where a typed payload was needed. Downstream stages that
/// can proceed without the payload catch this and degrade; others let it
/// propagate as a stage failure.
fn placeholder_input(stage: u8, found: &StageOutput) -> EngineError {
    if found.is_placeholder() {
        EngineError::internal(format!("prior stage {} produced a placeholder", stage))
    } else {
        EngineError::internal(format!("prior stage {} output has unexpected shape", stage))
    }
}

/// Per-category raw quality scores produced by a worker.
pub type CategoryScores = BTreeMap<crate::services::quality_evaluator::QualityCategory, f64>;

/// One pipeline stage: validate input, execute, validate output, evaluate
/// quality.
#[async_trait]
pub trait StageWorker: Send + Sync {
    /// The stage this worker implements.
    fn stage(&self) -> StageIndex;

    /// Checks that all required prior outputs are present and well-formed.
    fn validate_input(&self, ctx: &StageContext) -> Result<(), EngineError>;

    /// Produces the stage output. Cancellation and the wall-clock budget are
    /// enforced by the scheduler around this call.
    async fn execute(&self, ctx: &StageContext, progress: &dyn ProgressSink) -> Result<StageOutput, EngineError>;

    /// Checks shape invariants of the produced output.
    fn validate_output(&self, ctx: &StageContext, output: &StageOutput) -> Result<(), EngineError>;

    /// Computes raw per-category quality scores for the output. The quality
    /// gate weighs these (and any registered category evaluators) into the
    /// final score.
    fn evaluate_quality(&self, ctx: &StageContext, output: &StageOutput) -> CategoryScores;

    /// The placeholder output recorded when this stage falls back.
    fn placeholder(&self, reason: &str) -> StageOutput {
        StageOutput::Placeholder {
            stage: self.stage(),
            reason: reason.to_string(),
        }
    }
}
