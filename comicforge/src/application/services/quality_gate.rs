// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Quality Gate
//!
//! The decision point after every stage attempt. Scoring is a weighted sum
//! over the seven categories: the stage worker supplies raw scores for the
//! categories it can judge, registered category evaluators override the
//! categories they cover, and the configured weights combine the result.
//!
//! Decision rule, threshold T (default 0.70):
//!
//! - `score >= T` -> **pass**
//! - `score < T` and attempts remain -> **retry**
//! - otherwise -> **fallback**
//!
//! An admin override forces a pass regardless of score; the scheduler
//! records the override operator as a tag on the checkpoint version.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use comicforge_domain::services::quality_evaluator::{CategoryEvaluator, QualityCategory, QualityWeights};
use comicforge_domain::services::{StageContext, StageWorker};
use comicforge_domain::{EngineError, QualityScore, SessionId, StageOutput};

use crate::infrastructure::config::engine_config::EngineConfig;

/// Gate verdict for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Pass,
    Retry,
    Fallback,
}

/// Full gate result, with the annotated per-category scores.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub outcome: GateOutcome,
    pub score: QualityScore,
    pub category_scores: BTreeMap<QualityCategory, f64>,
    /// Operator label when an admin override forced this pass.
    pub override_operator: Option<String>,
}

/// Weighted-category quality gate with pluggable evaluators.
pub struct QualityGate {
    threshold: f64,
    max_attempts: u32,
    weights: QualityWeights,
    evaluators: HashMap<QualityCategory, Arc<dyn CategoryEvaluator>>,
    /// Pending admin overrides, keyed by (session, stage), consumed once.
    overrides: Mutex<HashMap<(SessionId, u8), String>>,
}

impl QualityGate {
    pub fn new(
        threshold: f64,
        max_attempts: u32,
        weights: QualityWeights,
        evaluators: Vec<Arc<dyn CategoryEvaluator>>,
    ) -> Self {
        let evaluators = evaluators.into_iter().map(|e| (e.category(), e)).collect();
        Self {
            threshold,
            max_attempts,
            weights,
            evaluators,
            overrides: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EngineConfig, evaluators: Vec<Arc<dyn CategoryEvaluator>>) -> Result<Self, EngineError> {
        Ok(Self::new(
            config.quality.threshold,
            config.quality.max_stage_attempts,
            config.quality.effective_weights()?,
            evaluators,
        ))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Registers an admin override: the next evaluation of (session, stage)
    /// passes regardless of score.
    pub fn register_override(&self, session_id: SessionId, stage: u8, operator: impl Into<String>) {
        let operator = operator.into();
        info!(session = %session_id, stage, operator = %operator, "quality override registered");
        self.overrides.lock().insert((session_id, stage), operator);
    }

    /// Scores one attempt and decides pass / retry / fallback.
    pub fn evaluate(
        &self,
        ctx: &StageContext,
        worker: &dyn StageWorker,
        output: &StageOutput,
    ) -> GateDecision {
        let mut scores = worker.evaluate_quality(ctx, output);
        for (category, evaluator) in &self.evaluators {
            scores.insert(*category, evaluator.evaluate(ctx, output).clamp(0.0, 1.0));
        }
        let score = QualityScore::clamped(self.weights.combine(&scores));

        let override_operator = self.overrides.lock().remove(&(ctx.session_id, ctx.stage.value()));
        let outcome = if override_operator.is_some() {
            GateOutcome::Pass
        } else if score.passes(self.threshold) {
            GateOutcome::Pass
        } else if ctx.attempt < self.max_attempts {
            GateOutcome::Retry
        } else {
            GateOutcome::Fallback
        };

        debug!(
            session = %ctx.session_id,
            stage = %ctx.stage,
            attempt = ctx.attempt,
            score = %score,
            ?outcome,
            "quality gate decision"
        );

        GateDecision {
            outcome,
            score,
            category_scores: scores,
            override_operator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use comicforge_domain::services::{CategoryScores, ProgressSink};
    use comicforge_domain::{ConceptOutput, QualityLevel, StageIndex};

    /// Worker stub whose raw score is fixed per construction.
    struct FixedWorker {
        raw: f64,
    }

    #[async_trait]
    impl StageWorker for FixedWorker {
        fn stage(&self) -> StageIndex {
            StageIndex::first()
        }

        fn validate_input(&self, _ctx: &StageContext) -> Result<(), EngineError> {
            Ok(())
        }

        async fn execute(&self, _ctx: &StageContext, _progress: &dyn ProgressSink) -> Result<StageOutput, EngineError> {
            unreachable!("gate tests never execute")
        }

        fn validate_output(&self, _ctx: &StageContext, _output: &StageOutput) -> Result<(), EngineError> {
            Ok(())
        }

        fn evaluate_quality(&self, _ctx: &StageContext, _output: &StageOutput) -> CategoryScores {
            QualityCategory::ALL.iter().map(|c| (*c, self.raw)).collect()
        }
    }

    fn context(attempt: u32) -> StageContext {
        StageContext {
            session_id: SessionId::new(),
            stage: StageIndex::first(),
            attempt,
            quality: QualityLevel::Medium,
            submission: "s".to_string(),
            prior: BTreeMap::new(),
            modifications: vec![],
            stage_scores: BTreeMap::new(),
            stage_attempts: BTreeMap::new(),
            elapsed_ms: 0,
        }
    }

    fn output() -> StageOutput {
        StageOutput::Concept(ConceptOutput {
            theme: "x".to_string(),
            genres: vec![],
            world_setting: "y".to_string(),
            target_audience: "teen".to_string(),
            estimated_pages: 1,
        })
    }

    fn gate() -> QualityGate {
        QualityGate::new(0.70, 3, QualityWeights::default(), vec![])
    }

    #[test]
    fn test_pass_at_threshold() {
        let decision = gate().evaluate(&context(1), &FixedWorker { raw: 0.70 }, &output());
        assert_eq!(decision.outcome, GateOutcome::Pass);
        assert!((decision.score.value() - 0.70).abs() < 1e-9);
    }

    #[test]
    fn test_retry_below_threshold_with_budget() {
        let decision = gate().evaluate(&context(1), &FixedWorker { raw: 0.60 }, &output());
        assert_eq!(decision.outcome, GateOutcome::Retry);
    }

    #[test]
    fn test_fallback_when_budget_exhausted() {
        let decision = gate().evaluate(&context(3), &FixedWorker { raw: 0.68 }, &output());
        assert_eq!(decision.outcome, GateOutcome::Fallback);
    }

    #[test]
    fn test_evaluator_overrides_worker_category() {
        struct Zero;
        impl CategoryEvaluator for Zero {
            fn category(&self) -> QualityCategory {
                QualityCategory::NarrativeCoherence
            }
            fn evaluate(&self, _ctx: &StageContext, _output: &StageOutput) -> f64 {
                0.0
            }
        }
        let gate = QualityGate::new(0.70, 3, QualityWeights::default(), vec![Arc::new(Zero)]);
        let decision = gate.evaluate(&context(1), &FixedWorker { raw: 1.0 }, &output());
        // narrative-coherence (weight 0.20) forced to zero: 0.80 overall
        assert!((decision.score.value() - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_admin_override_forces_pass_once() {
        let gate = gate();
        let ctx = context(3);
        gate.register_override(ctx.session_id, 1, "ops-admin");

        let decision = gate.evaluate(&ctx, &FixedWorker { raw: 0.1 }, &output());
        assert_eq!(decision.outcome, GateOutcome::Pass);
        assert_eq!(decision.override_operator.as_deref(), Some("ops-admin"));

        // Consumed: the next evaluation decides on merit
        let decision = gate.evaluate(&ctx, &FixedWorker { raw: 0.1 }, &output());
        assert_eq!(decision.outcome, GateOutcome::Fallback);
        assert!(decision.override_operator.is_none());
    }
}
