// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Quality Categories and Evaluators
//!
//! Stage results are scored as a weighted sum over seven named categories.
//! Category evaluators are pluggable values keyed by category; the quality
//! gate combines evaluator scores (falling back to the worker's own raw
//! scores) under the configured weights.
//!
//! Default weights, summing to 1.0:
//!
//! | Category | Weight |
//! |---|---|
//! | narrative-coherence | 0.20 |
//! | visual-consistency | 0.15 |
//! | technical-quality | 0.15 |
//! | readability | 0.15 |
//! | character-development | 0.15 |
//! | pacing-flow | 0.10 |
//! | artistic-appeal | 0.10 |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::services::stage_worker::StageContext;
use crate::value_objects::stage_output::StageOutput;

/// The seven scoring categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityCategory {
    VisualConsistency,
    NarrativeCoherence,
    TechnicalQuality,
    Readability,
    PacingFlow,
    CharacterDevelopment,
    ArtisticAppeal,
}

impl QualityCategory {
    pub const ALL: [QualityCategory; 7] = [
        QualityCategory::VisualConsistency,
        QualityCategory::NarrativeCoherence,
        QualityCategory::TechnicalQuality,
        QualityCategory::Readability,
        QualityCategory::PacingFlow,
        QualityCategory::CharacterDevelopment,
        QualityCategory::ArtisticAppeal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityCategory::VisualConsistency => "visual-consistency",
            QualityCategory::NarrativeCoherence => "narrative-coherence",
            QualityCategory::TechnicalQuality => "technical-quality",
            QualityCategory::Readability => "readability",
            QualityCategory::PacingFlow => "pacing-flow",
            QualityCategory::CharacterDevelopment => "character-development",
            QualityCategory::ArtisticAppeal => "artistic-appeal",
        }
    }
}

/// Category weights used by the gate's weighted sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    weights: BTreeMap<QualityCategory, f64>,
}

impl Default for QualityWeights {
    fn default() -> Self {
        let weights = BTreeMap::from([
            (QualityCategory::NarrativeCoherence, 0.20),
            (QualityCategory::VisualConsistency, 0.15),
            (QualityCategory::TechnicalQuality, 0.15),
            (QualityCategory::Readability, 0.15),
            (QualityCategory::CharacterDevelopment, 0.15),
            (QualityCategory::PacingFlow, 0.10),
            (QualityCategory::ArtisticAppeal, 0.10),
        ]);
        Self { weights }
    }
}

impl QualityWeights {
    /// Builds custom weights; they must cover all categories and sum to 1.0
    /// within a small tolerance.
    pub fn new(weights: BTreeMap<QualityCategory, f64>) -> Result<Self, EngineError> {
        for category in QualityCategory::ALL {
            if !weights.contains_key(&category) {
                return Err(EngineError::invalid_config(format!(
                    "missing weight for category '{}'",
                    category.as_str()
                )));
            }
        }
        let total: f64 = weights.values().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(EngineError::invalid_config(format!(
                "quality weights must sum to 1.0, got {}",
                total
            )));
        }
        if weights.values().any(|w| *w < 0.0) {
            return Err(EngineError::invalid_config("quality weights must be non-negative"));
        }
        Ok(Self { weights })
    }

    pub fn weight(&self, category: QualityCategory) -> f64 {
        self.weights.get(&category).copied().unwrap_or(0.0)
    }

    /// Weighted sum over per-category scores; missing categories score a
    /// neutral 0.75.
    pub fn combine(&self, scores: &BTreeMap<QualityCategory, f64>) -> f64 {
        QualityCategory::ALL
            .iter()
            .map(|category| {
                let score = scores.get(category).copied().unwrap_or(0.75).clamp(0.0, 1.0);
                self.weight(*category) * score
            })
            .sum()
    }
}

/// A pluggable per-category evaluator.
///
/// Evaluators are pure scoring functions over the stage context and output;
/// they must return a value in [0, 1] (the gate clamps defensively).
pub trait CategoryEvaluator: Send + Sync {
    fn category(&self) -> QualityCategory;
    fn evaluate(&self, ctx: &StageContext, output: &StageOutput) -> f64;
}
