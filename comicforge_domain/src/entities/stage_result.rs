// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Result Entity
//!
//! The immutable record of one terminated stage attempt, identified by
//! (session id, stage index, attempt). Every attempt produces a result -
//! passes, retries, and fallbacks alike - and every result carries a quality
//! score. Retries supersede prior attempts on the active branch, but
//! superseded results remain addressable through the version log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::datetime_serde;
use crate::value_objects::generic_id::SessionId;
use crate::value_objects::quality_score::QualityScore;
use crate::value_objects::stage_index::StageIndex;
use crate::value_objects::stage_output::StageOutput;

/// Immutable outcome of one stage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    session_id: SessionId,
    stage: StageIndex,
    attempt: u32,
    /// Hash of the merged inputs this attempt consumed.
    input_fingerprint: String,
    output: StageOutput,
    quality: QualityScore,
    elapsed_ms: u64,
    /// Error messages accumulated during the attempt (empty on clean passes).
    errors: Vec<String>,
    #[serde(with = "datetime_serde")]
    created_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(
        session_id: SessionId,
        stage: StageIndex,
        attempt: u32,
        input_fingerprint: String,
        output: StageOutput,
        quality: QualityScore,
        elapsed_ms: u64,
        errors: Vec<String>,
    ) -> Self {
        Self {
            session_id,
            stage,
            attempt,
            input_fingerprint,
            output,
            quality,
            elapsed_ms,
            errors,
            created_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn stage(&self) -> StageIndex {
        self.stage
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn input_fingerprint(&self) -> &str {
        &self.input_fingerprint
    }

    pub fn output(&self) -> &StageOutput {
        &self.output
    }

    pub fn quality(&self) -> QualityScore {
        self.quality
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_placeholder(&self) -> bool {
        self.output.is_placeholder()
    }

    /// Content fingerprint of the output payload; keys previews and diffs.
    pub fn output_fingerprint(&self) -> String {
        self.output.fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::stage_output::{ConceptOutput, StageOutput};

    fn result(attempt: u32) -> StageResult {
        StageResult::new(
            SessionId::new(),
            StageIndex::first(),
            attempt,
            "abc123".to_string(),
            StageOutput::Concept(ConceptOutput {
                theme: "tides".to_string(),
                genres: vec!["drama".to_string()],
                world_setting: "coastal village".to_string(),
                target_audience: "adult".to_string(),
                estimated_pages: 3,
            }),
            QualityScore::clamped(0.8),
            412,
            vec![],
        )
    }

    #[test]
    fn test_identity_fields() {
        let r = result(2);
        assert_eq!(r.stage().value(), 1);
        assert_eq!(r.attempt(), 2);
        assert_eq!(r.input_fingerprint(), "abc123");
        assert!(!r.is_placeholder());
    }

    #[test]
    fn test_output_fingerprint_matches_payload() {
        let r = result(1);
        assert_eq!(r.output_fingerprint(), r.output().fingerprint());
    }

    #[test]
    fn test_placeholder_results_keep_scores() {
        let r = StageResult::new(
            SessionId::new(),
            StageIndex::new(5).unwrap(),
            3,
            "fp".to_string(),
            StageOutput::Placeholder {
                stage: StageIndex::new(5).unwrap(),
                reason: "retries exhausted".to_string(),
            },
            QualityScore::zero(),
            9000,
            vec!["model unavailable".to_string()],
        );
        assert!(r.is_placeholder());
        assert_eq!(r.quality().value(), 0.0);
        assert_eq!(r.errors().len(), 1);
    }
}
