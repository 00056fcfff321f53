// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Preview payload value object.
//!
//! A preview is a rendering-ready projection of one stage result at a given
//! quality level. Previews are derived, never authoritative: the underlying
//! `StageResult` is the single source of truth, and a preview is invalidated
//! when its result is superseded on the active branch. The (stage, quality,
//! fingerprint) triple is the memoisation key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::datetime_serde;
use crate::value_objects::quality_level::QualityLevel;
use crate::value_objects::stage_index::StageIndex;

/// Rendering-ready projection of a stage result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewPayload {
    pub stage: StageIndex,
    pub quality: QualityLevel,
    /// Fingerprint of the stage output this preview was derived from.
    pub source_fingerprint: String,
    /// One-line human-readable summary.
    pub summary: String,
    /// Quality-level-dependent projection of the payload.
    pub detail: serde_json::Value,
    #[serde(with = "datetime_serde")]
    pub generated_at: DateTime<Utc>,
}

impl PreviewPayload {
    /// Memoisation key for this preview.
    pub fn cache_key(&self) -> (StageIndex, QualityLevel, String) {
        (self.stage, self.quality, self.source_fingerprint.clone())
    }
}
