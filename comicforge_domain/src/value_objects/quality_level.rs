// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Requested generation quality level.
//!
//! The level travels with the submission and drives preview fidelity and the
//! image-cache retention policy (lower quality keeps cache entries for a
//! shorter time).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Five-step quality setting for a generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityLevel {
    UltraLow,
    Low,
    Medium,
    High,
    UltraHigh,
}

impl QualityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::UltraLow => "ultra-low",
            QualityLevel::Low => "low",
            QualityLevel::Medium => "medium",
            QualityLevel::High => "high",
            QualityLevel::UltraHigh => "ultra-high",
        }
    }

    /// Image-cache retention for results rendered at this level.
    pub fn cache_ttl(&self) -> Duration {
        match self {
            QualityLevel::UltraLow => Duration::from_secs(5 * 60),
            QualityLevel::Low => Duration::from_secs(15 * 60),
            QualityLevel::Medium => Duration::from_secs(60 * 60),
            QualityLevel::High => Duration::from_secs(4 * 60 * 60),
            QualityLevel::UltraHigh => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Relative preview detail, used when projecting stage results into
    /// rendering-ready previews. Higher levels include more of the payload.
    pub fn preview_detail(&self) -> usize {
        match self {
            QualityLevel::UltraLow => 1,
            QualityLevel::Low => 2,
            QualityLevel::Medium => 3,
            QualityLevel::High => 4,
            QualityLevel::UltraHigh => 5,
        }
    }
}

impl Default for QualityLevel {
    fn default() -> Self {
        QualityLevel::Medium
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ultra-low" => Ok(QualityLevel::UltraLow),
            "low" => Ok(QualityLevel::Low),
            "medium" => Ok(QualityLevel::Medium),
            "high" => Ok(QualityLevel::High),
            "ultra-high" => Ok(QualityLevel::UltraHigh),
            other => Err(EngineError::invalid_input(format!("unknown quality level '{}'", other))),
        }
    }
}
