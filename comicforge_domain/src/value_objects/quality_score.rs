// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Quality score value object.
//!
//! Every terminated stage attempt records a score in `[0, 1]`, including
//! failed and fallback attempts. `QualityScore` makes out-of-range and
//! non-finite scores unrepresentable.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// A stage quality score in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct QualityScore(f64);

impl QualityScore {
    /// Creates a score, rejecting non-finite or out-of-range values.
    pub fn new(value: f64) -> Result<Self, EngineError> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(EngineError::invalid_input(format!(
                "quality score must be a finite value in [0, 1], got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Creates a score by clamping into `[0, 1]`; non-finite inputs become 0.
    pub fn clamped(value: f64) -> Self {
        if value.is_finite() {
            Self(value.clamp(0.0, 1.0))
        } else {
            Self(0.0)
        }
    }

    /// Score recorded for a fallback placeholder attempt
    pub fn zero() -> Self {
        Self(0.0)
    }

    /// Perfect score, used by the admin override path
    pub fn perfect() -> Self {
        Self(1.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Whether the score meets the given gate threshold.
    pub fn passes(&self, threshold: f64) -> bool {
        self.0 >= threshold
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

impl Serialize for QualityScore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> Deserialize<'de> for QualityScore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        QualityScore::new(raw).map_err(serde::de::Error::custom)
    }
}
