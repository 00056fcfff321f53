// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Index Value Object
//!
//! The pipeline exposes exactly seven observable stages. `StageIndex` is the
//! validated one-based index into that sequence, carrying the canonical stage
//! names, per-stage default wall-clock budgets, and the default set of
//! HITL-enabled stages.
//!
//! ## The Seven Stages
//!
//! | # | Name | Model | Default budget |
//! |---|---|---|---|
//! | 1 | concept | text | 12s |
//! | 2 | characters | text | 18s |
//! | 3 | plot | text | 15s |
//! | 4 | storyboard | text | 20s |
//! | 5 | scene-images | image | 25s |
//! | 6 | dialogue | text | 4s |
//! | 7 | final | text | 3s |
//!
//! Stage k reads only from stages `< k` on the same version path; the
//! scheduler enforces monotonic progression and `StageIndex` makes an
//! out-of-range index unrepresentable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// Number of observable pipeline stages
pub const STAGE_COUNT: usize = 7;

/// Canonical stage names, in execution order
const STAGE_NAMES: [&str; STAGE_COUNT] = [
    "concept",
    "characters",
    "plot",
    "storyboard",
    "scene-images",
    "dialogue",
    "final",
];

/// Default per-stage wall-clock budgets, in seconds
const DEFAULT_BUDGET_SECS: [u64; STAGE_COUNT] = [12, 18, 15, 20, 25, 4, 3];

/// Stages that open a HITL rendezvous by default
const DEFAULT_HITL_STAGES: [u8; 2] = [3, 6];

/// Validated one-based index of an observable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageIndex(u8);

impl StageIndex {
    /// Creates a stage index, rejecting values outside 1..=7.
    pub fn new(index: u8) -> Result<Self, EngineError> {
        if index == 0 || index as usize > STAGE_COUNT {
            return Err(EngineError::invalid_input(format!(
                "stage index must be in 1..={}, got {}",
                STAGE_COUNT, index
            )));
        }
        Ok(Self(index))
    }

    /// The first stage (concept)
    pub fn first() -> Self {
        Self(1)
    }

    /// The last stage (final assembly)
    pub fn last() -> Self {
        Self(STAGE_COUNT as u8)
    }

    /// One-based index value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Zero-based index, for array addressing
    pub fn as_offset(&self) -> usize {
        (self.0 - 1) as usize
    }

    /// Canonical stage name
    pub fn name(&self) -> &'static str {
        STAGE_NAMES[self.as_offset()]
    }

    /// Default wall-clock budget for this stage
    pub fn default_budget(&self) -> std::time::Duration {
        std::time::Duration::from_secs(DEFAULT_BUDGET_SECS[self.as_offset()])
    }

    /// Whether this stage opens a HITL rendezvous by default
    pub fn hitl_by_default(&self) -> bool {
        DEFAULT_HITL_STAGES.contains(&self.0)
    }

    /// Whether this stage drives the image model (stage 5) rather than the
    /// text model.
    pub fn uses_image_model(&self) -> bool {
        self.0 == 5
    }

    /// The following stage, if any
    pub fn next(&self) -> Option<StageIndex> {
        if (self.0 as usize) < STAGE_COUNT {
            Some(Self(self.0 + 1))
        } else {
            None
        }
    }

    /// Whether this is the final stage
    pub fn is_last(&self) -> bool {
        self.0 as usize == STAGE_COUNT
    }

    /// Iterates all stages in execution order.
    pub fn all() -> impl Iterator<Item = StageIndex> {
        (1..=STAGE_COUNT as u8).map(StageIndex)
    }
}

impl fmt::Display for StageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}

impl FromStr for StageIndex {
    type Err = EngineError;

    /// Parses either a numeric index ("3") or a canonical name ("plot").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u8>() {
            return Self::new(n);
        }
        STAGE_NAMES
            .iter()
            .position(|name| *name == s)
            .map(|pos| Self(pos as u8 + 1))
            .ok_or_else(|| EngineError::invalid_input(format!("unknown stage '{}'", s)))
    }
}

impl Serialize for StageIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

impl<'de> Deserialize<'de> for StageIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        StageIndex::new(raw).map_err(serde::de::Error::custom)
    }
}
