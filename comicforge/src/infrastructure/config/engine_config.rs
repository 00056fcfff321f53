// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Configuration
//!
//! One TOML document configures the whole engine. Every field has a default
//! matching the published engine behavior, so an empty document (or no file
//! at all) yields a working configuration; `validate` enforces the cross-
//! field rules after loading.
//!
//! ```toml
//! [limits]
//! max_sessions = 50
//! max_stage_workers = 20
//! max_image_tasks_global = 100
//! per_session_image_tasks = 5
//!
//! [quality]
//! threshold = 0.70
//! max_stage_attempts = 3
//!
//! [hitl]
//! enabled_stages = [3, 6]
//! timeout_secs = 30
//!
//! [stages]
//! budget_secs = [12, 18, 15, 20, 25, 4, 3]
//! critical_stages = []
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use comicforge_domain::services::quality_evaluator::{QualityCategory, QualityWeights};
use comicforge_domain::{EngineError, RetryPolicy, StageIndex, STAGE_COUNT};

/// Global concurrency caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_sessions: usize,
    pub max_stage_workers: usize,
    pub max_image_tasks_global: usize,
    pub per_session_image_tasks: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 50,
            max_stage_workers: 20,
            max_image_tasks_global: 100,
            per_session_image_tasks: 5,
        }
    }
}

/// Quality gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Pass threshold T.
    pub threshold: f64,
    /// Attempt budget per stage, including the first attempt.
    pub max_stage_attempts: u32,
    /// Category weight overrides; omitted categories are invalid (all seven
    /// must be present when this table is given).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<BTreeMap<QualityCategory, f64>>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.70,
            max_stage_attempts: 3,
            weights: None,
        }
    }
}

impl QualityConfig {
    pub fn effective_weights(&self) -> Result<QualityWeights, EngineError> {
        match &self.weights {
            Some(map) => QualityWeights::new(map.clone()),
            None => Ok(QualityWeights::default()),
        }
    }
}

/// HITL rendezvous settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HitlConfig {
    /// Stages that open a rendezvous when the submission enables HITL.
    pub enabled_stages: Vec<u8>,
    pub timeout_secs: u64,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            enabled_stages: vec![3, 6],
            timeout_secs: 30,
        }
    }
}

/// Per-stage execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    /// Wall-clock budget per stage, seconds, stages 1..=7.
    pub budget_secs: [u64; STAGE_COUNT],
    /// Stages whose retry exhaustion fails the session instead of falling
    /// back (empty by default; deployments typically mark stage 5).
    pub critical_stages: Vec<u8>,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            budget_secs: [12, 18, 15, 20, 25, 4, 3],
            critical_stages: Vec::new(),
        }
    }
}

/// Image retry backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub cap_secs: u64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            cap_secs: policy.cap_secs,
            jitter: policy.jitter,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            cap_secs: self.cap_secs,
            jitter: self.jitter,
        }
    }
}

/// Live update bus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: LimitsConfig,
    pub quality: QualityConfig,
    pub hitl: HitlConfig,
    pub stages: StagesConfig,
    pub retry: RetryConfig,
    pub bus: BusConfig,
}

impl EngineConfig {
    /// Parses a TOML document and validates the result.
    pub fn from_toml_str(raw: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| EngineError::invalid_config(format!("parsing config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file; a missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self, EngineError> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(EngineError::invalid_config(format!("reading {:?}: {}", path, e))),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.limits.max_sessions == 0
            || self.limits.max_stage_workers == 0
            || self.limits.max_image_tasks_global == 0
            || self.limits.per_session_image_tasks == 0
        {
            return Err(EngineError::invalid_config("all concurrency limits must be nonzero"));
        }
        if !(0.0..=1.0).contains(&self.quality.threshold) {
            return Err(EngineError::invalid_config(format!(
                "quality threshold must be in [0, 1], got {}",
                self.quality.threshold
            )));
        }
        if self.quality.max_stage_attempts == 0 {
            return Err(EngineError::invalid_config("max_stage_attempts must be at least 1"));
        }
        self.quality.effective_weights()?;
        for stage in &self.hitl.enabled_stages {
            StageIndex::new(*stage)
                .map_err(|_| EngineError::invalid_config(format!("hitl.enabled_stages contains {}", stage)))?;
        }
        for stage in &self.stages.critical_stages {
            StageIndex::new(*stage)
                .map_err(|_| EngineError::invalid_config(format!("stages.critical_stages contains {}", stage)))?;
        }
        if self.stages.budget_secs.iter().any(|b| *b == 0) {
            return Err(EngineError::invalid_config("stage budgets must be nonzero"));
        }
        if self.hitl.timeout_secs == 0 {
            return Err(EngineError::invalid_config("hitl timeout must be nonzero"));
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(EngineError::invalid_config("retry jitter must be in [0, 1)"));
        }
        if self.bus.queue_capacity < 2 {
            return Err(EngineError::invalid_config("bus queue capacity must be at least 2"));
        }
        Ok(())
    }

    /// Whether a stage opens a rendezvous for a HITL-enabled submission.
    pub fn hitl_enabled_for(&self, stage: StageIndex) -> bool {
        self.hitl.enabled_stages.contains(&stage.value())
    }

    /// Whether retry exhaustion at a stage fails the session.
    pub fn is_critical(&self, stage: StageIndex) -> bool {
        self.stages.critical_stages.contains(&stage.value())
    }

    /// Configured budget for a stage (before per-submission overrides).
    pub fn stage_budget(&self, stage: StageIndex) -> std::time::Duration {
        std::time::Duration::from_secs(self.stages.budget_secs[stage.as_offset()])
    }
}
