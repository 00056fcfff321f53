// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Generation Metrics Entity
//!
//! Per-session measurements accumulated while the pipeline runs: stage
//! timings and attempts, fan-out statistics, HITL engagement, and degraded
//! sections. The scheduler owns one instance per session and folds a
//! snapshot into the final artifact's stats block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::datetime_serde;
use crate::value_objects::generic_id::SessionId;
use crate::value_objects::stage_index::{StageIndex, STAGE_COUNT};
use crate::value_objects::stage_output::GenerationStats;

/// Mutable per-session measurement record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMetrics {
    session_id: SessionId,
    #[serde(with = "datetime_serde::option")]
    started_at: Option<DateTime<Utc>>,
    #[serde(with = "datetime_serde::option")]
    finished_at: Option<DateTime<Utc>>,
    stage_elapsed_ms: [Option<u64>; STAGE_COUNT],
    stage_attempts: [u32; STAGE_COUNT],
    stage_scores: [Option<f64>; STAGE_COUNT],
    image_tasks_total: u32,
    image_cache_hits: u32,
    image_failures: u32,
    fanout_efficiency: Option<f64>,
    hitl_opened: u32,
    hitl_feedback_received: u32,
    degraded_sections: Vec<String>,
}

impl GenerationMetrics {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            started_at: None,
            finished_at: None,
            stage_elapsed_ms: [None; STAGE_COUNT],
            stage_attempts: [0; STAGE_COUNT],
            stage_scores: [None; STAGE_COUNT],
            image_tasks_total: 0,
            image_cache_hits: 0,
            image_failures: 0,
            fanout_efficiency: None,
            hitl_opened: 0,
            hitl_feedback_received: 0,
            degraded_sections: Vec::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn mark_started(&mut self) {
        self.started_at = Some(Utc::now());
    }

    pub fn mark_finished(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Records the settled outcome of a stage (the last attempt's timing and
    /// score, plus the attempt count).
    pub fn record_stage(&mut self, stage: StageIndex, elapsed_ms: u64, attempts: u32, score: f64) {
        let i = stage.as_offset();
        self.stage_elapsed_ms[i] = Some(elapsed_ms);
        self.stage_attempts[i] = attempts;
        self.stage_scores[i] = Some(score);
    }

    /// Marks a stage as degraded (fallback placeholder output).
    pub fn record_degraded(&mut self, stage: StageIndex) {
        let name = stage.name().to_string();
        if !self.degraded_sections.contains(&name) {
            self.degraded_sections.push(name);
        }
    }

    pub fn record_fanout(&mut self, tasks: u32, cache_hits: u32, failures: u32, efficiency: f64) {
        self.image_tasks_total = tasks;
        self.image_cache_hits = cache_hits;
        self.image_failures = failures;
        self.fanout_efficiency = Some(efficiency);
    }

    pub fn record_hitl_opened(&mut self) {
        self.hitl_opened += 1;
    }

    pub fn record_hitl_feedback(&mut self) {
        self.hitl_feedback_received += 1;
    }

    pub fn stage_score(&self, stage: StageIndex) -> Option<f64> {
        self.stage_scores[stage.as_offset()]
    }

    pub fn stage_elapsed_ms(&self, stage: StageIndex) -> Option<u64> {
        self.stage_elapsed_ms[stage.as_offset()]
    }

    pub fn fanout_efficiency(&self) -> Option<f64> {
        self.fanout_efficiency
    }

    pub fn degraded_sections(&self) -> &[String] {
        &self.degraded_sections
    }

    /// Fraction of rendezvous that received real observer feedback.
    pub fn hitl_engagement(&self) -> Option<f64> {
        if self.hitl_opened == 0 {
            None
        } else {
            Some(self.hitl_feedback_received as f64 / self.hitl_opened as f64)
        }
    }

    /// Mean of recorded stage scores.
    pub fn overall_quality(&self) -> f64 {
        let scores: Vec<f64> = self.stage_scores.iter().flatten().copied().collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    pub fn total_elapsed_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            (Some(start), None) => (Utc::now() - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }

    /// Snapshot for the final artifact's stats block.
    pub fn stats(&self) -> GenerationStats {
        GenerationStats {
            total_elapsed_ms: self.total_elapsed_ms(),
            total_attempts: self.stage_attempts.iter().sum(),
            image_cache_hits: self.image_cache_hits,
            panels_rendered: self.image_tasks_total.saturating_sub(self.image_failures),
            degraded_sections: self.degraded_sections.clone(),
        }
    }
}
