// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metrics Service Implementation
//!
//! Prometheus-based metrics collection for engine observability. Tracks
//! session outcomes (success rate), per-stage durations and retries,
//! whole-pipeline latency against the 97-second budget, image cache
//! effectiveness, and HITL engagement. Thread-safe with low overhead;
//! exported in Prometheus text format via [`MetricsService::gather`].

use prometheus::{Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use comicforge_domain::{EngineError, StageIndex};

/// Whole-pipeline latency target, in seconds.
pub const PIPELINE_BUDGET_SECS: f64 = 97.0;

/// Prometheus metrics service for the generation engine.
#[derive(Clone)]
pub struct MetricsService {
    registry: Arc<Registry>,

    // Session lifecycle
    sessions_submitted_total: IntCounter,
    sessions_completed_total: IntCounter,
    sessions_failed_total: IntCounter,
    sessions_cancelled_total: IntCounter,
    active_sessions: IntGauge,

    // Stage execution
    stage_duration_seconds: HistogramVec,
    stage_retries_total: IntCounterVec,
    stage_fallbacks_total: IntCounterVec,

    // Whole-pipeline latency vs the 97s budget
    pipeline_duration_seconds: Histogram,
    pipeline_budget_met_total: IntCounter,
    pipeline_budget_missed_total: IntCounter,

    // Image fan-out
    image_cache_hits_total: IntCounter,
    image_cache_misses_total: IntCounter,
    image_tasks_total: IntCounter,

    // HITL engagement
    hitl_rendezvous_total: IntCounter,
    hitl_feedback_total: IntCounter,
}

impl MetricsService {
    pub fn new() -> Result<Self, EngineError> {
        let registry = Registry::new();

        let sessions_submitted_total = IntCounter::with_opts(
            Opts::new("sessions_submitted_total", "Total sessions admitted").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating sessions_submitted_total: {}", e)))?;

        let sessions_completed_total = IntCounter::with_opts(
            Opts::new("sessions_completed_total", "Total sessions completed").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating sessions_completed_total: {}", e)))?;

        let sessions_failed_total = IntCounter::with_opts(
            Opts::new("sessions_failed_total", "Total sessions failed").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating sessions_failed_total: {}", e)))?;

        let sessions_cancelled_total = IntCounter::with_opts(
            Opts::new("sessions_cancelled_total", "Total sessions cancelled").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating sessions_cancelled_total: {}", e)))?;

        let active_sessions = IntGauge::with_opts(
            Opts::new("active_sessions", "Sessions currently admitted and non-terminal").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating active_sessions: {}", e)))?;

        let stage_duration_seconds = HistogramVec::new(
            HistogramOpts::new("stage_duration_seconds", "Settled duration per stage")
                .namespace("comicforge")
                .buckets(vec![0.05, 0.25, 1.0, 4.0, 8.0, 15.0, 25.0, 40.0]),
            &["stage"],
        )
        .map_err(|e| EngineError::internal(format!("creating stage_duration_seconds: {}", e)))?;

        let stage_retries_total = IntCounterVec::new(
            Opts::new("stage_retries_total", "Retry attempts per stage").namespace("comicforge"),
            &["stage"],
        )
        .map_err(|e| EngineError::internal(format!("creating stage_retries_total: {}", e)))?;

        let stage_fallbacks_total = IntCounterVec::new(
            Opts::new("stage_fallbacks_total", "Fallback transitions per stage").namespace("comicforge"),
            &["stage"],
        )
        .map_err(|e| EngineError::internal(format!("creating stage_fallbacks_total: {}", e)))?;

        let pipeline_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("pipeline_duration_seconds", "Whole-pipeline wall time")
                .namespace("comicforge")
                .buckets(vec![10.0, 30.0, 60.0, 97.0, 120.0, 180.0, 300.0]),
        )
        .map_err(|e| EngineError::internal(format!("creating pipeline_duration_seconds: {}", e)))?;

        let pipeline_budget_met_total = IntCounter::with_opts(
            Opts::new("pipeline_budget_met_total", "Sessions finishing within the 97s budget")
                .namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating pipeline_budget_met_total: {}", e)))?;

        let pipeline_budget_missed_total = IntCounter::with_opts(
            Opts::new("pipeline_budget_missed_total", "Sessions exceeding the 97s budget").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating pipeline_budget_missed_total: {}", e)))?;

        let image_cache_hits_total = IntCounter::with_opts(
            Opts::new("image_cache_hits_total", "Image cache hits").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating image_cache_hits_total: {}", e)))?;

        let image_cache_misses_total = IntCounter::with_opts(
            Opts::new("image_cache_misses_total", "Image cache misses").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating image_cache_misses_total: {}", e)))?;

        let image_tasks_total = IntCounter::with_opts(
            Opts::new("image_tasks_total", "Image tasks executed").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating image_tasks_total: {}", e)))?;

        let hitl_rendezvous_total = IntCounter::with_opts(
            Opts::new("hitl_rendezvous_total", "HITL rendezvous opened").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating hitl_rendezvous_total: {}", e)))?;

        let hitl_feedback_total = IntCounter::with_opts(
            Opts::new("hitl_feedback_total", "HITL rendezvous resolved by real feedback").namespace("comicforge"),
        )
        .map_err(|e| EngineError::internal(format!("creating hitl_feedback_total: {}", e)))?;

        registry
            .register(Box::new(sessions_submitted_total.clone()))
            .and_then(|_| registry.register(Box::new(sessions_completed_total.clone())))
            .and_then(|_| registry.register(Box::new(sessions_failed_total.clone())))
            .and_then(|_| registry.register(Box::new(sessions_cancelled_total.clone())))
            .and_then(|_| registry.register(Box::new(active_sessions.clone())))
            .and_then(|_| registry.register(Box::new(stage_duration_seconds.clone())))
            .and_then(|_| registry.register(Box::new(stage_retries_total.clone())))
            .and_then(|_| registry.register(Box::new(stage_fallbacks_total.clone())))
            .and_then(|_| registry.register(Box::new(pipeline_duration_seconds.clone())))
            .and_then(|_| registry.register(Box::new(pipeline_budget_met_total.clone())))
            .and_then(|_| registry.register(Box::new(pipeline_budget_missed_total.clone())))
            .and_then(|_| registry.register(Box::new(image_cache_hits_total.clone())))
            .and_then(|_| registry.register(Box::new(image_cache_misses_total.clone())))
            .and_then(|_| registry.register(Box::new(image_tasks_total.clone())))
            .and_then(|_| registry.register(Box::new(hitl_rendezvous_total.clone())))
            .and_then(|_| registry.register(Box::new(hitl_feedback_total.clone())))
            .map_err(|e| EngineError::internal(format!("registering metrics: {}", e)))?;

        Ok(Self {
            registry: Arc::new(registry),
            sessions_submitted_total,
            sessions_completed_total,
            sessions_failed_total,
            sessions_cancelled_total,
            active_sessions,
            stage_duration_seconds,
            stage_retries_total,
            stage_fallbacks_total,
            pipeline_duration_seconds,
            pipeline_budget_met_total,
            pipeline_budget_missed_total,
            image_cache_hits_total,
            image_cache_misses_total,
            image_tasks_total,
            hitl_rendezvous_total,
            hitl_feedback_total,
        })
    }

    pub fn record_submission(&self) {
        self.sessions_submitted_total.inc();
        self.active_sessions.inc();
    }

    pub fn record_completed(&self, pipeline_secs: f64) {
        self.sessions_completed_total.inc();
        self.active_sessions.dec();
        self.pipeline_duration_seconds.observe(pipeline_secs);
        if pipeline_secs <= PIPELINE_BUDGET_SECS {
            self.pipeline_budget_met_total.inc();
        } else {
            self.pipeline_budget_missed_total.inc();
        }
    }

    pub fn record_failed(&self) {
        self.sessions_failed_total.inc();
        self.active_sessions.dec();
    }

    pub fn record_cancelled(&self) {
        self.sessions_cancelled_total.inc();
        self.active_sessions.dec();
    }

    pub fn record_stage_settled(&self, stage: StageIndex, secs: f64, retries: u32, fallback: bool) {
        let label = stage.name();
        self.stage_duration_seconds.with_label_values(&[label]).observe(secs);
        if retries > 0 {
            self.stage_retries_total.with_label_values(&[label]).inc_by(retries as u64);
        }
        if fallback {
            self.stage_fallbacks_total.with_label_values(&[label]).inc();
        }
    }

    pub fn record_fanout(&self, tasks: u32, cache_hits: u32) {
        self.image_tasks_total.inc_by(tasks as u64);
        self.image_cache_hits_total.inc_by(cache_hits as u64);
        self.image_cache_misses_total.inc_by(tasks.saturating_sub(cache_hits) as u64);
    }

    pub fn record_hitl_opened(&self) {
        self.hitl_rendezvous_total.inc();
    }

    pub fn record_hitl_feedback(&self) {
        self.hitl_feedback_total.inc();
    }

    /// Fraction of terminated sessions that completed; `None` before any
    /// terminated.
    pub fn success_rate(&self) -> Option<f64> {
        let completed = self.sessions_completed_total.get() as f64;
        let terminated =
            completed + self.sessions_failed_total.get() as f64 + self.sessions_cancelled_total.get() as f64;
        if terminated == 0.0 {
            None
        } else {
            Some(completed / terminated)
        }
    }

    /// Lifetime image cache hit rate.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let hits = self.image_cache_hits_total.get() as f64;
        let total = hits + self.image_cache_misses_total.get() as f64;
        if total == 0.0 {
            None
        } else {
            Some(hits / total)
        }
    }

    /// Fraction of rendezvous resolved by real observer feedback.
    pub fn hitl_engagement_rate(&self) -> Option<f64> {
        let opened = self.hitl_rendezvous_total.get() as f64;
        if opened == 0.0 {
            None
        } else {
            Some(self.hitl_feedback_total.get() as f64 / opened)
        }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn gather(&self) -> Result<String, EngineError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| EngineError::internal(format!("encoding metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| EngineError::internal(format!("metrics not utf-8: {}", e)))
    }
}
